//! # Scaling Table
//!
//! Single-table DynamoDB access layer with adaptive provisioned throughput:
//! - Point get/put/delete and read-modify-write updates addressed by partition and sort key
//! - Range queries that page internally until the partition is exhausted
//! - Secondary index queries for alternate-identity lookups and entity scans
//! - Automatic scale-up on throughput errors, with backoff and a deferred scale-down
//! - An item codec that omits absent fields and round-trips timestamps
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scaling_table::{DynamoDbBackend, ScalingConfig, StoredItem, Table, TableSchema};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Profile {
//!     name: String,
//!     email: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scaling_table::Error> {
//!     let backend = DynamoDbBackend::from_env(TableSchema::from_env()).await;
//!     let table = Table::new(Arc::new(backend), ScalingConfig::from_env());
//!
//!     let profile = Profile {
//!         name: "Ada".to_string(),
//!         email: "ada@example.com".to_string(),
//!     };
//!     let item = StoredItem::new("USER#1", "PROFILE", "User", profile)
//!         .with_index_key("gsi1", "EMAIL#ada@example.com", "USER#1");
//!
//!     let written = table.put(item, false).await;
//!     println!("{:?}", written.report());
//!
//!     let found = table.get::<Profile>("USER#1", "PROFILE").await.into_result()?;
//!     let orders = table
//!         .query::<serde_json::Value>("USER#1", "ORDER#", Some("Order"))
//!         .await
//!         .into_result()?;
//!
//!     Ok(())
//! }
//! ```
#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results,
    unknown_lints,
    unreachable_code,
    unused_mut
)]

mod error;
pub use error::{Error, ErrorDetail, ErrorKind, status_code_for};

/// Backend store boundary and its implementations
pub mod backend;

/// Item codec
pub mod codec;

/// Scaling and table layout configuration
pub mod config;

/// Generic access layer
pub mod table;

/// Adaptive throughput controller
pub mod throughput;

pub use backend::dynamodb::DynamoDbBackend;
pub use backend::memory::InMemoryBackend;
pub use backend::{ProvisionedCapacity, Resource, ResourceCapacity, TableBackend};
pub use config::{IndexSchema, ScalingConfig, ScalingOverrides, TableSchema};
pub use table::{OperationReport, OperationResult, SecondaryIndexKey, StoredItem, Table};
pub use throughput::{Direction, Execution, ThroughputController};
