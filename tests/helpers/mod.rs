/// Test helpers and fixtures for table integration tests
///
/// Every test builds its own in-memory backend, so tests share no state and
/// can run in parallel with virtual time.
pub mod fixtures;

pub use scaling_table::backend::memory::{CapacityUpdate, InMemoryBackend, Operation};
pub use scaling_table::{
    Error, IndexSchema, ProvisionedCapacity, Resource, ScalingConfig, ScalingOverrides,
    StoredItem, Table, TableBackend, TableSchema,
};
pub use serde::{Deserialize, Serialize};

// Re-export common fixtures
pub use fixtures::{Address, Order, Profile};

#[allow(unused_imports)]
pub use fixtures::{order_item, profile, profile_item};

use rusty_ulid::Ulid;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

/// Install a log subscriber once per test binary; honours `RUST_LOG`
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Table layout used by every test: `gsi1` for alternate identities,
/// `gsi2` for entity scans
pub fn schema() -> TableSchema {
    TableSchema::new("tests_scaling_table")
        .with_index(IndexSchema::new("gsi1", "gsi1pk", "gsi1sk"))
        .with_index(IndexSchema::new("gsi2", "gsi2pk", "gsi2sk"))
}

/// Fresh empty backend
pub fn backend() -> InMemoryBackend {
    InMemoryBackend::new(schema())
}

/// Table over `backend` with the default scaling configuration
pub fn table(backend: &InMemoryBackend) -> Table {
    table_with_config(backend, ScalingConfig::default())
}

/// Table over `backend` with `config`
pub fn table_with_config(backend: &InMemoryBackend, config: ScalingConfig) -> Table {
    init_tracing();
    Table::new(Arc::new(backend.clone()), config)
}

/// Unique partition key for isolation
pub fn unique_partition(prefix: &str) -> String {
    format!("{prefix}#{}", Ulid::generate())
}

/// The error the store returns when provisioned throughput is exceeded
#[allow(dead_code)]
pub fn throttled() -> Error {
    Error::CapacityExceeded {
        message: "The level of configured provisioned throughput for the table was exceeded"
            .to_string(),
    }
}

/// Capacity updates applied to one resource, in order
#[allow(dead_code)]
pub fn updates_for(updates: &[CapacityUpdate], resource: &Resource) -> Vec<ProvisionedCapacity> {
    updates
        .iter()
        .filter(|u| &u.resource == resource)
        .map(|u| u.capacity)
        .collect()
}

/// A generic backend failure that is never retried
#[allow(dead_code)]
pub fn backend_failure() -> Error {
    Error::Transport {
        message: "Internal server error".to_string(),
        code: Some("InternalServerError".to_string()),
        status: Some(500),
        request_id: Some("REQ-1".to_string()),
    }
}
