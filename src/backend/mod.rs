//! Backend store boundary
//!
//! Everything the access layer and the throughput controller need from the
//! capacity-limited store. [`dynamodb::DynamoDbBackend`] talks to the real
//! service; [`memory::InMemoryBackend`] is a scriptable fake for tests.
use async_trait::async_trait;
use std::fmt;

use crate::codec::Item;
use crate::config::TableSchema;
use crate::error::Error;

/// DynamoDB backend
pub mod dynamodb;

/// In-memory backend
pub mod memory;

/// Opaque position to resume a range query from
pub type ContinuationToken = Item;

/// Primary key of an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Partition key value
    pub partition_key: String,
    /// Sort key value
    pub sort_key: String,
}

impl Key {
    /// Create a key
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.partition_key, self.sort_key)
    }
}

/// Condition guarding a point write or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// An item with the same key must already exist
    Exists,
}

/// One page request of a range query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeRequest {
    /// Secondary index to query instead of the base table
    pub index: Option<String>,
    /// Partition key value (of the index when `index` is set)
    pub partition_key: String,
    /// Only sort keys beginning with this prefix
    pub sort_key_prefix: Option<String>,
    /// Only items of this entity type, applied server-side after the key condition
    pub entity_type: Option<String>,
    /// Where the previous page ended
    pub continuation: Option<ContinuationToken>,
}

/// One page of a range query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Raw items of this page
    pub items: Vec<Item>,
    /// Present while more pages remain
    pub continuation: Option<ContinuationToken>,
}

/// Table or one of its secondary indexes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// The base table
    Table,
    /// A secondary index by name
    Index(String),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Table => f.write_str("table"),
            Resource::Index(name) => write!(f, "index:{name}"),
        }
    }
}

/// Provisioned read and write capacity units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvisionedCapacity {
    /// Read capacity units
    pub read: i64,
    /// Write capacity units
    pub write: i64,
}

impl ProvisionedCapacity {
    /// Create a capacity pair
    pub fn new(read: i64, write: i64) -> Self {
        Self { read, write }
    }
}

/// Whether a resource has finished applying its last capacity change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Capacity changes have taken effect
    Active,
    /// A capacity change is in progress
    Updating,
    /// Any other backend status
    Other(String),
}

/// Result of describing a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCapacity {
    /// Described resource
    pub resource: Resource,
    /// Current provisioned capacity
    pub capacity: ProvisionedCapacity,
    /// Current status
    pub status: ResourceStatus,
}

impl ResourceCapacity {
    /// Whether the last capacity change has taken effect
    pub fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }
}

/// The capacity-limited item store
#[async_trait]
pub trait TableBackend: Send + Sync + fmt::Debug {
    /// Physical layout of the table this backend serves
    fn schema(&self) -> &TableSchema;

    /// Write a full item, replacing any item with the same key
    async fn point_write(&self, item: Item, condition: Option<Condition>) -> Result<(), Error>;

    /// Read an item by its primary key
    async fn point_read(&self, key: &Key) -> Result<Option<Item>, Error>;

    /// Read one page of a partition
    async fn range_query(&self, request: &RangeRequest) -> Result<Page, Error>;

    /// Delete an item, failing with [`Error::ConditionFailed`] when the condition is false
    async fn conditional_delete(&self, key: &Key, condition: Condition) -> Result<(), Error>;

    /// Current capacity and status of the table or an index
    async fn describe_capacity(&self, resource: &Resource) -> Result<ResourceCapacity, Error>;

    /// Set the provisioned capacity of the table or an index
    async fn update_capacity(
        &self,
        resource: &Resource,
        capacity: ProvisionedCapacity,
    ) -> Result<(), Error>;

    /// The table followed by every secondary index
    fn resources(&self) -> Vec<Resource> {
        std::iter::once(Resource::Table)
            .chain(
                self.schema()
                    .indexes
                    .iter()
                    .map(|index| Resource::Index(index.name.clone())),
            )
            .collect()
    }
}
