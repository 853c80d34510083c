use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

/// Throughput scaling configuration
///
/// Built once per process and shared by every operation; individual calls may
/// layer a [`ScalingOverrides`] on top with [`ScalingConfig::with_overrides`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Read capacity the table and indexes return to after a scale-down
    pub base_read_capacity: i64,
    /// Write capacity the table and indexes return to after a scale-down
    pub base_write_capacity: i64,
    /// Upper bound for read capacity
    pub max_read_capacity: i64,
    /// Upper bound for write capacity
    pub max_write_capacity: i64,
    /// Multiplier applied to current capacity on every scale-up
    pub scale_up_factor: f64,
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the retry delay
    pub max_backoff: Duration,
    /// Multiplier applied to the retry delay after every backoff
    pub backoff_multiplier: f64,
    /// Time after a scaled success before capacity is lowered again
    pub scale_down_cool_off: Duration,
    /// Interval between status polls while a capacity change is applied
    pub activation_poll_interval: Duration,
    /// Maximum time to wait for a capacity change to become active
    pub max_activation_wait: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            base_read_capacity: 5,
            base_write_capacity: 5,
            max_read_capacity: 100,
            max_write_capacity: 100,
            scale_up_factor: 2.0,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            scale_down_cool_off: Duration::from_secs(300),
            activation_poll_interval: Duration::from_secs(2),
            max_activation_wait: Duration::from_secs(120),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl ScalingConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables (durations in milliseconds):
    /// - `SCALING_BASE_READ_CAPACITY` (default: 5)
    /// - `SCALING_BASE_WRITE_CAPACITY` (default: 5)
    /// - `SCALING_MAX_READ_CAPACITY` (default: 100)
    /// - `SCALING_MAX_WRITE_CAPACITY` (default: 100)
    /// - `SCALING_SCALE_UP_FACTOR` (default: 2.0)
    /// - `SCALING_MAX_RETRIES` (default: 3)
    /// - `SCALING_INITIAL_BACKOFF_MS` (default: 500)
    /// - `SCALING_MAX_BACKOFF_MS` (default: 10000)
    /// - `SCALING_BACKOFF_MULTIPLIER` (default: 2.0)
    /// - `SCALING_COOL_OFF_MS` (default: 300000)
    /// - `SCALING_POLL_INTERVAL_MS` (default: 2000)
    /// - `SCALING_MAX_ACTIVATION_WAIT_MS` (default: 120000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            base_read_capacity: env_or("SCALING_BASE_READ_CAPACITY", defaults.base_read_capacity),
            base_write_capacity: env_or(
                "SCALING_BASE_WRITE_CAPACITY",
                defaults.base_write_capacity,
            ),
            max_read_capacity: env_or("SCALING_MAX_READ_CAPACITY", defaults.max_read_capacity),
            max_write_capacity: env_or("SCALING_MAX_WRITE_CAPACITY", defaults.max_write_capacity),
            scale_up_factor: env_or("SCALING_SCALE_UP_FACTOR", defaults.scale_up_factor),
            max_retries: env_or("SCALING_MAX_RETRIES", defaults.max_retries),
            initial_backoff: env_millis_or("SCALING_INITIAL_BACKOFF_MS", defaults.initial_backoff),
            max_backoff: env_millis_or("SCALING_MAX_BACKOFF_MS", defaults.max_backoff),
            backoff_multiplier: env_or("SCALING_BACKOFF_MULTIPLIER", defaults.backoff_multiplier),
            scale_down_cool_off: env_millis_or("SCALING_COOL_OFF_MS", defaults.scale_down_cool_off),
            activation_poll_interval: env_millis_or(
                "SCALING_POLL_INTERVAL_MS",
                defaults.activation_poll_interval,
            ),
            max_activation_wait: env_millis_or(
                "SCALING_MAX_ACTIVATION_WAIT_MS",
                defaults.max_activation_wait,
            ),
        }
    }

    /// Returns a copy with every field set in `overrides` replaced
    pub fn with_overrides(&self, overrides: &ScalingOverrides) -> Self {
        Self {
            base_read_capacity: overrides
                .base_read_capacity
                .unwrap_or(self.base_read_capacity),
            base_write_capacity: overrides
                .base_write_capacity
                .unwrap_or(self.base_write_capacity),
            max_read_capacity: overrides
                .max_read_capacity
                .unwrap_or(self.max_read_capacity),
            max_write_capacity: overrides
                .max_write_capacity
                .unwrap_or(self.max_write_capacity),
            scale_up_factor: overrides.scale_up_factor.unwrap_or(self.scale_up_factor),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            initial_backoff: overrides.initial_backoff.unwrap_or(self.initial_backoff),
            max_backoff: overrides.max_backoff.unwrap_or(self.max_backoff),
            backoff_multiplier: overrides
                .backoff_multiplier
                .unwrap_or(self.backoff_multiplier),
            scale_down_cool_off: overrides
                .scale_down_cool_off
                .unwrap_or(self.scale_down_cool_off),
            activation_poll_interval: overrides
                .activation_poll_interval
                .unwrap_or(self.activation_poll_interval),
            max_activation_wait: overrides
                .max_activation_wait
                .unwrap_or(self.max_activation_wait),
        }
    }
}

/// Per-call replacements for [`ScalingConfig`] fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ScalingOverrides {
    pub base_read_capacity: Option<i64>,
    pub base_write_capacity: Option<i64>,
    pub max_read_capacity: Option<i64>,
    pub max_write_capacity: Option<i64>,
    pub scale_up_factor: Option<f64>,
    pub max_retries: Option<u32>,
    pub initial_backoff: Option<Duration>,
    pub max_backoff: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub scale_down_cool_off: Option<Duration>,
    pub activation_poll_interval: Option<Duration>,
    pub max_activation_wait: Option<Duration>,
}

/// Secondary index projection over the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name
    pub name: String,
    /// Partition key attribute of the index
    pub partition_key: String,
    /// Sort key attribute of the index
    pub sort_key: String,
}

impl IndexSchema {
    /// Create an index schema
    pub fn new(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

/// Physical layout of the single table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub table_name: String,
    /// Partition key attribute
    pub partition_key: String,
    /// Sort key attribute
    pub sort_key: String,
    /// Entity type attribute
    pub entity_type: String,
    /// Attribute holding the domain payload
    pub attributes: String,
    /// Creation timestamp attribute
    pub created_at: String,
    /// Last update timestamp attribute
    pub updated_at: String,
    /// Secondary indexes
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    /// Schema with the conventional single-table attribute names
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            partition_key: "pk".to_string(),
            sort_key: "sk".to_string(),
            entity_type: "entityType".to_string(),
            attributes: "attributes".to_string(),
            created_at: "createdAt".to_string(),
            updated_at: "updatedAt".to_string(),
            indexes: Vec::new(),
        }
    }

    /// Add a secondary index
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Schema for the table named by `TABLE_NAME` (default: "app-table"),
    /// with `gsi1` (`gsi1pk`/`gsi1sk`) and `gsi2` (`gsi2pk`/`gsi2sk`)
    pub fn from_env() -> Self {
        let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "app-table".to_string());

        Self::new(table_name)
            .with_index(IndexSchema::new("gsi1", "gsi1pk", "gsi1sk"))
            .with_index(IndexSchema::new("gsi2", "gsi2pk", "gsi2sk"))
    }

    /// Look up an index by name
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }
}
