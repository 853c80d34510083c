use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::backend::Key;
use crate::error::{Error, ErrorDetail, status_code_for};

/// Keys of an item in one secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndexKey {
    /// Index name
    pub index: String,
    /// Index partition key value
    pub partition_key: String,
    /// Index sort key value
    pub sort_key: String,
}

/// A domain payload with its single-table envelope
///
/// `(partition_key, sort_key)` identifies the item. `created_at` is kept
/// across writes; `updated_at` advances on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem<T> {
    /// Partition key value
    pub partition_key: String,
    /// Sort key value
    pub sort_key: String,
    /// Entity type discriminator
    pub entity_type: String,
    /// Domain payload
    pub attributes: T,
    /// Time of the first write
    pub created_at: DateTime<Utc>,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
    /// Projections into secondary indexes
    pub secondary_index_keys: Vec<SecondaryIndexKey>,
}

impl<T> StoredItem<T> {
    /// New item stamped with the current time
    pub fn new(
        partition_key: impl Into<String>,
        sort_key: impl Into<String>,
        entity_type: impl Into<String>,
        attributes: T,
    ) -> Self {
        let now = Utc::now().trunc_subsecs(3);
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
            entity_type: entity_type.into(),
            attributes,
            created_at: now,
            updated_at: now,
            secondary_index_keys: Vec::new(),
        }
    }

    /// Project the item into a secondary index
    pub fn with_index_key(
        mut self,
        index: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: impl Into<String>,
    ) -> Self {
        self.secondary_index_keys.push(SecondaryIndexKey {
            index: index.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        });
        self
    }

    /// Primary key of the item
    pub fn key(&self) -> Key {
        Key::new(self.partition_key.clone(), self.sort_key.clone())
    }

    /// Index keys for `index`, if the item is projected into it
    pub fn index_key(&self, index: &str) -> Option<&SecondaryIndexKey> {
        self.secondary_index_keys.iter().find(|k| k.index == index)
    }

    /// Same envelope around a different payload
    pub fn map_attributes<U>(self, f: impl FnOnce(T) -> U) -> StoredItem<U> {
        StoredItem {
            partition_key: self.partition_key,
            sort_key: self.sort_key,
            entity_type: self.entity_type,
            attributes: f(self.attributes),
            created_at: self.created_at,
            updated_at: self.updated_at,
            secondary_index_keys: self.secondary_index_keys,
        }
    }
}

/// Result of a table operation with its retry accounting
#[must_use = "operation results carry failures that should be handled"]
#[derive(Debug)]
pub struct OperationResult<T> {
    /// Value or error
    pub result: Result<T, Error>,
    /// Number of backend attempts, summed over every page and step
    pub attempts: u32,
    /// Time spent in backoff sleeps
    pub retry_delay: Duration,
    /// Encoded payload size in KB, for writes
    pub payload_size_kb: Option<f64>,
}

impl<T> OperationResult<T> {
    pub(crate) fn new(result: Result<T, Error>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            result,
            attempts,
            retry_delay,
            payload_size_kb: None,
        }
    }

    pub(crate) fn with_payload_size(mut self, size_kb: f64) -> Self {
        self.payload_size_kb = Some(size_kb);
        self
    }

    /// Whether the operation succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The value, if the operation succeeded
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The error, if the operation failed
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// HTTP status an API caller should respond with on failure
    pub fn status_code(&self) -> Option<u16> {
        self.error().map(status_code_for)
    }

    /// Backend request identifier of the failing call, if known
    pub fn request_id(&self) -> Option<&str> {
        self.error().and_then(Error::request_id)
    }

    /// Structured failure, if the operation failed
    pub fn error_detail(&self) -> Option<ErrorDetail> {
        self.error().map(Error::detail)
    }

    /// Drop the accounting and keep the outcome
    pub fn into_result(self) -> Result<T, Error> {
        self.result
    }

    /// Transform the value, keeping the accounting
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            result: self.result.map(f),
            attempts: self.attempts,
            retry_delay: self.retry_delay,
            payload_size_kb: self.payload_size_kb,
        }
    }

    /// Caller-facing summary
    pub fn report(&self) -> OperationReport {
        OperationReport {
            success: self.is_success(),
            status_code: self.status_code(),
            request_id: self.request_id().map(str::to_string),
            attempts: self.attempts,
            retry_delay_ms: u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
            payload_size_kb: self.payload_size_kb,
            error: self.error_detail(),
        }
    }
}

/// Serializable summary of an [`OperationResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    /// Whether the operation succeeded
    pub success: bool,
    /// HTTP status for the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Backend request identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Number of backend attempts
    pub attempts: u32,
    /// Accumulated backoff in milliseconds
    pub retry_delay_ms: u64,
    /// Encoded payload size in KB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size_kb: Option<f64>,
    /// Structured failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}
