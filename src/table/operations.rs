use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

use super::helpers::{self, PAYLOAD_WARN_KB, record};
use super::{OperationResult, StoredItem, Table};
use crate::backend::{Condition, Key, RangeRequest};
use crate::error::Error;
use crate::throughput::Direction;

impl Table {
    /// Write `item`, replacing any item with the same key
    ///
    /// When an item is already stored under the key, its `created_at` is kept
    /// and `updated_at` advances strictly past the stored value, whatever the
    /// caller's copy carries. The stamped item is returned. With
    /// `require_exists` the write fails with [`Error::ConditionFailed`] unless
    /// the item is already stored.
    ///
    /// Attempts and retry delay are those of the write; the read of the stored
    /// stamps is only reported when it fails.
    pub async fn put<T: Serialize>(
        &self,
        mut item: StoredItem<T>,
        require_exists: bool,
    ) -> OperationResult<StoredItem<T>> {
        let key = item.key();
        let read = self
            .controller
            .execute(Direction::Read, self.overrides.as_ref(), || {
                self.backend.point_read(&key)
            })
            .await;
        let (attempts, retry_delay) = (read.attempts, read.retry_delay);

        let stored = match read.result {
            Ok(stored) => stored,
            Err(err) => return OperationResult::new(Err(err), attempts, retry_delay),
        };
        if let Some(stored) = stored {
            match record::stamps(self.schema(), &stored) {
                Ok((created_at, updated_at)) => {
                    item.created_at = created_at;
                    item.updated_at = updated_at;
                }
                Err(err) => return OperationResult::new(Err(err), attempts, retry_delay),
            }
        }

        self.write(item, require_exists).await
    }

    /// Stamp `updated_at` past the value `item` carries and write it
    async fn write<T: Serialize>(
        &self,
        mut item: StoredItem<T>,
        require_exists: bool,
    ) -> OperationResult<StoredItem<T>> {
        item.updated_at = helpers::next_update_stamp(item.updated_at);

        let encoded = match record::encode(self.schema(), &item) {
            Ok(encoded) => encoded,
            Err(err) => return OperationResult::new(Err(err), 0, Duration::ZERO),
        };
        let size_kb = encoded.size_kb();

        if size_kb > PAYLOAD_WARN_KB {
            tracing::warn!(
                table = %self.schema().table_name,
                partition_key = %item.partition_key,
                sort_key = %item.sort_key,
                size_kb,
                "Item is close to the 400 KB limit"
            );
        }

        let condition = require_exists.then_some(Condition::Exists);
        let execution = self
            .controller
            .execute(Direction::Write, self.overrides.as_ref(), || {
                self.backend.point_write(encoded.item.clone(), condition)
            })
            .await;

        tracing::debug!(
            table = %self.schema().table_name,
            partition_key = %item.partition_key,
            sort_key = %item.sort_key,
            attempts = execution.attempts,
            success = execution.result.is_ok(),
            "Put item"
        );

        let result = match execution.result {
            Ok(()) => Ok(item),
            Err(Error::PayloadTooLarge { .. }) => Err(Error::PayloadTooLarge { size_kb }),
            Err(err) => Err(err),
        };
        OperationResult::new(result, execution.attempts, execution.retry_delay)
            .with_payload_size(size_kb)
    }

    /// Point lookup; `Ok(None)` when no item has this key
    pub async fn get<T: DeserializeOwned>(
        &self,
        partition_key: &str,
        sort_key: &str,
    ) -> OperationResult<Option<StoredItem<T>>> {
        let key = Key::new(partition_key, sort_key);
        let execution = self
            .controller
            .execute(Direction::Read, self.overrides.as_ref(), || {
                self.backend.point_read(&key)
            })
            .await;

        let result = execution.result.and_then(|raw| {
            raw.map(|item| record::decode(self.schema(), item))
                .transpose()
        });
        OperationResult::new(result, execution.attempts, execution.retry_delay)
    }

    /// Every item of a partition whose sort key begins with `sort_key_prefix`
    ///
    /// Pages are fetched until the backend stops returning a continuation;
    /// callers never see a partial result.
    pub async fn query<T: DeserializeOwned>(
        &self,
        partition_key: &str,
        sort_key_prefix: &str,
        entity_type: Option<&str>,
    ) -> OperationResult<Vec<StoredItem<T>>> {
        self.collect_pages(RangeRequest {
            index: None,
            partition_key: partition_key.to_string(),
            sort_key_prefix: Some(sort_key_prefix.to_string()).filter(|p| !p.is_empty()),
            entity_type: entity_type.map(str::to_string),
            continuation: None,
        })
        .await
    }

    /// Delete an existing item
    ///
    /// Fails with [`Error::NotFound`] when no item has this key.
    pub async fn delete(&self, partition_key: &str, sort_key: &str) -> OperationResult<()> {
        let key = Key::new(partition_key, sort_key);
        let execution = self
            .controller
            .execute(Direction::Write, self.overrides.as_ref(), || {
                self.backend.conditional_delete(&key, Condition::Exists)
            })
            .await;

        let result = execution.result.map_err(|err| match err {
            Error::ConditionFailed { .. } => Error::NotFound {
                partition_key: key.partition_key.clone(),
                sort_key: key.sort_key.clone(),
            },
            other => other,
        });
        OperationResult::new(result, execution.attempts, execution.retry_delay)
    }

    /// Read-modify-write of the payload of an existing item
    ///
    /// `patch` is deep-merged into the stored payload: objects merge key by
    /// key, `null` removes a key and any other value replaces it. The write
    /// requires the item to still exist, so a concurrent delete surfaces as
    /// [`Error::ConditionFailed`]. The stamps come from the stored item.
    pub async fn update<T, P>(
        &self,
        partition_key: &str,
        sort_key: &str,
        patch: &P,
    ) -> OperationResult<StoredItem<T>>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let read = self.get::<serde_json::Value>(partition_key, sort_key).await;
        let (attempts, retry_delay) = (read.attempts, read.retry_delay);

        let current = match read.result {
            Ok(Some(current)) => current,
            Ok(None) => {
                let err = Error::NotFound {
                    partition_key: partition_key.to_string(),
                    sort_key: sort_key.to_string(),
                };
                return OperationResult::new(Err(err), attempts, retry_delay);
            }
            Err(err) => return OperationResult::new(Err(err), attempts, retry_delay),
        };

        let merged = serde_json::to_value(patch).and_then(|patch| {
            let mut attributes = current.attributes.clone();
            helpers::deep_merge(&mut attributes, patch);
            serde_json::from_value::<T>(attributes)
        });
        let next = match merged {
            Ok(attributes) => current.map_attributes(|_| attributes),
            Err(err) => return OperationResult::new(Err(err.into()), attempts, retry_delay),
        };

        let mut written = self.write(next, true).await;
        written.attempts += attempts;
        written.retry_delay += retry_delay;
        written
    }
}
