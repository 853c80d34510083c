use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{OperationResult, StoredItem, Table};
use crate::backend::RangeRequest;
use crate::error::Error;

impl Table {
    /// Every item projected into `index` under `partition_key`
    ///
    /// Same paging contract as [`Table::query`]. With an entity type and no
    /// sort key prefix this is the cross-partition scan of one entity type.
    pub async fn query_index<T: DeserializeOwned>(
        &self,
        index: &str,
        partition_key: &str,
        sort_key_prefix: Option<&str>,
        entity_type: Option<&str>,
    ) -> OperationResult<Vec<StoredItem<T>>> {
        if self.schema().index(index).is_none() {
            let err = Error::validation(format!(
                "table {} has no index {index}",
                self.schema().table_name
            ));
            return OperationResult::new(Err(err), 0, Duration::ZERO);
        }

        self.collect_pages(RangeRequest {
            index: Some(index.to_string()),
            partition_key: partition_key.to_string(),
            sort_key_prefix: sort_key_prefix.map(str::to_string),
            entity_type: entity_type.map(str::to_string),
            continuation: None,
        })
        .await
    }

    /// First item found through an alternate identity, e.g. a unique email
    pub async fn find_by_index<T: DeserializeOwned>(
        &self,
        index: &str,
        partition_key: &str,
        sort_key_prefix: Option<&str>,
    ) -> OperationResult<Option<StoredItem<T>>> {
        self.query_index(index, partition_key, sort_key_prefix, None)
            .await
            .map(|items| items.into_iter().next())
    }
}
