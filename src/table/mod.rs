use std::sync::Arc;
use std::time::Duration;

use crate::backend::{RangeRequest, ResourceCapacity, TableBackend};
use crate::config::{ScalingConfig, ScalingOverrides, TableSchema};
use crate::error::Error;
use crate::throughput::{Direction, ThroughputController};

mod gsi;
mod helpers;
mod operations;
mod types;

pub use types::{OperationReport, OperationResult, SecondaryIndexKey, StoredItem};

/// Generic access layer over a single table
///
/// Every backend call goes through the [`ThroughputController`]. Cloning is
/// cheap; clones share the backend.
#[derive(Debug, Clone)]
pub struct Table {
    backend: Arc<dyn TableBackend>,
    controller: ThroughputController,
    overrides: Option<ScalingOverrides>,
}

impl Table {
    /// Create a table handle over `backend`
    pub fn new(backend: Arc<dyn TableBackend>, config: ScalingConfig) -> Self {
        let controller = ThroughputController::new(Arc::clone(&backend), config);
        Self {
            backend,
            controller,
            overrides: None,
        }
    }

    /// Handle whose calls apply `overrides` over the process configuration
    pub fn with_overrides(&self, overrides: ScalingOverrides) -> Self {
        Self {
            overrides: Some(overrides),
            ..self.clone()
        }
    }

    /// Physical layout of the table
    pub fn schema(&self) -> &TableSchema {
        self.backend.schema()
    }

    /// The controller wrapping every call
    pub fn controller(&self) -> &ThroughputController {
        &self.controller
    }

    /// Current capacity and status of the table and every index
    pub async fn capacity(&self) -> Result<Vec<ResourceCapacity>, Error> {
        let mut states = Vec::new();
        for resource in self.backend.resources() {
            states.push(self.backend.describe_capacity(&resource).await?);
        }
        Ok(states)
    }

    /// Fetch every page of `request`, each page under the controller
    async fn collect_pages<T: serde::de::DeserializeOwned>(
        &self,
        mut request: RangeRequest,
    ) -> OperationResult<Vec<StoredItem<T>>> {
        let mut items = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut attempts = 0;
        let mut retry_delay = Duration::ZERO;
        let mut pages = 0;

        loop {
            let execution = self
                .controller
                .execute(Direction::Read, self.overrides.as_ref(), || {
                    self.backend.range_query(&request)
                })
                .await;
            attempts += execution.attempts;
            retry_delay += execution.retry_delay;

            let page = match execution.result {
                Ok(page) => page,
                Err(err) => return OperationResult::new(Err(err), attempts, retry_delay),
            };
            pages += 1;

            for raw in page.items {
                let item: StoredItem<T> = match helpers::record::decode(self.schema(), raw) {
                    Ok(item) => item,
                    Err(err) => return OperationResult::new(Err(err), attempts, retry_delay),
                };
                if seen.insert(item.key()) {
                    items.push(item);
                }
            }

            match page.continuation {
                Some(token) => request.continuation = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            table = %self.schema().table_name,
            index = request.index.as_deref().unwrap_or("-"),
            partition_key = %request.partition_key,
            pages,
            items = items.len(),
            "Query complete"
        );
        OperationResult::new(Ok(items), attempts, retry_delay)
    }
}
