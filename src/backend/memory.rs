//! In-memory backend for tests
//!
//! Behaves like the real store where the access layer depends on it: pages are
//! cut before the entity filter is applied, writes over 400 KB are rejected and
//! capacity changes report `Updating` for a configurable number of polls.
//! Failures can be scripted per operation.
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    Condition, Key, Page, ProvisionedCapacity, RangeRequest, Resource, ResourceCapacity,
    ResourceStatus, TableBackend,
};
use crate::codec::{self, Item};
use crate::config::TableSchema;
use crate::error::Error;

/// Largest item the store accepts
pub const MAX_ITEM_SIZE_BYTES: usize = 400 * 1024;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Backend operation, used to script failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`TableBackend::point_write`]
    PointWrite,
    /// [`TableBackend::point_read`]
    PointRead,
    /// [`TableBackend::range_query`]
    RangeQuery,
    /// [`TableBackend::conditional_delete`]
    ConditionalDelete,
    /// [`TableBackend::describe_capacity`]
    DescribeCapacity,
    /// [`TableBackend::update_capacity`]
    UpdateCapacity,
}

/// A capacity change requested through [`TableBackend::update_capacity`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityUpdate {
    /// Changed resource
    pub resource: Resource,
    /// Requested capacity
    pub capacity: ProvisionedCapacity,
}

#[derive(Debug, Default)]
struct Faults {
    scripted: VecDeque<Error>,
    persistent: Option<Error>,
}

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<Key, Item>,
    capacities: HashMap<Resource, ProvisionedCapacity>,
    updating_polls: HashMap<Resource, u32>,
    capacity_updates: Vec<CapacityUpdate>,
    faults: HashMap<Operation, Faults>,
    calls: HashMap<Operation, usize>,
    mutations: usize,
}

impl State {
    /// Count the call and surface the next scripted failure, if any
    fn enter(&mut self, operation: Operation) -> Result<(), Error> {
        *self.calls.entry(operation).or_default() += 1;

        if let Some(faults) = self.faults.get_mut(&operation) {
            if let Some(err) = faults.scripted.pop_front() {
                return Err(err);
            }
            if let Some(err) = &faults.persistent {
                return Err(err.clone());
            }
        }
        Ok(())
    }
}

/// [`TableBackend`] keeping items in process memory
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    schema: TableSchema,
    initial_capacity: ProvisionedCapacity,
    page_size: usize,
    activation_polls: u32,
    state: Arc<RwLock<State>>,
}

impl InMemoryBackend {
    /// Empty table with 5/5 capacity on every resource
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            initial_capacity: ProvisionedCapacity::new(5, 5),
            page_size: DEFAULT_PAGE_SIZE,
            activation_polls: 0,
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Capacity every resource starts with
    pub fn with_capacity(mut self, capacity: ProvisionedCapacity) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Maximum number of items examined per range query page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of status polls that report `Updating` after each capacity change
    pub fn with_activation_polls(mut self, polls: u32) -> Self {
        self.activation_polls = polls;
        self
    }

    /// Fail the next calls of `operation` with `errors`, in order
    pub async fn fail_next(&self, operation: Operation, errors: impl IntoIterator<Item = Error>) {
        let mut state = self.state.write().await;
        state
            .faults
            .entry(operation)
            .or_default()
            .scripted
            .extend(errors);
    }

    /// Fail every call of `operation` with `error` once scripted failures run out
    pub async fn fail_always(&self, operation: Operation, error: Error) {
        let mut state = self.state.write().await;
        state.faults.entry(operation).or_default().persistent = Some(error);
    }

    /// Remove every scripted failure
    pub async fn clear_faults(&self) {
        self.state.write().await.faults.clear();
    }

    /// Change capacity out of band, as an operator would
    pub async fn set_capacity(&self, resource: Resource, capacity: ProvisionedCapacity) {
        let _ = self
            .state
            .write()
            .await
            .capacities
            .insert(resource, capacity);
    }

    /// Every capacity change requested so far
    pub async fn capacity_updates(&self) -> Vec<CapacityUpdate> {
        self.state.read().await.capacity_updates.clone()
    }

    /// Number of calls made to `operation`, including failed ones
    pub async fn calls(&self, operation: Operation) -> usize {
        self.state
            .read()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    /// Number of successful writes and deletes
    pub async fn mutations(&self) -> usize {
        self.state.read().await.mutations
    }

    /// Number of stored items
    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Whether no item is stored
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    /// Stored record, bypassing fault scripting and call counting
    pub async fn raw_item(&self, key: &Key) -> Option<Item> {
        self.state.read().await.items.get(key).cloned()
    }

    /// Store a record as-is, bypassing fault scripting and call counting
    pub async fn insert_raw(&self, item: Item) -> Result<(), Error> {
        let key = self.key_of(&item)?;
        let _ = self.state.write().await.items.insert(key, item);
        Ok(())
    }

    fn key_of(&self, item: &Item) -> Result<Key, Error> {
        match (
            string_attr(item, &self.schema.partition_key),
            string_attr(item, &self.schema.sort_key),
        ) {
            (Some(pk), Some(sk)) => Ok(Key::new(pk, sk)),
            _ => Err(Error::validation(
                "One of the required keys was not given a value",
            )),
        }
    }

    fn check_resource(&self, resource: &Resource) -> Result<(), Error> {
        match resource {
            Resource::Index(name) if self.schema.index(name).is_none() => Err(
                Error::validation(format!("The table does not have the specified index: {name}")),
            ),
            _ => Ok(()),
        }
    }

    /// Sort position of an item within a query, `None` when the item is not in the index
    fn position(&self, item: &Item, sort_field: &str) -> Option<(String, String, String)> {
        Some((
            string_attr(item, sort_field)?.to_string(),
            string_attr(item, &self.schema.partition_key)?.to_string(),
            string_attr(item, &self.schema.sort_key)?.to_string(),
        ))
    }

    /// Key attributes of `item` that a query over `fields` needs to resume after it
    fn continuation_of(&self, item: &Item, fields: [&str; 2]) -> Item {
        [
            self.schema.partition_key.as_str(),
            self.schema.sort_key.as_str(),
            fields[0],
            fields[1],
        ]
        .into_iter()
        .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
    }
}

fn string_attr<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    match item.get(name) {
        Some(AttributeValue::S(s)) => Some(s),
        _ => None,
    }
}

fn condition_failed() -> Error {
    Error::ConditionFailed {
        message: "The conditional request failed".to_string(),
    }
}

#[async_trait]
impl TableBackend for InMemoryBackend {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn point_write(&self, item: Item, condition: Option<Condition>) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.enter(Operation::PointWrite)?;

        let size = codec::item_size_bytes(&item);
        if size > MAX_ITEM_SIZE_BYTES {
            return Err(Error::PayloadTooLarge {
                size_kb: size as f64 / 1024.0,
            });
        }

        let key = self.key_of(&item)?;
        if condition == Some(Condition::Exists) && !state.items.contains_key(&key) {
            return Err(condition_failed());
        }

        let _ = state.items.insert(key, item);
        state.mutations += 1;
        Ok(())
    }

    async fn point_read(&self, key: &Key) -> Result<Option<Item>, Error> {
        let mut state = self.state.write().await;
        state.enter(Operation::PointRead)?;
        Ok(state.items.get(key).cloned())
    }

    async fn range_query(&self, request: &RangeRequest) -> Result<Page, Error> {
        let mut state = self.state.write().await;
        state.enter(Operation::RangeQuery)?;

        let fields = match &request.index {
            Some(name) => {
                let index = self.schema.index(name).ok_or_else(|| {
                    Error::validation(format!(
                        "The table does not have the specified index: {name}"
                    ))
                })?;
                [index.partition_key.as_str(), index.sort_key.as_str()]
            }
            None => [
                self.schema.partition_key.as_str(),
                self.schema.sort_key.as_str(),
            ],
        };
        let [partition_field, sort_field] = fields;

        let start_after = request
            .continuation
            .as_ref()
            .and_then(|token| self.position(token, sort_field));

        let mut matching: Vec<_> = state
            .items
            .values()
            .filter(|item| {
                string_attr(item, partition_field) == Some(request.partition_key.as_str())
            })
            .filter(|item| match (&request.sort_key_prefix, string_attr(item, sort_field)) {
                (Some(prefix), Some(sort)) => sort.starts_with(prefix.as_str()),
                (None, Some(_)) => true,
                (_, None) => false,
            })
            .filter_map(|item| Some((self.position(item, sort_field)?, item)))
            .filter(|(position, _)| start_after.as_ref().is_none_or(|start| position > start))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        let has_more = matching.len() > self.page_size;
        matching.truncate(self.page_size);

        let continuation = if has_more {
            matching
                .last()
                .map(|(_, item)| self.continuation_of(item, fields))
        } else {
            None
        };

        // The entity filter runs after the page is cut, so a page can come back short
        let items = matching
            .into_iter()
            .map(|(_, item)| item)
            .filter(|item| match &request.entity_type {
                Some(entity_type) => {
                    string_attr(item, &self.schema.entity_type) == Some(entity_type.as_str())
                }
                None => true,
            })
            .cloned()
            .collect();

        Ok(Page {
            items,
            continuation,
        })
    }

    async fn conditional_delete(&self, key: &Key, condition: Condition) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.enter(Operation::ConditionalDelete)?;

        let Condition::Exists = condition;
        if state.items.remove(key).is_none() {
            return Err(condition_failed());
        }
        state.mutations += 1;
        Ok(())
    }

    async fn describe_capacity(&self, resource: &Resource) -> Result<ResourceCapacity, Error> {
        let mut state = self.state.write().await;
        state.enter(Operation::DescribeCapacity)?;
        self.check_resource(resource)?;

        let capacity = state
            .capacities
            .get(resource)
            .copied()
            .unwrap_or(self.initial_capacity);

        let status = match state.updating_polls.get_mut(resource) {
            Some(left) if *left > 0 => {
                *left -= 1;
                ResourceStatus::Updating
            }
            _ => ResourceStatus::Active,
        };

        Ok(ResourceCapacity {
            resource: resource.clone(),
            capacity,
            status,
        })
    }

    async fn update_capacity(
        &self,
        resource: &Resource,
        capacity: ProvisionedCapacity,
    ) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.enter(Operation::UpdateCapacity)?;
        self.check_resource(resource)?;

        let _ = state.capacities.insert(resource.clone(), capacity);
        let _ = state
            .updating_polls
            .insert(resource.clone(), self.activation_polls);
        state.capacity_updates.push(CapacityUpdate {
            resource: resource.clone(),
            capacity,
        });
        Ok(())
    }
}
