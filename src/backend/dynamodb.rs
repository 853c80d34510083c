use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::{
    Client,
    config::http::HttpResponse,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::RequestId,
    types::{
        AttributeValue, GlobalSecondaryIndexUpdate, IndexStatus, ProvisionedThroughput,
        ProvisionedThroughputDescription, Select, TableStatus, UpdateGlobalSecondaryIndexAction,
    },
};
use aws_types::sdk_config::{RetryConfig, TimeoutConfig};
use std::time::Duration;

use super::{
    Condition, Key, Page, ProvisionedCapacity, RangeRequest, Resource, ResourceCapacity,
    ResourceStatus, TableBackend,
};
use crate::codec::{self, Item};
use crate::config::TableSchema;
use crate::error::Error;

/// Backend error codes meaning provisioned throughput was exceeded
const CAPACITY_ERROR_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
];

const CONDITION_ERROR_CODE: &str = "ConditionalCheckFailedException";

/// [`TableBackend`] over the DynamoDB API
#[derive(Debug, Clone)]
pub struct DynamoDbBackend {
    client: Client,
    schema: TableSchema,
}

impl DynamoDbBackend {
    /// Wrap an existing client
    pub fn new(client: Client, schema: TableSchema) -> Self {
        Self { client, schema }
    }

    /// Build a client from the ambient AWS configuration
    ///
    /// See [`sdk_config_defaults`] for the client settings.
    pub async fn from_env(schema: TableSchema) -> Self {
        let config = sdk_config_defaults().await;
        Self::new(Client::new(&config), schema)
    }

    /// The underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn key_item(&self, key: &Key) -> Item {
        Item::from([
            (
                self.schema.partition_key.clone(),
                AttributeValue::S(key.partition_key.clone()),
            ),
            (
                self.schema.sort_key.clone(),
                AttributeValue::S(key.sort_key.clone()),
            ),
        ])
    }
}

/// Load AWS configuration with the defaults this crate expects
///
/// It configures:
/// - SDK-level retries disabled; throttling is retried by the throughput controller
/// - Connect timeout: 3 seconds
/// - Read timeout: 20 seconds
/// - Operation timeout: 60 seconds
/// - LocalStack support via AWS_PROFILE=localstack
pub async fn sdk_config_defaults() -> SdkConfig {
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_secs(20))
        .operation_timeout(Duration::from_secs(60))
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(RetryConfig::disabled())
        .timeout_config(timeout_config);

    if std::env::var("AWS_PROFILE").unwrap_or_default() == "localstack" {
        loader = loader.endpoint_url("http://127.0.0.1:4566");
    }

    loader.load().await
}

/// Key condition and filter expression builder for range queries
struct QueryExpression {
    key_condition: String,
    filter: Option<String>,
    names: std::collections::HashMap<String, String>,
    values: Item,
}

impl QueryExpression {
    fn new() -> Self {
        Self {
            key_condition: String::new(),
            filter: None,
            names: Default::default(),
            values: Item::new(),
        }
    }

    fn with_partition_key(mut self, field: &str, value: &str) -> Self {
        self.key_condition = "#hash_key = :hash_value".to_string();
        let _ = self.names.insert("#hash_key".to_string(), field.to_string());
        let _ = self
            .values
            .insert(":hash_value".to_string(), AttributeValue::S(value.to_string()));
        self
    }

    fn with_sort_key_prefix(mut self, field: &str, prefix: &str) -> Self {
        self.key_condition
            .push_str(" and begins_with(#range_key, :range_prefix)");
        let _ = self.names.insert("#range_key".to_string(), field.to_string());
        let _ = self
            .values
            .insert(":range_prefix".to_string(), AttributeValue::S(prefix.to_string()));
        self
    }

    fn with_entity_type(mut self, field: &str, entity_type: &str) -> Self {
        self.filter = Some("#entity_type = :entity_type".to_string());
        let _ = self
            .names
            .insert("#entity_type".to_string(), field.to_string());
        let _ = self.values.insert(
            ":entity_type".to_string(),
            AttributeValue::S(entity_type.to_string()),
        );
        self
    }
}

/// Classify an SDK failure into the crate error taxonomy
fn classify<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    match code.as_deref() {
        Some(c) if CAPACITY_ERROR_CODES.contains(&c) => Error::CapacityExceeded { message },
        Some(CONDITION_ERROR_CODE) => Error::ConditionFailed { message },
        // The real size is only known to the caller, which fills it in
        Some("ValidationException") if message.contains("size") => {
            Error::PayloadTooLarge { size_kb: 0.0 }
        }
        _ => Error::Transport {
            status: err.raw_response().map(|r| r.status().as_u16()),
            request_id: err.request_id().map(str::to_string),
            message,
            code,
        },
    }
}

fn capacity_of(throughput: Option<&ProvisionedThroughputDescription>) -> ProvisionedCapacity {
    ProvisionedCapacity {
        read: throughput
            .and_then(ProvisionedThroughputDescription::read_capacity_units)
            .unwrap_or_default(),
        write: throughput
            .and_then(ProvisionedThroughputDescription::write_capacity_units)
            .unwrap_or_default(),
    }
}

fn table_status(status: Option<&TableStatus>) -> ResourceStatus {
    match status {
        Some(TableStatus::Active) => ResourceStatus::Active,
        Some(TableStatus::Updating) => ResourceStatus::Updating,
        Some(other) => ResourceStatus::Other(other.as_str().to_string()),
        None => ResourceStatus::Other("UNKNOWN".to_string()),
    }
}

fn index_status(status: Option<&IndexStatus>) -> ResourceStatus {
    match status {
        Some(IndexStatus::Active) => ResourceStatus::Active,
        Some(IndexStatus::Updating) => ResourceStatus::Updating,
        Some(other) => ResourceStatus::Other(other.as_str().to_string()),
        None => ResourceStatus::Other("UNKNOWN".to_string()),
    }
}

fn throughput(capacity: ProvisionedCapacity) -> Result<ProvisionedThroughput, Error> {
    ProvisionedThroughput::builder()
        .read_capacity_units(capacity.read)
        .write_capacity_units(capacity.write)
        .build()
        .map_err(|e| Error::transport(e.to_string()))
}

#[async_trait]
impl TableBackend for DynamoDbBackend {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn point_write(&self, item: Item, condition: Option<Condition>) -> Result<(), Error> {
        let size_kb = codec::item_size_bytes(&item) as f64 / 1024.0;
        let mut request = self
            .client
            .put_item()
            .table_name(&self.schema.table_name)
            .set_item(Some(item));

        if let Some(Condition::Exists) = condition {
            request = request
                .condition_expression("attribute_exists(#pk)")
                .expression_attribute_names("#pk", &self.schema.partition_key);
        }

        match request.send().await.map_err(classify) {
            Err(Error::PayloadTooLarge { .. }) => Err(Error::PayloadTooLarge { size_kb }),
            other => other.map(|_| ()),
        }
    }

    async fn point_read(&self, key: &Key) -> Result<Option<Item>, Error> {
        let output = self
            .client
            .get_item()
            .table_name(&self.schema.table_name)
            .set_key(Some(self.key_item(key)))
            .send()
            .await
            .map_err(classify)?;

        Ok(output.item)
    }

    async fn range_query(&self, request: &RangeRequest) -> Result<Page, Error> {
        let (partition_field, sort_field) = match &request.index {
            Some(name) => {
                let index = self
                    .schema
                    .index(name)
                    .ok_or_else(|| Error::validation(format!("unknown index {name}")))?;
                (index.partition_key.as_str(), index.sort_key.as_str())
            }
            None => (
                self.schema.partition_key.as_str(),
                self.schema.sort_key.as_str(),
            ),
        };

        let mut expression =
            QueryExpression::new().with_partition_key(partition_field, &request.partition_key);
        if let Some(prefix) = &request.sort_key_prefix {
            expression = expression.with_sort_key_prefix(sort_field, prefix);
        }
        if let Some(entity_type) = &request.entity_type {
            expression = expression.with_entity_type(&self.schema.entity_type, entity_type);
        }

        // Secondary indexes only return the attributes projected onto them
        let select = if request.index.is_some() {
            Select::AllProjectedAttributes
        } else {
            Select::AllAttributes
        };

        let output = self
            .client
            .query()
            .table_name(&self.schema.table_name)
            .set_index_name(request.index.clone())
            .select(select)
            .key_condition_expression(expression.key_condition)
            .set_filter_expression(expression.filter)
            .set_expression_attribute_names(Some(expression.names))
            .set_expression_attribute_values(Some(expression.values))
            .set_exclusive_start_key(request.continuation.clone())
            .send()
            .await
            .map_err(classify)?;

        Ok(Page {
            items: output.items.unwrap_or_default(),
            continuation: output.last_evaluated_key.filter(|key| !key.is_empty()),
        })
    }

    async fn conditional_delete(&self, key: &Key, condition: Condition) -> Result<(), Error> {
        let Condition::Exists = condition;

        let _ = self
            .client
            .delete_item()
            .table_name(&self.schema.table_name)
            .set_key(Some(self.key_item(key)))
            .condition_expression("attribute_exists(#pk)")
            .expression_attribute_names("#pk", &self.schema.partition_key)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn describe_capacity(&self, resource: &Resource) -> Result<ResourceCapacity, Error> {
        let output = self
            .client
            .describe_table()
            .table_name(&self.schema.table_name)
            .send()
            .await
            .map_err(classify)?;

        let table = output
            .table()
            .ok_or_else(|| Error::transport("describe table returned no description"))?;

        let (capacity, status) = match resource {
            Resource::Table => (
                capacity_of(table.provisioned_throughput()),
                table_status(table.table_status()),
            ),
            Resource::Index(name) => {
                let index = table
                    .global_secondary_indexes()
                    .iter()
                    .find(|gsi| gsi.index_name() == Some(name.as_str()))
                    .ok_or_else(|| Error::transport(format!("index {name} not found")))?;
                (
                    capacity_of(index.provisioned_throughput()),
                    index_status(index.index_status()),
                )
            }
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
        let request = self
            .client
            .update_table()
            .table_name(&self.schema.table_name);

        let request = match resource {
            Resource::Table => request.provisioned_throughput(throughput(capacity)?),
            Resource::Index(name) => {
                let action = UpdateGlobalSecondaryIndexAction::builder()
                    .index_name(name)
                    .provisioned_throughput(throughput(capacity)?)
                    .build()
                    .map_err(|e| Error::transport(e.to_string()))?;
                request.global_secondary_index_updates(
                    GlobalSecondaryIndexUpdate::builder().update(action).build(),
                )
            }
        };

        let _ = request.send().await.map_err(classify)?;
        Ok(())
    }
}
