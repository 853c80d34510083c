use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

use crate::codec::{self, Encoded, Item, Value};
use crate::config::TableSchema;
use crate::error::Error;
use crate::table::types::{SecondaryIndexKey, StoredItem};

/// Near the 400 KB item limit; writes above this are logged
pub(crate) const PAYLOAD_WARN_KB: f64 = 350.0;

/// Conversion between [`StoredItem`] and the raw stored record
pub(crate) mod record {
    use super::*;

    /// Encode the envelope and payload into one record
    ///
    /// Key attributes are written verbatim; only the rest goes through the codec.
    pub(crate) fn encode<T: Serialize>(
        schema: &TableSchema,
        item: &StoredItem<T>,
    ) -> Result<Encoded, Error> {
        let mut keys = vec![
            (&schema.partition_key, &item.partition_key),
            (&schema.sort_key, &item.sort_key),
            (&schema.entity_type, &item.entity_type),
        ];
        for key in &item.secondary_index_keys {
            let index = schema.index(&key.index).ok_or_else(|| {
                Error::Serialization(format!("item projected into unknown index {}", key.index))
            })?;
            keys.push((&index.partition_key, &key.partition_key));
            keys.push((&index.sort_key, &key.sort_key));
        }

        let mut record = serde_json::Map::new();
        let _ = record.insert(
            schema.attributes.clone(),
            serde_json::to_value(&item.attributes)?,
        );
        let _ = record.insert(
            schema.created_at.clone(),
            codec::timestamp::format(&item.created_at).into(),
        );
        let _ = record.insert(
            schema.updated_at.clone(),
            codec::timestamp::format(&item.updated_at).into(),
        );

        let mut encoded = codec::encode(&serde_json::Value::Object(record))?;
        for (name, value) in keys {
            let _ = encoded
                .item
                .insert(name.clone(), AttributeValue::S(value.clone()));
        }
        Ok(encoded)
    }

    /// `createdAt` and `updatedAt` of a stored record
    pub(crate) fn stamps(
        schema: &TableSchema,
        item: &Item,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), Error> {
        Ok((
            required_timestamp(item, &schema.created_at)?,
            required_timestamp(item, &schema.updated_at)?,
        ))
    }

    /// Decode a record into its envelope and payload
    ///
    /// Key attributes are read verbatim; only the payload goes through the
    /// timestamp heuristic.
    pub(crate) fn decode<T: DeserializeOwned>(
        schema: &TableSchema,
        mut item: Item,
    ) -> Result<StoredItem<T>, Error> {
        let partition_key = required_string(&item, &schema.partition_key)?;
        let sort_key = required_string(&item, &schema.sort_key)?;
        let entity_type = required_string(&item, &schema.entity_type)?;
        let created_at = required_timestamp(&item, &schema.created_at)?;
        let updated_at = required_timestamp(&item, &schema.updated_at)?;

        let secondary_index_keys = schema
            .indexes
            .iter()
            .filter_map(|index| {
                Some(SecondaryIndexKey {
                    index: index.name.clone(),
                    partition_key: string_attr(&item, &index.partition_key)?.to_string(),
                    sort_key: string_attr(&item, &index.sort_key)?.to_string(),
                })
            })
            .collect();

        let attributes = match item.remove(&schema.attributes) {
            Some(payload) => {
                let wrapped = Item::from([(schema.attributes.clone(), payload)]);
                codec::decode(wrapped)?
                    .take(&schema.attributes)
                    .unwrap_or(Value::Map(BTreeMap::new()))
            }
            None => Value::Map(BTreeMap::new()),
        };

        Ok(StoredItem {
            partition_key,
            sort_key,
            entity_type,
            attributes: codec::from_value(attributes)?,
            created_at,
            updated_at,
            secondary_index_keys,
        })
    }

    fn string_attr<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
        match item.get(name) {
            Some(AttributeValue::S(s)) => Some(s),
            _ => None,
        }
    }

    fn required_string(item: &Item, name: &str) -> Result<String, Error> {
        string_attr(item, name)
            .map(str::to_string)
            .ok_or_else(|| Error::Serialization(format!("missing string attribute {name}")))
    }

    fn required_timestamp(item: &Item, name: &str) -> Result<DateTime<Utc>, Error> {
        string_attr(item, name)
            .and_then(codec::timestamp::parse)
            .ok_or_else(|| Error::Serialization(format!("missing or invalid timestamp {name}")))
    }
}

/// Merge `patch` into `target`
///
/// Objects merge key by key at every depth, `null` removes the key and any
/// other value replaces what was there.
pub(crate) fn deep_merge(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    let _ = target.remove(&key);
                } else if let Some(existing) = target.get_mut(&key) {
                    deep_merge(existing, value);
                } else {
                    let _ = target.insert(key, value);
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Next `updated_at` after `previous`: now, or one millisecond later if the
/// clock has not moved past it
pub(crate) fn next_update_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(3);
    if now > previous {
        now
    } else {
        previous + TimeDelta::milliseconds(1)
    }
}
