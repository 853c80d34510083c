//! Item codec
//!
//! Converts domain values to stored items and back. Encoding drops every field
//! whose value is absent (`None`/`null`) instead of storing a null, and renders
//! temporal values as canonical strings. Decoding turns any string that has the
//! exact shape of a timestamp back into a [`Value::Timestamp`].
//!
//! The decode heuristic is not schema-driven: free text that happens to look like
//! a timestamp is decoded as one. Consumers rely on that behavior, so it stays.
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};

use crate::error::Error;

/// Raw stored record
pub type Item = HashMap<String, AttributeValue>;

/// Above this many dropped fields in one encode call a forgotten field is likely
const DROPPED_FIELDS_WARN_THRESHOLD: usize = 2;

/// Dynamically shaped decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null list element
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(serde_json::Number),
    /// Free text
    String(String),
    /// Instant in time
    Timestamp(DateTime<Utc>),
    /// Ordered list
    List(Vec<Value>),
    /// Nested object
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Look up a field of a map value
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Instant, if this is a timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Remove and return a field of a map value
    pub fn take(&mut self, key: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.remove(key),
            _ => None,
        }
    }

    pub(crate) fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => match timestamp::parse(&s) {
                Some(t) => Value::Timestamp(t),
                None => Value::String(s),
            },
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub(crate) fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::Timestamp(t) => serde_json::Value::String(timestamp::format(&t)),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Timestamp(t) => serializer.serialize_str(&timestamp::format(t)),
            Value::List(items) => items.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

/// Output of [`encode`]
#[derive(Debug, Clone)]
pub struct Encoded {
    /// The stored record
    pub item: Item,
    /// Paths of the fields dropped because their value was absent
    pub dropped_fields: Vec<String>,
}

impl Encoded {
    /// Encoded size in bytes
    pub fn size_bytes(&self) -> usize {
        item_size_bytes(&self.item)
    }

    /// Encoded size in KB
    pub fn size_kb(&self) -> f64 {
        self.size_bytes() as f64 / 1024.0
    }
}

/// Encode a domain value into a stored record
///
/// The value must serialize to a map. Absent fields are dropped at every depth;
/// a per-call count of them drives a diagnostic. Every string with the
/// timestamp shape is rewritten in the canonical form, whatever serde
/// representation produced it.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Encoded, Error> {
    let mut json = serde_json::to_value(value)?;

    if !json.is_object() {
        return Err(Error::Serialization(
            "top-level value must serialize to a map".to_string(),
        ));
    }

    let mut dropped_fields = Vec::new();
    normalize(&mut json, "", &mut dropped_fields);
    report_dropped(&dropped_fields);

    let item: Item = serde_dynamo::to_item(json)?;

    Ok(Encoded {
        item,
        dropped_fields,
    })
}

/// Decode a stored record into a [`Value::Map`]
pub fn decode(item: Item) -> Result<Value, Error> {
    let json: serde_json::Value = serde_dynamo::from_item(item)?;
    Ok(Value::from_json(json))
}

/// Convert a domain value into a [`Value`], applying the decode heuristics
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, Error> {
    Ok(Value::from_json(serde_json::to_value(value)?))
}

/// Convert a [`Value`] into a domain value
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    Ok(serde_json::from_value(value.into_json())?)
}

fn normalize(json: &mut serde_json::Value, path: &str, dropped: &mut Vec<String>) {
    match json {
        serde_json::Value::Object(map) => {
            map.retain(|key, value| {
                if value.is_null() {
                    dropped.push(join_path(path, key));
                    false
                } else {
                    true
                }
            });
            for (key, value) in map.iter_mut() {
                normalize(value, &join_path(path, key), dropped);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, value) in items.iter_mut().enumerate() {
                normalize(value, &format!("{path}[{index}]"), dropped);
            }
        }
        serde_json::Value::String(s) => {
            if let Some(t) = timestamp::parse(s) {
                *s = timestamp::format(&t);
            }
        }
        _ => {}
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn report_dropped(dropped: &[String]) {
    if dropped.is_empty() {
        return;
    }

    if dropped.len() > DROPPED_FIELDS_WARN_THRESHOLD {
        tracing::warn!(
            count = dropped.len(),
            fields = ?dropped,
            "Many absent fields dropped while encoding; a field was probably not populated"
        );
    } else {
        tracing::debug!(count = dropped.len(), fields = ?dropped, "Optional fields omitted");
    }
}

/// Size of a stored record, counted the way the store bills it
pub fn item_size_bytes(item: &Item) -> usize {
    item.iter()
        .map(|(name, value)| name.len() + attribute_size(value))
        .sum()
}

fn attribute_size(value: &AttributeValue) -> usize {
    match value {
        AttributeValue::S(s) => s.len(),
        AttributeValue::N(n) => n.len(),
        AttributeValue::B(b) => b.as_ref().len(),
        AttributeValue::Bool(_) | AttributeValue::Null(_) => 1,
        AttributeValue::Ss(values) | AttributeValue::Ns(values) => {
            values.iter().map(String::len).sum()
        }
        AttributeValue::Bs(values) => values.iter().map(|b| b.as_ref().len()).sum(),
        AttributeValue::L(values) => {
            3 + values
                .iter()
                .map(|v| 1 + attribute_size(v))
                .sum::<usize>()
        }
        AttributeValue::M(map) => {
            3 + map
                .iter()
                .map(|(name, v)| 1 + name.len() + attribute_size(v))
                .sum::<usize>()
        }
        _ => 0,
    }
}

/// Canonical timestamp rendering and detection
///
/// Usable as `#[serde(with = "scaling_table::codec::timestamp")]` on
/// `DateTime<Utc>` fields so they encode in the canonical form.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    /// Canonical wire form: `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub fn format(t: &DateTime<Utc>) -> String {
        t.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parse a string that has the strict timestamp shape into an instant
    ///
    /// Returns `None` when the shape does not match or when the string does not
    /// name a valid instant (e.g. February 30th).
    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if !has_timestamp_shape(s) {
            return None;
        }

        let zoned = s.ends_with('Z') || s[19..].contains(['+', '-']);
        if zoned {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        } else {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        }
    }

    /// `YYYY-MM-DDTHH:MM:SS`, optional `.mmm`, optional `Z` or `±HH:MM`
    pub fn has_timestamp_shape(s: &str) -> bool {
        const SHAPE: &[u8; 19] = b"dddd-dd-ddTdd:dd:dd";

        let bytes = s.as_bytes();
        if bytes.len() < SHAPE.len() {
            return false;
        }

        let head_ok = SHAPE.iter().zip(bytes).all(|(&expected, &actual)| {
            if expected == b'd' {
                actual.is_ascii_digit()
            } else {
                actual == expected
            }
        });
        if !head_ok {
            return false;
        }

        let mut rest = &bytes[SHAPE.len()..];
        if let [b'.', millis @ ..] = rest {
            match millis {
                [a, b, c, tail @ ..]
                    if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() =>
                {
                    rest = tail;
                }
                _ => return false,
            }
        }

        match rest {
            [] | [b'Z'] => true,
            [sign, h1, h2, b':', m1, m2] => {
                (*sign == b'+' || *sign == b'-')
                    && [h1, h2, m1, m2].iter().all(|d| d.is_ascii_digit())
            }
            _ => false,
        }
    }

    /// Serialize in the canonical form
    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(t))
    }

    /// Deserialize from any accepted timestamp shape
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Workout {
        name: String,
        #[serde(with = "timestamp")]
        scheduled_for: DateTime<Utc>,
        notes: Option<String>,
        sets: Vec<Set>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Set {
        reps: u32,
        weight: Option<f64>,
    }

    fn workout() -> Workout {
        Workout {
            name: "Leg day".to_string(),
            scheduled_for: Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap(),
            notes: None,
            sets: vec![
                Set {
                    reps: 5,
                    weight: Some(100.0),
                },
                Set {
                    reps: 8,
                    weight: None,
                },
            ],
        }
    }

    #[test]
    fn test_encode_drops_absent_fields() {
        let encoded = encode(&workout()).unwrap();

        assert!(!encoded.item.contains_key("notes"));
        assert_eq!(
            encoded.dropped_fields,
            vec!["notes".to_string(), "sets[1].weight".to_string()]
        );

        let Some(AttributeValue::L(sets)) = encoded.item.get("sets") else {
            panic!("sets should be a list");
        };
        let Some(AttributeValue::M(second)) = sets.get(1) else {
            panic!("set should be a map");
        };
        assert!(!second.contains_key("weight"));
    }

    #[test]
    fn test_encode_renders_canonical_timestamp() {
        let encoded = encode(&workout()).unwrap();
        assert_eq!(
            encoded.item.get("scheduled_for"),
            Some(&AttributeValue::S("2024-03-01T07:30:00.000Z".to_string()))
        );
    }

    #[test]
    fn test_encode_rejects_non_map() {
        let err = encode(&vec![1, 2, 3]).unwrap_err();
        assert!(err.is_serialization_error());
    }

    #[test]
    fn test_decode_parses_timestamps_recursively() {
        let mut inner = HashMap::new();
        let _ = inner.insert(
            "at".to_string(),
            AttributeValue::S("2024-01-02T03:04:05Z".to_string()),
        );
        let mut item = Item::new();
        let _ = item.insert("nested".to_string(), AttributeValue::M(inner));
        let _ = item.insert(
            "history".to_string(),
            AttributeValue::L(vec![AttributeValue::S("2024-01-02T03:04:05.678Z".to_string())]),
        );

        let value = decode(item).unwrap();

        let at = value.get("nested").and_then(|n| n.get("at")).unwrap();
        assert_eq!(
            at.as_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        let Some(Value::List(history)) = value.get("history") else {
            panic!("history should be a list");
        };
        assert!(matches!(history[0], Value::Timestamp(_)));
    }

    #[test]
    fn test_decode_leaves_invalid_instants_as_strings() {
        let mut item = Item::new();
        let _ = item.insert(
            "d".to_string(),
            AttributeValue::S("2024-02-30T00:00:00Z".to_string()),
        );
        let value = decode(item).unwrap();
        assert_eq!(value.get("d").and_then(Value::as_str), Some("2024-02-30T00:00:00Z"));
    }

    #[test]
    fn test_timestamp_shape() {
        assert!(timestamp::has_timestamp_shape("2024-01-01T00:00:00"));
        assert!(timestamp::has_timestamp_shape("2024-01-01T00:00:00Z"));
        assert!(timestamp::has_timestamp_shape("2024-01-01T00:00:00.123Z"));
        assert!(timestamp::has_timestamp_shape("2024-01-01T00:00:00+02:00"));
        assert!(timestamp::has_timestamp_shape("2024-01-01T00:00:00.123-05:30"));

        assert!(!timestamp::has_timestamp_shape("2024-01-01"));
        assert!(!timestamp::has_timestamp_shape("2024-01-01 00:00:00Z"));
        assert!(!timestamp::has_timestamp_shape("2024-01-01T00:00:00.1Z"));
        assert!(!timestamp::has_timestamp_shape("2024-01-01T00:00:00.123456Z"));
        assert!(!timestamp::has_timestamp_shape("2024-01-01T00:00:00Z trailing"));
        assert!(!timestamp::has_timestamp_shape("Meeting at 2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_timestamp_without_zone_is_utc() {
        let parsed = timestamp::parse("2024-06-01T12:00:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());

        let offset = timestamp::parse("2024-06-01T12:00:00+02:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_free_text_shaped_like_a_timestamp_is_decoded_as_one() {
        // A user typed a timestamp into a free-text field. The heuristic cannot
        // tell it apart from a real temporal field.
        let mut item = Item::new();
        let _ = item.insert(
            "comment".to_string(),
            AttributeValue::S("2024-05-05T10:00:00+01:00".to_string()),
        );

        let value = decode(item).unwrap();
        assert!(matches!(value.get("comment"), Some(Value::Timestamp(_))));

        // Re-encoding normalizes the user's text to the canonical form.
        let reencoded = encode(&value).unwrap();
        assert_eq!(
            reencoded.item.get("comment"),
            Some(&AttributeValue::S("2024-05-05T09:00:00.000Z".to_string()))
        );
    }

    #[test]
    fn test_encode_decode_encode_is_stable() {
        let first = encode(&workout()).unwrap();
        let decoded = decode(first.item.clone()).unwrap();
        let second = encode(&decoded).unwrap();

        assert_eq!(first.item, second.item);
        assert!(second.dropped_fields.is_empty());
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reminder {
        label: String,
        due: DateTime<Utc>,
        history: Vec<DateTime<Utc>>,
    }

    #[test]
    fn test_plain_datetime_fields_encode_canonically() {
        let due = Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap();
        let reminder = Reminder {
            label: "Stretch".to_string(),
            due,
            history: vec![due + chrono::TimeDelta::milliseconds(250)],
        };

        let first = encode(&reminder).unwrap();
        assert_eq!(
            first.item.get("due"),
            Some(&AttributeValue::S("2024-03-01T07:30:00.000Z".to_string()))
        );
        assert_eq!(
            first.item.get("history"),
            Some(&AttributeValue::L(vec![AttributeValue::S(
                "2024-03-01T07:30:00.250Z".to_string()
            )]))
        );

        let second = encode(&decode(first.item.clone()).unwrap()).unwrap();
        assert_eq!(first.item, second.item);

        let back: Reminder = from_value(decode(first.item).unwrap()).unwrap();
        assert_eq!(back, reminder);
    }

    #[test]
    fn test_typed_round_trip() {
        let original = workout();
        let decoded = decode(encode(&original).unwrap().item).unwrap();
        let back: Workout = from_value(decoded).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_item_size_counts_names_and_values() {
        let mut item = Item::new();
        let _ = item.insert("pk".to_string(), AttributeValue::S("USER#1".to_string()));
        let _ = item.insert("n".to_string(), AttributeValue::N("42".to_string()));
        let _ = item.insert("ok".to_string(), AttributeValue::Bool(true));

        assert_eq!(item_size_bytes(&item), (2 + 6) + (1 + 2) + (2 + 1));
    }
}
