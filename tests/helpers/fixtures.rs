/// Common test fixtures and data structures
///
/// Domain payloads stored under the single-table envelope.
use super::{Deserialize, Serialize, StoredItem};
use chrono::{DateTime, TimeZone, Utc};

/// Postal address nested inside a profile
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Address {
    pub city: String,
    pub country: String,
}

/// User profile with optional and nested fields
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub nickname: Option<String>,
    pub address: Address,
    pub tags: Vec<String>,
}

/// Order placed by a user
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Order {
    pub total_cents: u64,
    #[serde(with = "scaling_table::codec::timestamp")]
    pub placed_at: DateTime<Utc>,
    pub note: Option<String>,
}

pub fn profile(name: &str) -> Profile {
    Profile {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        nickname: None,
        address: Address {
            city: "Lisbon".to_string(),
            country: "PT".to_string(),
        },
        tags: vec!["beta".to_string()],
    }
}

/// Profile stored at `(pk, "PROFILE")`, reachable by email through `gsi1`
pub fn profile_item(pk: &str, name: &str) -> StoredItem<Profile> {
    let profile = profile(name);
    let email_key = format!("EMAIL#{}", profile.email);
    StoredItem::new(pk, "PROFILE", "User", profile).with_index_key("gsi1", email_key, pk)
}

/// Order `n` of `pk`, listed in the cross-partition order scan through `gsi2`
pub fn order_item(pk: &str, n: u32) -> StoredItem<Order> {
    let placed_at = Utc
        .with_ymd_and_hms(2024, 1, 1 + n % 28, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let sort_key = format!("ORDER#{n:04}");
    let order = Order {
        total_cents: 1_000 + u64::from(n),
        placed_at,
        note: None,
    };
    StoredItem::new(pk, sort_key.clone(), "Order", order).with_index_key(
        "gsi2",
        "ENTITY#Order",
        format!("{pk}#{sort_key}"),
    )
}
