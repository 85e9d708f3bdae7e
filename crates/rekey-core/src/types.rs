//! Core data model for the migration engine
//!
//! Defines the physical and logical shapes the engine moves between:
//! - Entity identity and the [`MigrationEntity`] contract
//! - Table names, unique-index keys and payloads
//! - Stored records, scan projections and pagination tokens

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical identity of an entity, assigned once at first creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Mint a fresh identity
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a table in the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    /// Create a table name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the raw name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized unique-index key (`p`)
///
/// Two keys are the same key iff their serialized forms are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueKey(String);

impl UniqueKey {
    /// Wrap an already-serialized key
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the serialized form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the serialized form
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for UniqueKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized entity payload (`o`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    /// Wrap an already-serialized payload
    #[inline]
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// Borrow the serialized payload
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Store-internal addressing of a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordAddress {
    /// Primary hash key
    pub hash_key: String,
    /// Optional range (sort) key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_key: Option<String>,
}

impl RecordAddress {
    /// Address by hash key only
    #[inline]
    #[must_use]
    pub fn hash(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key: None,
        }
    }

    /// Address by hash and range key
    #[inline]
    #[must_use]
    pub fn with_range(hash_key: impl Into<String>, range_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            range_key: Some(range_key.into()),
        }
    }
}

/// Physical representation of an entity at rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Unique-index key the record was stored under
    #[serde(rename = "p")]
    pub unique_key: UniqueKey,
    /// Serialized entity
    #[serde(rename = "o")]
    pub payload: Payload,
    /// Addressing, absent when projected out by a scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<RecordAddress>,
}

impl StoredRecord {
    /// Create a record without addressing
    #[inline]
    #[must_use]
    pub fn new(unique_key: UniqueKey, payload: Payload) -> Self {
        Self {
            unique_key,
            payload,
            address: None,
        }
    }

    /// Attach addressing
    #[inline]
    #[must_use]
    pub fn with_address(mut self, address: RecordAddress) -> Self {
        self.address = Some(address);
        self
    }
}

/// Attributes a scan should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Only `p` and `o`, the minimum the migration needs
    #[default]
    KeyAndPayload,
    /// Every attribute, including addressing
    Full,
}

impl Projection {
    /// Apply the projection to a record
    #[must_use]
    pub fn apply(self, record: &StoredRecord) -> StoredRecord {
        match self {
            Self::KeyAndPayload => StoredRecord::new(record.unique_key.clone(), record.payload.clone()),
            Self::Full => record.clone(),
        }
    }
}

/// Opaque pagination token returned by a scan page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wrap a store-issued token
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a paginated scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Records in this page
    pub records: Vec<StoredRecord>,
    /// Token for the next page, `None` on the last page
    pub next: Option<ContinuationToken>,
}

/// Contract the engine needs from a decoded domain object
pub trait MigrationEntity: Clone + Send + Sync + 'static {
    /// Stable logical identity
    fn id(&self) -> EntityId;

    /// Last modification time, used as the recency tie-breaker
    fn updated_at(&self) -> DateTime<Utc>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_is_byte_equality() {
        assert_eq!(UniqueKey::from("a#b"), UniqueKey::new(String::from("a#b")));
        assert_ne!(UniqueKey::from("a#b"), UniqueKey::from("a#B"));
        assert_eq!(UniqueKey::from("x").as_bytes(), b"x");
    }

    #[test]
    fn projection_drops_addressing() {
        let record = StoredRecord::new(UniqueKey::from("k"), Payload::new("{}"))
            .with_address(RecordAddress::with_range("k", "1"));

        let projected = Projection::KeyAndPayload.apply(&record);
        assert!(projected.address.is_none());
        assert_eq!(projected.unique_key, record.unique_key);

        assert_eq!(Projection::Full.apply(&record), record);
    }

    #[test]
    fn stored_record_uses_short_attribute_names() {
        let record = StoredRecord::new(UniqueKey::from("k"), Payload::new("v"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({ "p": "k", "o": "v" }));
    }
}
