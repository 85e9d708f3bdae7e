//! JSON document codec with a configurable unique-key schema

use crate::error::CodecError;
use crate::store::RecordCodec;
use crate::types::{EntityId, MigrationEntity, Payload, StoredRecord, UniqueKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schemaless entity: identity, recency and free-form attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Logical identity
    pub id: EntityId,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Attribute values
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Document {
    /// New document with a fresh identity
    #[must_use]
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::new(),
            updated_at,
            attributes: Map::new(),
        }
    }

    /// With a fixed identity
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    /// With an attribute value
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// With a new modification time
    #[must_use]
    pub fn touched(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    /// Attribute value, if present
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

impl MigrationEntity for Document {
    fn id(&self) -> EntityId {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// How natural-key values are serialized into a unique key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyFormat {
    /// Values joined by a separator; strings are written raw
    Joined {
        /// Separator between values
        separator: String,
    },
    /// Values as a JSON array
    Json,
}

impl Default for KeyFormat {
    fn default() -> Self {
        Self::Joined {
            separator: "#".to_string(),
        }
    }
}

/// Natural-key definition: which attributes, in which order, in which format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    /// Attributes forming the natural key
    pub attributes: Vec<String>,
    /// Serialization format
    #[serde(default)]
    pub format: KeyFormat,
    /// Namespace prefix prepended to every key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl KeySchema {
    /// Schema over `attributes` with the default joined format
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
            format: KeyFormat::default(),
            prefix: None,
        }
    }

    /// With serialization format
    #[must_use]
    pub fn with_format(mut self, format: KeyFormat) -> Self {
        self.format = format;
        self
    }

    /// With namespace prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Derive the key for `document`
    ///
    /// # Errors
    /// Returns `CodecError::MissingKeyAttribute` for absent or null attributes.
    pub fn derive(&self, document: &Document) -> Result<UniqueKey, CodecError> {
        let values = self
            .attributes
            .iter()
            .map(|name| match document.attribute(name) {
                Some(value) if !value.is_null() => Ok(value),
                _ => Err(CodecError::MissingKeyAttribute {
                    entity: document.id,
                    attribute: name.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let body = match &self.format {
            KeyFormat::Joined { separator } => values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(separator),
            KeyFormat::Json => {
                serde_json::to_string(&values).map_err(|e| CodecError::Encode(e.to_string()))?
            }
        };

        Ok(match &self.prefix {
            Some(prefix) => UniqueKey::new(format!("{prefix}{body}")),
            None => UniqueKey::new(body),
        })
    }
}

/// Codec storing [`Document`]s as JSON payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonCodec {
    schema: KeySchema,
}

impl JsonCodec {
    /// Codec deriving keys with `schema`
    #[must_use]
    pub fn new(schema: KeySchema) -> Self {
        Self { schema }
    }

    /// Current key schema
    #[must_use]
    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }
}

impl RecordCodec for JsonCodec {
    type Entity = Document;

    fn decode(&self, record: &StoredRecord) -> Result<Document, CodecError> {
        serde_json::from_str(record.payload.as_str()).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, entity: &Document) -> Result<StoredRecord, CodecError> {
        let key = self.unique_key(entity)?;
        let payload =
            serde_json::to_string(entity).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(StoredRecord::new(key, Payload::new(payload)))
    }

    fn unique_key(&self, entity: &Document) -> Result<UniqueKey, CodecError> {
        self.schema.derive(entity)
    }
}
