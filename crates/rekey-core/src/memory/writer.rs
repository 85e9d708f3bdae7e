//! Canonical write path over a [`MemoryStore`]

use super::codec::{Document, JsonCodec};
use super::store::MemoryStore;
use crate::error::WriteError;
use crate::store::{CanonicalWriter, KeyValueStore, RecordCodec, UpsertOptions, UpsertOutcome};
use crate::types::{RecordAddress, TableName};
use async_trait::async_trait;
use std::sync::Arc;

/// Persists a document into the unique-index table and the entity table
///
/// Consistency checks before writing:
/// - the derived key must not be owned by another identity
/// - the stored record at the key must not be newer than the document
///
/// Unforced writes whose payload matches what is stored are skipped.
#[derive(Debug, Clone)]
pub struct MemoryWritePath {
    store: Arc<MemoryStore>,
    codec: JsonCodec,
    unique_index_table: TableName,
    entity_table: TableName,
}

impl MemoryWritePath {
    /// Write path over `store`
    #[must_use]
    pub fn new(
        store: Arc<MemoryStore>,
        codec: JsonCodec,
        unique_index_table: impl Into<TableName>,
        entity_table: impl Into<TableName>,
    ) -> Self {
        Self {
            store,
            codec,
            unique_index_table: unique_index_table.into(),
            entity_table: entity_table.into(),
        }
    }

    /// Table holding one record per identity
    #[must_use]
    pub fn entity_table(&self) -> &TableName {
        &self.entity_table
    }
}

#[async_trait]
impl CanonicalWriter<Document> for MemoryWritePath {
    async fn upsert(
        &self,
        entity: &Document,
        options: UpsertOptions,
    ) -> Result<UpsertOutcome, WriteError> {
        let record = self.codec.encode(entity)?;
        let key = record.unique_key.clone();

        let mut existing = self
            .store
            .query_unique(&self.unique_index_table, &key)
            .await?;
        if existing.len() > 1 {
            return Err(WriteError::AmbiguousUniqueMatch {
                key,
                count: existing.len(),
            });
        }

        let outcome = match existing.pop() {
            None => UpsertOutcome::Created,
            Some(stored) => {
                let current = self.codec.decode(&stored)?;
                if current.id != entity.id {
                    return Err(WriteError::Rejected {
                        key,
                        reason: format!("key is owned by entity {}", current.id),
                    });
                }
                if current.updated_at > entity.updated_at {
                    return Err(WriteError::Rejected {
                        key,
                        reason: format!(
                            "stored record is newer ({} > {})",
                            current.updated_at, entity.updated_at
                        ),
                    });
                }
                if !options.force && stored.payload == record.payload {
                    return Ok(UpsertOutcome::Unchanged);
                }
                UpsertOutcome::Updated
            }
        };

        self.store
            .put_unique_index_record(&self.unique_index_table, &key, record.clone())
            .await?;
        self.store.insert(
            self.entity_table.clone(),
            record.with_address(RecordAddress::hash(entity.id.to_string())),
        );

        Ok(outcome)
    }
}
