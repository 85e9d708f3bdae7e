//! Contracts for the collaborators the engine drives
//!
//! The engine never talks to a concrete store. It consumes:
//! - [`KeyValueStore`]: paginated scans, unique-key lookups, direct puts
//! - [`RecordCodec`]: stored representation <-> entity, key derivation
//! - [`CanonicalWriter`]: the multi-index upsert regular traffic uses

use crate::error::{CodecError, StoreError, WriteError};
use crate::types::{
    ContinuationToken, MigrationEntity, Projection, ScanPage, StoredRecord, TableName, UniqueKey,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Low-level key-value store client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch one page of a full-table scan
    async fn scan(
        &self,
        table: &TableName,
        projection: Projection,
        continuation: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError>;

    /// Every record stored under a unique-index key
    ///
    /// A healthy index returns zero or one record.
    async fn query_unique(
        &self,
        table: &TableName,
        key: &UniqueKey,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Unconditional put into a unique-index table
    async fn put_unique_index_record(
        &self,
        table: &TableName,
        key: &UniqueKey,
        record: StoredRecord,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn scan(
        &self,
        table: &TableName,
        projection: Projection,
        continuation: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        (**self).scan(table, projection, continuation).await
    }

    async fn query_unique(
        &self,
        table: &TableName,
        key: &UniqueKey,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        (**self).query_unique(table, key).await
    }

    async fn put_unique_index_record(
        &self,
        table: &TableName,
        key: &UniqueKey,
        record: StoredRecord,
    ) -> Result<(), StoreError> {
        (**self).put_unique_index_record(table, key, record).await
    }
}

/// Bidirectional mapping between stored records and entities
pub trait RecordCodec: Send + Sync {
    /// Domain entity produced by this codec
    type Entity: MigrationEntity;

    /// Decode a stored payload
    ///
    /// # Errors
    /// Returns `CodecError::Decode` when the payload is malformed.
    fn decode(&self, record: &StoredRecord) -> Result<Self::Entity, CodecError>;

    /// Encode an entity under the key the current schema derives for it
    ///
    /// # Errors
    /// Returns `CodecError` when the entity cannot be serialized or keyed.
    fn encode(&self, entity: &Self::Entity) -> Result<StoredRecord, CodecError>;

    /// Derive the current schema's unique-index key
    ///
    /// # Errors
    /// Returns `CodecError::MissingKeyAttribute` when a natural-key attribute is absent.
    fn unique_key(&self, entity: &Self::Entity) -> Result<UniqueKey, CodecError>;
}

/// Flags for the canonical write path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Bypass the "no changes detected" short-circuit
    pub force: bool,
}

impl UpsertOptions {
    /// Options with `force` set
    #[inline]
    #[must_use]
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// What the canonical write path did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed at the entity's key
    Created,
    /// An existing record was replaced
    Updated,
    /// Nothing changed and the write was skipped
    Unchanged,
}

/// The write path regular traffic uses to persist an entity across all of its indexes
#[async_trait]
pub trait CanonicalWriter<E: MigrationEntity>: Send + Sync {
    /// Persist `entity` through every index it participates in
    ///
    /// # Errors
    /// Returns `WriteError` on transport failures or when the path's own
    /// consistency checks refuse the write.
    async fn upsert(&self, entity: &E, options: UpsertOptions) -> Result<UpsertOutcome, WriteError>;
}

#[async_trait]
impl<E: MigrationEntity, W: CanonicalWriter<E> + ?Sized> CanonicalWriter<E> for Arc<W> {
    async fn upsert(&self, entity: &E, options: UpsertOptions) -> Result<UpsertOutcome, WriteError> {
        (**self).upsert(entity, options).await
    }
}
