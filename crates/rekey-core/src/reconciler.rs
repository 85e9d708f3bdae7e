//! Unique-index key reconciliation
//!
//! For each scanned record the reconciler compares the key it was stored
//! under with the key the current schema derives for its entity. When they
//! differ it repairs the unique index at the derived key, carrying the
//! entity's existing identity, unless the record already there is as new or
//! newer.
//!
//! The lookup at the derived key is what keeps the migration from
//! registering one logical entity under two identities.

use crate::error::TaskError;
use crate::store::{KeyValueStore, RecordCodec};
use crate::types::{EntityId, MigrationEntity, TableName, UniqueKey};
use chrono::{DateTime, Utc};

/// What the reconciler decided for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Stored key already matches the current schema
    UpToDate,
    /// A unique-index record was written at the derived key
    Repaired {
        /// Derived key
        key: UniqueKey,
        /// Identity of an older record that was replaced, if any
        replaced: Option<EntityId>,
        /// False in a dry run, where the write is suppressed
        applied: bool,
    },
    /// The record at the derived key is as new or newer; nothing written
    SkippedNewer {
        /// Derived key
        key: UniqueKey,
        /// Timestamp of the record that was kept
        existing_updated_at: DateTime<Utc>,
    },
}

impl ReconcileDecision {
    /// Key counted as written (or, in a dry run, as would-be written)
    #[inline]
    #[must_use]
    pub fn written_key(&self) -> Option<&UniqueKey> {
        match self {
            Self::Repaired { key, .. } => Some(key),
            Self::UpToDate | Self::SkippedNewer { .. } => None,
        }
    }
}

/// Repairs the unique index for records whose key drifted
#[derive(Debug)]
pub struct KeyReconciler<'a, S: ?Sized, C> {
    store: &'a S,
    codec: &'a C,
    table: &'a TableName,
    dry_run: bool,
}

impl<'a, S, C> KeyReconciler<'a, S, C>
where
    S: KeyValueStore + ?Sized,
    C: RecordCodec,
{
    /// Reconciler writing into the unique-index `table`
    #[must_use]
    pub fn new(store: &'a S, codec: &'a C, table: &'a TableName) -> Self {
        Self {
            store,
            codec,
            table,
            dry_run: false,
        }
    }

    /// Decide and count without writing
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reconcile one record stored under `found_key` that decoded to `object`
    ///
    /// # Errors
    /// - `TaskError::Transport` if the lookup or the put fails
    /// - `TaskError::AmbiguousUniqueMatch` if several records share the derived key
    /// - `TaskError::Codec` if the key cannot be derived or a record cannot be (de)serialized
    pub async fn reconcile(
        &self,
        found_key: &UniqueKey,
        object: &C::Entity,
    ) -> Result<ReconcileDecision, TaskError> {
        let expected_key = self.codec.unique_key(object)?;
        if &expected_key == found_key {
            return Ok(ReconcileDecision::UpToDate);
        }

        let mut existing = self.store.query_unique(self.table, &expected_key).await?;
        if existing.len() > 1 {
            return Err(TaskError::AmbiguousUniqueMatch {
                key: expected_key,
                count: existing.len(),
            });
        }

        let current = existing.pop().map(|r| self.codec.decode(&r)).transpose()?;
        if let Some(current) = &current {
            // Strictly older loses; equal timestamps keep what is there.
            if current.updated_at() >= object.updated_at() {
                tracing::debug!(
                    entity = %object.id(),
                    from = %found_key,
                    to = %expected_key,
                    existing = %current.id(),
                    "newer record already at derived key, skipping"
                );
                return Ok(ReconcileDecision::SkippedNewer {
                    key: expected_key,
                    existing_updated_at: current.updated_at(),
                });
            }
        }

        if !self.dry_run {
            let record = self.codec.encode(object)?;
            self.store
                .put_unique_index_record(self.table, &expected_key, record)
                .await?;
        }

        tracing::debug!(
            entity = %object.id(),
            from = %found_key,
            to = %expected_key,
            dry_run = self.dry_run,
            "unique key repaired"
        );

        Ok(ReconcileDecision::Repaired {
            key: expected_key,
            replaced: current.map(|c| c.id()),
            applied: !self.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreOperation};
    use crate::memory::{Document, JsonCodec, KeyFormat, KeySchema};
    use crate::store::MockKeyValueStore;
    use crate::types::StoredRecord;
    use chrono::TimeZone;
    use mockall::predicate::eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn codec() -> JsonCodec {
        JsonCodec::new(KeySchema::new(["email"]).with_format(KeyFormat::Json))
    }

    fn doc(email: &str, updated: i64) -> Document {
        Document::new(at(updated)).with_attribute("email", email)
    }

    fn table() -> TableName {
        TableName::from("unique_index")
    }

    #[tokio::test]
    async fn matching_key_needs_no_lookup() {
        let store = MockKeyValueStore::new();
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 10);
        let key = codec.unique_key(&object).unwrap();

        let decision = KeyReconciler::new(&store, &codec, &table)
            .reconcile(&key, &object)
            .await
            .unwrap();
        assert_eq!(decision, ReconcileDecision::UpToDate);
    }

    #[tokio::test]
    async fn drifted_key_is_written_when_absent() {
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 10);
        let expected = codec.unique_key(&object).unwrap();
        let encoded = codec.encode(&object).unwrap();

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_unique()
            .with(eq(table.clone()), eq(expected.clone()))
            .times(1)
            .returning(|_, _| Ok(vec![]));
        store
            .expect_put_unique_index_record()
            .with(eq(table.clone()), eq(expected.clone()), eq(encoded))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let decision = KeyReconciler::new(&store, &codec, &table)
            .reconcile(&UniqueKey::from("legacy#a@x.io"), &object)
            .await
            .unwrap();
        assert_eq!(
            decision,
            ReconcileDecision::Repaired {
                key: expected,
                replaced: None,
                applied: true
            }
        );
    }

    #[tokio::test]
    async fn older_record_at_derived_key_is_replaced() {
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 20);
        let stale = doc("a@x.io", 10);
        let stale_id = stale.id;
        let stale_record = codec.encode(&stale).unwrap();

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_unique()
            .times(1)
            .returning(move |_, _| Ok(vec![stale_record.clone()]));
        store
            .expect_put_unique_index_record()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let decision = KeyReconciler::new(&store, &codec, &table)
            .reconcile(&UniqueKey::from("old"), &object)
            .await
            .unwrap();
        assert!(matches!(
            decision,
            ReconcileDecision::Repaired { replaced: Some(id), applied: true, .. } if id == stale_id
        ));
    }

    #[tokio::test]
    async fn newer_or_equal_record_is_kept() {
        for existing_ts in [20, 30] {
            let codec = codec();
            let table = table();
            let object = doc("a@x.io", 20);
            let existing = codec.encode(&doc("a@x.io", existing_ts)).unwrap();

            let mut store = MockKeyValueStore::new();
            store
                .expect_query_unique()
                .times(1)
                .returning(move |_, _| Ok(vec![existing.clone()]));
            store.expect_put_unique_index_record().never();

            let decision = KeyReconciler::new(&store, &codec, &table)
                .reconcile(&UniqueKey::from("old"), &object)
                .await
                .unwrap();
            assert_eq!(decision.written_key(), None);
            assert!(matches!(
                decision,
                ReconcileDecision::SkippedNewer { existing_updated_at, .. } if existing_updated_at == at(existing_ts)
            ));
        }
    }

    #[tokio::test]
    async fn dry_run_decides_without_writing() {
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 10);

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_unique()
            .times(1)
            .returning(|_, _| Ok(vec![]));
        store.expect_put_unique_index_record().never();

        let decision = KeyReconciler::new(&store, &codec, &table)
            .dry_run(true)
            .reconcile(&UniqueKey::from("old"), &object)
            .await
            .unwrap();
        assert!(decision.written_key().is_some());
        assert!(matches!(decision, ReconcileDecision::Repaired { applied: false, .. }));
    }

    #[tokio::test]
    async fn multiple_records_at_derived_key_are_ambiguous() {
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 10);
        let first = codec.encode(&doc("a@x.io", 1)).unwrap();
        let second = codec.encode(&doc("a@x.io", 2)).unwrap();

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_unique()
            .times(1)
            .returning(move |_, _| Ok(vec![first.clone(), second.clone()]));
        store.expect_put_unique_index_record().never();

        let err = KeyReconciler::new(&store, &codec, &table)
            .reconcile(&UniqueKey::from("old"), &object)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::AmbiguousUniqueMatch { count: 2, .. }));
    }

    #[tokio::test]
    async fn lookup_failure_is_transport_class() {
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 10);

        let mut store = MockKeyValueStore::new();
        store.expect_query_unique().times(1).returning(|table, _| {
            Err(StoreError::transport(StoreOperation::Lookup, table.clone(), "timeout"))
        });

        let err = KeyReconciler::new(&store, &codec, &table)
            .reconcile(&UniqueKey::from("old"), &object)
            .await
            .unwrap_err();
        assert!(err.is_transport_class());
    }

    #[tokio::test]
    async fn undecodable_record_at_derived_key_fails_the_task() {
        let codec = codec();
        let table = table();
        let object = doc("a@x.io", 10);
        let garbage = StoredRecord::new(
            codec.unique_key(&object).unwrap(),
            crate::types::Payload::new("not json"),
        );

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_unique()
            .times(1)
            .returning(move |_, _| Ok(vec![garbage.clone()]));
        store.expect_put_unique_index_record().never();

        let err = KeyReconciler::new(&store, &codec, &table)
            .reconcile(&UniqueKey::from("old"), &object)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Codec(_)));
    }
}
