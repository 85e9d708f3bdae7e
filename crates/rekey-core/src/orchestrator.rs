//! Migration orchestrator
//!
//! Drives a migration through three ordered phases with a hard barrier
//! between them:
//! 1. **Scan**: read the full record set of the source table
//! 2. **Reconcile**: repair drifted unique-index keys, one task per derived
//!    key; records sharing a key are reconciled newest first within it
//! 3. **Re-write**: push every entity through the canonical write path with
//!    `force` set, one task per entity
//!
//! A phase-1 failure aborts the run. Task failures in phases 2 and 3 are
//! collected and never stop sibling tasks; re-running the migration is the
//! recovery path.

use crate::config::MigrationConfig;
use crate::error::{MigrationError, TaskError, TaskFailure};
use crate::limiter::ConcurrencyLimiter;
use crate::reconciler::{KeyReconciler, ReconcileDecision};
use crate::report::{MigrationOutcome, MigrationReport, MigrationStats, Phase};
use crate::scanner::PageScanner;
use crate::store::{CanonicalWriter, KeyValueStore, RecordCodec, UpsertOptions, UpsertOutcome};
use crate::types::{EntityId, MigrationEntity, StoredRecord, TableName, UniqueKey};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Parameters of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRequest {
    /// Decide and count, but write nothing
    pub dry_run: bool,
    /// Read from this table instead of the live unique-index table
    pub source_table_name: Option<String>,
}

impl MigrationRequest {
    /// Live migration from the unique-index table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dry run from the unique-index table
    #[inline]
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            source_table_name: None,
        }
    }

    /// With an alternate source table
    #[inline]
    #[must_use]
    pub fn with_source_table(mut self, table: impl Into<String>) -> Self {
        self.source_table_name = Some(table.into());
        self
    }
}

/// Top-level migration driver
///
/// Owns its [`ConcurrencyLimiter`], so separate migrators never share
/// admission-control state.
pub struct Migrator<S: ?Sized, C, W: ?Sized> {
    store: Arc<S>,
    codec: Arc<C>,
    writer: Arc<W>,
    limiter: ConcurrencyLimiter,
    unique_index_table: TableName,
}

impl<S: ?Sized, C, W: ?Sized> std::fmt::Debug for Migrator<S, C, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("unique_index_table", &self.unique_index_table)
            .field("max_in_flight", &self.limiter.max_in_flight())
            .finish_non_exhaustive()
    }
}

impl<S, C, W> Migrator<S, C, W>
where
    S: KeyValueStore + ?Sized,
    C: RecordCodec,
    W: CanonicalWriter<C::Entity> + ?Sized,
{
    /// Create a migrator from validated configuration
    ///
    /// # Errors
    /// Returns `MigrationError::Config` if `config` fails validation.
    pub fn new(
        store: Arc<S>,
        codec: Arc<C>,
        writer: Arc<W>,
        config: &MigrationConfig,
    ) -> Result<Self, MigrationError> {
        config.validate()?;
        Ok(Self {
            store,
            codec,
            writer,
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            unique_index_table: config.unique_index_table.clone(),
        })
    }

    /// Replace the limiter
    #[must_use]
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Limiter used by every phase
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Run the migration
    ///
    /// # Errors
    /// Returns `MigrationError::ScanFailed` if the source table cannot be
    /// read in full. Later failures are reported per task in the outcome.
    pub async fn run(&self, request: MigrationRequest) -> Result<MigrationOutcome, MigrationError> {
        let from = request
            .source_table_name
            .map_or_else(|| self.unique_index_table.clone(), TableName::from);
        let to = self.unique_index_table.clone();
        let dry_run = request.dry_run;

        tracing::info!(
            from = %from,
            to = %to,
            dry_run,
            max_in_flight = self.limiter.max_in_flight(),
            "migration started"
        );

        // Phase 1
        let scan = PageScanner::new(&*self.store)
            .scan_all(&from)
            .await
            .map_err(|source| {
                tracing::error!(table = %from, error = %source, "scan failed, aborting migration");
                MigrationError::ScanFailed {
                    table: from.clone(),
                    source,
                }
            })?;

        let mut stats = MigrationStats {
            pages: scan.pages,
            scanned_records: scan.records.len(),
            ..MigrationStats::default()
        };
        tracing::info!(
            phase = %Phase::Scan,
            pages = stats.pages,
            records = stats.scanned_records,
            "phase complete"
        );

        // Phase 2
        let mut reconciled = Vec::new();
        let mut groups: BTreeMap<UniqueKey, Vec<(UniqueKey, C::Entity)>> = BTreeMap::new();
        for record in &scan.records {
            match self.prepare_record(record) {
                Ok((expected_key, entity)) => groups
                    .entry(expected_key)
                    .or_default()
                    .push((record.unique_key.clone(), entity)),
                Err(failure) => reconciled.push(Err(failure)),
            }
        }

        let reconciler = KeyReconciler::new(&*self.store, &*self.codec, &to).dry_run(dry_run);
        let grouped = self
            .limiter
            .run_all(
                groups
                    .into_values()
                    .map(|group| self.reconcile_group(&reconciler, group)),
            )
            .await;
        reconciled.extend(grouped.into_iter().flatten());

        let mut failures = Vec::new();
        let mut written_keys = BTreeSet::new();
        let mut failed_entities = BTreeSet::new();
        let mut entities: BTreeMap<EntityId, (UniqueKey, C::Entity)> = BTreeMap::new();

        for result in reconciled {
            match result {
                Ok((found_key, entity, decision)) => {
                    match decision {
                        ReconcileDecision::UpToDate => stats.up_to_date += 1,
                        ReconcileDecision::Repaired { key, .. } => {
                            stats.repaired += 1;
                            written_keys.insert(key);
                        }
                        ReconcileDecision::SkippedNewer { .. } => stats.skipped_newer += 1,
                    }
                    keep_newest(&mut entities, found_key, entity);
                }
                Err(failure) => {
                    tracing::warn!(%failure, "reconcile task failed");
                    if let Some(id) = failure.entity {
                        failed_entities.insert(id);
                    }
                    failures.push(failure);
                }
            }
        }

        // An entity with any failed record is left for the next run.
        entities.retain(|id, _| !failed_entities.contains(id));
        stats.distinct_entities = entities.len();

        tracing::info!(
            phase = %Phase::Reconcile,
            up_to_date = stats.up_to_date,
            repaired = stats.repaired,
            skipped_newer = stats.skipped_newer,
            failed = failures.len(),
            "phase complete"
        );

        // Phase 3
        let migrated = if dry_run {
            entities.len()
        } else {
            let rewritten = self
                .limiter
                .run_all(
                    entities
                        .values()
                        .map(|(key, entity)| self.rewrite_entity(key, entity)),
                )
                .await;

            let mut migrated = 0;
            for result in rewritten {
                match result {
                    Ok(outcome) => {
                        migrated += 1;
                        if outcome == UpsertOutcome::Unchanged {
                            stats.unchanged += 1;
                        }
                    }
                    Err(failure) => {
                        tracing::warn!(%failure, "rewrite task failed");
                        failures.push(failure);
                    }
                }
            }
            migrated
        };

        tracing::info!(
            phase = %Phase::Rewrite,
            migrated,
            dry_run,
            failed = failures.iter().filter(|f| f.phase == Phase::Rewrite).count(),
            "phase complete"
        );

        let report = MigrationReport::new(from, to)
            .with_written_unique_key_records(written_keys.len())
            .with_migrated_objects(migrated);

        tracing::info!(
            written_unique_key_records = report.modified.written_unique_key_records,
            migrated_objects = report.migrated.objects,
            failures = failures.len(),
            "migration finished"
        );

        Ok(MigrationOutcome {
            dry_run,
            report,
            stats,
            failures,
        })
    }

    /// Decode a scanned record and derive the key it belongs under
    fn prepare_record(
        &self,
        record: &StoredRecord,
    ) -> Result<(UniqueKey, C::Entity), TaskFailure> {
        let failure = |entity: Option<EntityId>, error: TaskError| TaskFailure {
            phase: Phase::Reconcile,
            key: record.unique_key.clone(),
            entity,
            error,
        };

        let entity = self
            .codec
            .decode(record)
            .map_err(|e| failure(None, e.into()))?;
        let expected_key = self
            .codec
            .unique_key(&entity)
            .map_err(|e| failure(Some(entity.id()), e.into()))?;

        Ok((expected_key, entity))
    }

    /// Reconcile every record deriving one key, one after another
    ///
    /// The newest record goes first so that older ones see it at the key and
    /// skip, whatever order the scan returned them in.
    async fn reconcile_group(
        &self,
        reconciler: &KeyReconciler<'_, S, C>,
        mut group: Vec<(UniqueKey, C::Entity)>,
    ) -> Vec<Result<(UniqueKey, C::Entity, ReconcileDecision), TaskFailure>> {
        group.sort_by(|(_, a), (_, b)| {
            b.updated_at()
                .cmp(&a.updated_at())
                .then_with(|| a.id().cmp(&b.id()))
        });

        let mut results = Vec::with_capacity(group.len());
        for (found_key, entity) in group {
            let result = match reconciler.reconcile(&found_key, &entity).await {
                Ok(decision) => Ok((found_key, entity, decision)),
                Err(error) => Err(TaskFailure {
                    phase: Phase::Reconcile,
                    key: found_key,
                    entity: Some(entity.id()),
                    error,
                }),
            };
            results.push(result);
        }
        results
    }

    async fn rewrite_entity(
        &self,
        found_key: &UniqueKey,
        entity: &C::Entity,
    ) -> Result<UpsertOutcome, TaskFailure> {
        self.writer
            .upsert(entity, UpsertOptions::forced())
            .await
            .map_err(|e| TaskFailure {
                phase: Phase::Rewrite,
                key: found_key.clone(),
                entity: Some(entity.id()),
                error: e.into(),
            })
    }
}

/// Several records may decode to one identity (stale and current keys);
/// only its most recent version is re-written.
fn keep_newest<E: MigrationEntity>(
    entities: &mut BTreeMap<EntityId, (UniqueKey, E)>,
    found_key: UniqueKey,
    entity: E,
) {
    match entities.entry(entity.id()) {
        Entry::Vacant(slot) => {
            slot.insert((found_key, entity));
        }
        Entry::Occupied(mut slot) => {
            if entity.updated_at() > slot.get().1.updated_at() {
                slot.insert((found_key, entity));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Document, JsonCodec, KeySchema, MemoryStore, MemoryWritePath};
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn request_builders() {
        assert!(!MigrationRequest::new().dry_run);
        let request = MigrationRequest::dry_run().with_source_table("snapshot_2024");
        assert!(request.dry_run);
        assert_eq!(request.source_table_name.as_deref(), Some("snapshot_2024"));
    }

    #[test]
    fn keep_newest_prefers_later_timestamp() {
        let id = EntityId::new();
        let old = Document::new(at(1)).with_id(id);
        let new = Document::new(at(2)).with_id(id);

        let mut entities = BTreeMap::new();
        keep_newest(&mut entities, UniqueKey::from("new"), new.clone());
        keep_newest(&mut entities, UniqueKey::from("old"), old);

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[&id].0.as_str(), "new");
        assert_eq!(entities[&id].1, new);
    }

    #[test]
    fn rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        let codec = Arc::new(JsonCodec::new(KeySchema::new(["email"])));
        let writer = Arc::new(MemoryWritePath::new(
            Arc::clone(&store),
            (*codec).clone(),
            "unique_index",
            "entities",
        ));

        let config = MigrationConfig::new().with_max_concurrency(0);
        let err = Migrator::new(store, codec, writer, &config).unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[tokio::test]
    async fn undecodable_record_is_a_reconcile_failure() {
        let store = Arc::new(MemoryStore::new());
        let codec = Arc::new(JsonCodec::new(KeySchema::new(["email"])));
        let writer = Arc::new(MemoryWritePath::new(
            Arc::clone(&store),
            (*codec).clone(),
            "unique_index",
            "entities",
        ));

        let good = Document::new(at(1)).with_attribute("email", "a@x.io");
        store.insert("unique_index", codec.encode(&good).unwrap());
        store.insert(
            "unique_index",
            StoredRecord::new(UniqueKey::from("broken"), crate::types::Payload::new("{")),
        );

        let migrator = Migrator::new(store, codec, writer, &MigrationConfig::new()).unwrap();
        let outcome = migrator.run(MigrationRequest::new()).await.unwrap();

        assert_eq!(outcome.report.migrated.objects, 1);
        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert_eq!(failure.phase, Phase::Reconcile);
        assert_eq!(failure.key.as_str(), "broken");
        assert!(matches!(failure.error, TaskError::Codec(_)));
    }
}
