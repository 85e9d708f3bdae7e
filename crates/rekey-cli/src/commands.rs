//! `migrate` and `audit` over a snapshot file

use crate::cli::{AuditArgs, MigrateArgs};
use anyhow::Context;
use rekey_core::memory::{JsonCodec, MemoryStore, MemoryWritePath, Snapshot};
use rekey_core::{
    audit_unique_index, AuditReport, MigrationOutcome, MigrationRequest, Migrator, TableName,
};
use std::path::Path;
use std::sync::Arc;

fn load_store(path: &Path, page_size: usize) -> anyhow::Result<MemoryStore> {
    let snapshot =
        Snapshot::load(path).with_context(|| format!("loading snapshot {}", path.display()))?;
    Ok(MemoryStore::from_snapshot(snapshot, page_size))
}

/// Run a migration against the snapshot at `args.snapshot`
///
/// The mutated store is written back atomically unless dry-running.
///
/// # Errors
/// Fails when the snapshot cannot be read or written, no key schema is
/// configured, or the source table cannot be scanned.
pub async fn migrate(args: &MigrateArgs) -> anyhow::Result<MigrationOutcome> {
    let settings = &args.settings;
    let codec = Arc::new(JsonCodec::new(settings.key_schema()?));
    let store = Arc::new(load_store(&args.snapshot, settings.store.page_size)?);
    let writer = Arc::new(MemoryWritePath::new(
        Arc::clone(&store),
        (*codec).clone(),
        settings.migration.unique_index_table.clone(),
        settings.store.entity_table.clone(),
    ));

    let migrator = Migrator::new(Arc::clone(&store), codec, writer, &settings.migration)?;

    let mut request = if args.dry_run {
        MigrationRequest::dry_run()
    } else {
        MigrationRequest::new()
    };
    if let Some(table) = &args.source_table {
        request = request.with_source_table(table.clone());
    }

    let outcome = migrator.run(request).await?;

    if !outcome.dry_run {
        store
            .snapshot()
            .save(&args.snapshot)
            .with_context(|| format!("saving snapshot {}", args.snapshot.display()))?;
        tracing::info!(path = %args.snapshot.display(), "snapshot saved");
    }

    Ok(outcome)
}

/// Audit the unique-index table of the snapshot at `args.snapshot`
///
/// # Errors
/// Fails when the snapshot cannot be read, no key schema is configured, or
/// the table cannot be scanned.
pub async fn audit(args: &AuditArgs) -> anyhow::Result<AuditReport> {
    let settings = &args.settings;
    let codec = JsonCodec::new(settings.key_schema()?);
    let store = load_store(&args.snapshot, settings.store.page_size)?;
    let table = args
        .table
        .as_deref()
        .map_or_else(|| settings.migration.unique_index_table.clone(), TableName::from);

    audit_unique_index(&store, &codec, &table)
        .await
        .with_context(|| format!("auditing table {table}"))
}
