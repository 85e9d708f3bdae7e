//! Read-only unique-index audit
//!
//! Checks that every identity in a unique-index table is reachable through
//! exactly one record at the key the current schema derives for it, and that
//! the record there carries the same identity.

use crate::error::StoreError;
use crate::scanner::PageScanner;
use crate::store::{KeyValueStore, RecordCodec};
use crate::types::{EntityId, MigrationEntity, Projection, TableName, UniqueKey};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Findings of an audit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Table audited
    pub table: Option<TableName>,
    /// Records scanned
    pub records: usize,
    /// Distinct identities found
    pub entities: usize,
    /// Records stored under the key the current schema derives
    pub current_keys: usize,
    /// Records stored under a key the current schema no longer derives
    pub stale_keys: usize,
    /// Records whose payload or key could not be decoded
    pub undecodable: usize,
    /// Identities with no record at their current key
    pub missing_current_key: Vec<EntityId>,
    /// Current keys occupied by a different identity
    pub identity_mismatches: Vec<UniqueKey>,
    /// Keys held by more than one record
    pub ambiguous_keys: Vec<UniqueKey>,
}

impl AuditReport {
    /// True when the unique-index invariant holds for every identity
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.undecodable == 0
            && self.missing_current_key.is_empty()
            && self.identity_mismatches.is_empty()
            && self.ambiguous_keys.is_empty()
    }
}

/// Audit `table`
///
/// # Errors
/// Returns the store error if the table cannot be scanned in full.
pub async fn audit_unique_index<S, C>(
    store: &S,
    codec: &C,
    table: &TableName,
) -> Result<AuditReport, StoreError>
where
    S: KeyValueStore + ?Sized,
    C: RecordCodec,
{
    let scan = PageScanner::new(store)
        .with_projection(Projection::Full)
        .scan_all(table)
        .await?;

    let mut report = AuditReport {
        table: Some(table.clone()),
        records: scan.records.len(),
        ..AuditReport::default()
    };

    let mut by_key: BTreeMap<UniqueKey, Vec<EntityId>> = BTreeMap::new();
    let mut newest: BTreeMap<EntityId, C::Entity> = BTreeMap::new();

    for record in &scan.records {
        let Ok(entity) = codec.decode(record) else {
            report.undecodable += 1;
            continue;
        };
        let Ok(expected) = codec.unique_key(&entity) else {
            report.undecodable += 1;
            continue;
        };

        if expected == record.unique_key {
            report.current_keys += 1;
        } else {
            report.stale_keys += 1;
        }

        by_key
            .entry(record.unique_key.clone())
            .or_default()
            .push(entity.id());

        match newest.get(&entity.id()) {
            Some(seen) if seen.updated_at() >= entity.updated_at() => {}
            _ => {
                newest.insert(entity.id(), entity);
            }
        }
    }

    report.entities = newest.len();
    report.ambiguous_keys = by_key
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, _)| key.clone())
        .collect();

    let mut mismatched = BTreeSet::new();
    for (id, entity) in &newest {
        let Ok(key) = codec.unique_key(entity) else {
            continue;
        };
        match by_key.get(&key) {
            None => report.missing_current_key.push(*id),
            Some(owners) if !owners.contains(id) => {
                mismatched.insert(key);
            }
            Some(_) => {}
        }
    }
    report.identity_mismatches = mismatched.into_iter().collect();

    tracing::info!(
        table = %table,
        records = report.records,
        entities = report.entities,
        stale_keys = report.stale_keys,
        clean = report.is_clean(),
        "unique index audited"
    );

    Ok(report)
}
