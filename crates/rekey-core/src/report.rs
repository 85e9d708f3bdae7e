//! Migration report and run statistics

use crate::error::TaskFailure;
use crate::types::TableName;
use serde::{Deserialize, Serialize};

/// Ordered phases of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Full-table scan of the source
    Scan,
    /// Unique-index key reconciliation
    Reconcile,
    /// Forced re-write through the canonical path
    Rewrite,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Reconcile => "reconcile",
            Self::Rewrite => "rewrite",
        };
        f.write_str(name)
    }
}

/// Summary of one migration run
///
/// Serializes as `{ from, to, modified: { writtenUniqueKeyRecords }, migrated: { objects } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Table the records were read from
    pub from: TableName,
    /// Unique-index table the records were migrated into
    pub to: TableName,
    /// Direct unique-index repairs
    pub modified: ModifiedCounts,
    /// Canonical re-writes
    pub migrated: MigratedCounts,
}

/// Unique-index records written (or, in a dry run, that would be written)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedCounts {
    /// Keys written by the reconciler
    pub written_unique_key_records: usize,
}

/// Entities pushed through the canonical write path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratedCounts {
    /// Entities re-written
    pub objects: usize,
}

impl MigrationReport {
    /// Empty report for a source/destination pair
    #[must_use]
    pub fn new(from: TableName, to: TableName) -> Self {
        Self {
            from,
            to,
            modified: ModifiedCounts::default(),
            migrated: MigratedCounts::default(),
        }
    }

    /// Set the reconciler's written-key count
    #[must_use]
    pub fn with_written_unique_key_records(mut self, count: usize) -> Self {
        self.modified.written_unique_key_records = count;
        self
    }

    /// Set the migrated-object count
    #[must_use]
    pub fn with_migrated_objects(mut self, count: usize) -> Self {
        self.migrated.objects = count;
        self
    }
}

/// Per-phase counters gathered during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    /// Scan pages fetched
    pub pages: usize,
    /// Records returned by the scan
    pub scanned_records: usize,
    /// Records whose stored key already matched
    pub up_to_date: usize,
    /// Records whose key was repaired
    pub repaired: usize,
    /// Repairs skipped because the existing record was as new or newer
    pub skipped_newer: usize,
    /// Distinct entities handed to the re-write phase
    pub distinct_entities: usize,
    /// Canonical writes that changed nothing
    pub unchanged: usize,
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// Whether writes were suppressed
    pub dry_run: bool,
    /// Summary report
    pub report: MigrationReport,
    /// Phase counters
    pub stats: MigrationStats,
    /// Tasks that failed in phases 2 and 3
    pub failures: Vec<TaskFailure>,
}

impl MigrationOutcome {
    /// True when no task failed
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures raised in a given phase
    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &TaskFailure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_in_wire_shape() {
        let report = MigrationReport::new(TableName::from("src"), TableName::from("dst"))
            .with_written_unique_key_records(3)
            .with_migrated_objects(40);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "from": "src",
                "to": "dst",
                "modified": { "writtenUniqueKeyRecords": 3 },
                "migrated": { "objects": 40 }
            })
        );
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Rewrite.to_string(), "rewrite");
    }
}
