//! rekey - online unique-index migration
//!
//! Moves every record of a live key-value store from one unique-index
//! layout to another without minting duplicate identities:
//! 1. **Scan**: page through the source table
//! 2. **Reconcile**: repair drifted unique-index keys, never overwriting newer data
//! 3. **Re-write**: force every entity through the canonical write path
//!
//! Every step is idempotent; re-running a migration is the recovery path for
//! any partial failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use rekey_core::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let codec = Arc::new(JsonCodec::new(KeySchema::new(["tenant", "email"])));
//! let writer = Arc::new(MemoryWritePath::new(
//!     Arc::clone(&store),
//!     (*codec).clone(),
//!     "unique_index",
//!     "entities",
//! ));
//!
//! let migrator = Migrator::new(store, codec, writer, &MigrationConfig::new())?;
//! let outcome = migrator.run(MigrationRequest::dry_run()).await?;
//! println!("{}", serde_json::to_string_pretty(&outcome.report)?);
//! ```

#![warn(unreachable_pub)]

// Engine
pub mod audit;
pub mod config;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod reconciler;
pub mod report;
pub mod scanner;
pub mod store;
pub mod types;

// Backends
pub mod memory;

// Re-exports
pub use audit::{audit_unique_index, AuditReport};
pub use config::MigrationConfig;
pub use error::{
    CodecError, ConfigError, MigrationError, SnapshotError, StoreError, StoreOperation, TaskError,
    TaskFailure, WriteError,
};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{MigrationRequest, Migrator};
pub use reconciler::{KeyReconciler, ReconcileDecision};
pub use report::{
    MigratedCounts, MigrationOutcome, MigrationReport, MigrationStats, ModifiedCounts, Phase,
};
pub use scanner::{PageScanner, ScanResult};
pub use store::{CanonicalWriter, KeyValueStore, RecordCodec, UpsertOptions, UpsertOutcome};
pub use types::{
    ContinuationToken, EntityId, MigrationEntity, Payload, Projection, RecordAddress, ScanPage,
    StoredRecord, TableName, UniqueKey,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a migration
    pub use crate::memory::{
        Document, JsonCodec, KeyFormat, KeySchema, MemoryStore, MemoryWritePath,
    };
    pub use crate::{
        CanonicalWriter, ConcurrencyLimiter, KeyValueStore, MigrationConfig, MigrationEntity,
        MigrationOutcome, MigrationReport, MigrationRequest, Migrator, RecordCodec, TableName,
        UniqueKey,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
