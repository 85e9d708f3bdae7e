//! In-process backend
//!
//! A complete set of collaborators for running migrations without an
//! external store:
//! - [`MemoryStore`]: paginated tables with unique-key lookups
//! - [`JsonCodec`]: [`Document`] payloads keyed by a [`KeySchema`]
//! - [`MemoryWritePath`]: canonical upsert over both indexes
//! - [`Snapshot`]: JSON persistence of a whole store

mod codec;
mod snapshot;
mod store;
mod writer;

pub use codec::{Document, JsonCodec, KeyFormat, KeySchema};
pub use crate::error::SnapshotError;
pub use snapshot::Snapshot;
pub use store::MemoryStore;
pub use writer::MemoryWritePath;
