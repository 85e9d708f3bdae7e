//! rekey command-line driver
//!
//! Runs migrations and audits against a JSON snapshot of a key-value store:
//! - **settings**: TOML settings file plus command-line overrides
//! - **logging**: `tracing` subscriber setup
//! - **cli**: argument definitions
//! - **commands**: `migrate` and `audit`

pub mod cli;
pub mod commands;
pub mod logging;
pub mod settings;

pub use cli::{command, AuditArgs, MigrateArgs};
pub use settings::{KeyFormatKind, Overrides, Settings};
