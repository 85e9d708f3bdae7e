//! Argument definitions

use crate::logging::LogFormat;
use crate::settings::{KeyFormatKind, Overrides, Settings};
use anyhow::{anyhow, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// The `rekey` command
#[must_use]
pub fn command() -> Command {
    Command::new("rekey")
        .version(rekey_core::VERSION)
        .about("Online unique-index migration over key-value snapshots")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("migrate")
                .about("Re-key every record of the unique-index table")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Decide and count without writing anything"),
                )
                .arg(
                    Arg::new("source-table")
                        .long("source-table")
                        .value_name("NAME")
                        .help("Scan this table instead of the unique-index table"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .help("Maximum in-flight store operations (default 1000)"),
                )
                .args(shared_args()),
        )
        .subcommand(
            Command::new("audit")
                .about("Check that every identity is reachable at its current key")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("table")
                        .long("table")
                        .value_name("NAME")
                        .help("Audit this table instead of the unique-index table"),
                )
                .args(shared_args()),
        )
}

fn snapshot_arg() -> Arg {
    Arg::new("snapshot")
        .long("snapshot")
        .value_name("FILE")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("JSON snapshot of the store")
}

fn shared_args() -> Vec<Arg> {
    vec![
        Arg::new("config")
            .long("config")
            .value_name("FILE")
            .value_parser(value_parser!(PathBuf))
            .help("TOML settings file"),
        Arg::new("unique-index-table")
            .long("unique-index-table")
            .value_name("NAME")
            .help("Live unique-index table"),
        Arg::new("page-size")
            .long("page-size")
            .value_name("N")
            .value_parser(value_parser!(usize))
            .help("Records per scan page"),
        Arg::new("key-attributes")
            .long("key-attributes")
            .value_name("ATTRS")
            .value_delimiter(',')
            .help("Comma-separated natural-key attributes"),
        Arg::new("key-prefix")
            .long("key-prefix")
            .value_name("PREFIX")
            .help("Namespace prefix of every unique key"),
        Arg::new("key-format")
            .long("key-format")
            .value_parser(["joined", "json"])
            .help("Unique-key serialization"),
        Arg::new("log-format")
            .long("log-format")
            .value_parser(["pretty", "json"])
            .help("Log line format"),
    ]
}

fn overrides(args: &ArgMatches) -> Overrides {
    Overrides {
        max_concurrency: args
            .try_get_one::<usize>("concurrency")
            .ok()
            .flatten()
            .copied(),
        unique_index_table: args.get_one::<String>("unique-index-table").cloned(),
        page_size: args.get_one::<usize>("page-size").copied(),
        key_attributes: args
            .get_many::<String>("key-attributes")
            .map(|values| values.cloned().collect()),
        key_prefix: args.get_one::<String>("key-prefix").cloned(),
        key_format: args
            .get_one::<String>("key-format")
            .and_then(|v| KeyFormatKind::parse(v)),
        log_format: args
            .get_one::<String>("log-format")
            .and_then(|v| LogFormat::parse(v)),
    }
}

fn snapshot_path(args: &ArgMatches) -> anyhow::Result<PathBuf> {
    args.get_one::<PathBuf>("snapshot")
        .cloned()
        .ok_or_else(|| anyhow!("--snapshot is required"))
}

fn settings(args: &ArgMatches) -> anyhow::Result<Settings> {
    let config = args.get_one::<PathBuf>("config");
    Settings::resolve(config.map(PathBuf::as_path), &overrides(args))
        .context("resolving settings")
}

/// Parsed `migrate` arguments
#[derive(Debug, Clone, PartialEq)]
pub struct MigrateArgs {
    /// Snapshot read, and rewritten unless dry-running
    pub snapshot: PathBuf,
    /// Write nothing
    pub dry_run: bool,
    /// Alternate scan source
    pub source_table: Option<String>,
    /// File settings with overrides applied
    pub settings: Settings,
}

impl MigrateArgs {
    /// From `migrate` subcommand matches
    ///
    /// # Errors
    /// Fails when settings cannot be resolved.
    pub fn from_matches(args: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            snapshot: snapshot_path(args)?,
            dry_run: args.get_flag("dry-run"),
            source_table: args.get_one::<String>("source-table").cloned(),
            settings: settings(args)?,
        })
    }
}

/// Parsed `audit` arguments
#[derive(Debug, Clone, PartialEq)]
pub struct AuditArgs {
    /// Snapshot to audit
    pub snapshot: PathBuf,
    /// Table to audit instead of the unique-index table
    pub table: Option<String>,
    /// File settings with overrides applied
    pub settings: Settings,
}

impl AuditArgs {
    /// From `audit` subcommand matches
    ///
    /// # Errors
    /// Fails when settings cannot be resolved.
    pub fn from_matches(args: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            snapshot: snapshot_path(args)?,
            table: args.get_one::<String>("table").cloned(),
            settings: settings(args)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_consistent() {
        command().debug_assert();
    }

    #[test]
    fn parses_migrate() {
        let matches = command()
            .try_get_matches_from([
                "rekey",
                "migrate",
                "--snapshot",
                "store.json",
                "--dry-run",
                "--concurrency",
                "4",
                "--key-attributes",
                "tenant,email",
                "--key-format",
                "json",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "migrate");

        let args = MigrateArgs::from_matches(sub).unwrap();
        assert_eq!(args.snapshot, PathBuf::from("store.json"));
        assert!(args.dry_run);
        assert_eq!(args.source_table, None);
        assert_eq!(args.settings.migration.max_concurrency, 4);
        let schema = args.settings.key_schema().unwrap();
        assert_eq!(schema.attributes, vec!["tenant", "email"]);
        assert_eq!(schema.format, rekey_core::memory::KeyFormat::Json);
    }

    #[test]
    fn audit_has_no_concurrency_flag() {
        let result = command().try_get_matches_from([
            "rekey",
            "audit",
            "--snapshot",
            "store.json",
            "--concurrency",
            "4",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_is_required() {
        assert!(command()
            .try_get_matches_from(["rekey", "migrate", "--dry-run"])
            .is_err());
    }
}
