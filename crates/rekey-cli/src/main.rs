use anyhow::Context;
use clap::ArgMatches;
use rekey_cli::{command, commands, logging, AuditArgs, MigrateArgs};
use std::process::ExitCode;

/// Exit status when the command ran but left work undone
const INCOMPLETE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let matches = command().get_matches();

    match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    match matches.subcommand() {
        Some(("migrate", args)) => {
            let args = MigrateArgs::from_matches(args)?;
            logging::init(args.settings.logging.format);

            let outcome = commands::migrate(&args).await?;
            let report =
                serde_json::to_string_pretty(&outcome.report).context("serializing report")?;
            println!("{report}");

            if outcome.is_complete() {
                Ok(ExitCode::SUCCESS)
            } else {
                for failure in &outcome.failures {
                    eprintln!("failed: {failure}");
                }
                Ok(ExitCode::from(INCOMPLETE))
            }
        }
        Some(("audit", args)) => {
            let args = AuditArgs::from_matches(args)?;
            logging::init(args.settings.logging.format);

            let report = commands::audit(&args).await?;
            let json = serde_json::to_string_pretty(&report).context("serializing audit")?;
            println!("{json}");

            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(INCOMPLETE)
            })
        }
        _ => Ok(ExitCode::FAILURE),
    }
}
