//! CLI entrypoint for iocancel tooling.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use iocancel_core::config::HookConfig;
use iocancel_harness::HarnessError;

/// Tooling for the iocancel hook layer.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Log validation and configuration tooling for iocancel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a structured JSONL log written via IOCANCEL_LOG.
    ValidateLog {
        /// Path to the JSONL log.
        #[arg(long)]
        log: PathBuf,
        /// Print the summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the configuration the current environment resolves to.
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::ValidateLog { log, json } => {
            eprintln!("Validating {}", log.display());
            let report = match iocancel_harness::validate_log_file(&log) {
                Ok(report) => report,
                Err(err) => {
                    if let HarnessError::InvalidLog { problems, .. } = &err {
                        for problem in problems {
                            eprintln!(
                                "line {}: {}: {}",
                                problem.line, problem.field, problem.message
                            );
                        }
                    }
                    return Err(err.into());
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("records: {}", report.valid);
                for (event, count) in &report.events {
                    println!("  {event}: {count}");
                }
                println!(
                    "failures={} deferrals={} rollbacks={} handles_cancelled={}",
                    report.failures, report.deferrals, report.rollbacks, report.handles_cancelled
                );
            }
        }
        Command::Config => {
            let config = HookConfig::from_env();
            println!(
                "{}",
                serde_json::to_string_pretty(&iocancel_harness::config_json(&config))?
            );
        }
    }

    Ok(())
}
