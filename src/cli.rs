//! Command-line interface.
//!
//! The default mode runs all services. The `ops` subcommands invoke
//! control-plane operations over HTTP against a running instance and exit
//! with 0 on success, 1 on unrecoverable errors, and 2 on invalid input.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

/// brickwatch - LEGO set market data pipeline
///
/// This application runs all services:
/// - web: control-plane HTTP server
/// - scraper: scheduler, worker pool, and missing-data detector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TracingFormat {
    /// Use pretty formatter (default in debug mode)
    Pretty,
    /// Use JSON formatter (default in release mode)
    Json,
}

#[cfg(debug_assertions)]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Pretty;
#[cfg(not(debug_assertions))]
const DEFAULT_TRACING_FORMAT: TracingFormat = TracingFormat::Json;

fn default_tracing_format() -> TracingFormat {
    DEFAULT_TRACING_FORMAT
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run all services (the default when no subcommand is given)
    Serve,
    /// Invoke a control-plane operation on a running instance
    Ops {
        /// Base URL of the running instance
        #[arg(long, default_value = "http://localhost:8080")]
        base_url: String,

        #[command(subcommand)]
        op: OpsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum OpsCommand {
    /// Print queue counts, recent jobs, and worker status
    QueueStatus,
    /// Obliterate the queue and repopulate it from repository state
    QueueReset,
    /// Trigger one scheduler sweep
    SchedulerRun,
    /// Trigger one missing-data detection pass
    DetectMissing,
    /// Enqueue HIGH-priority scrapes for specific marketplace item ids
    ForceScrape {
        #[arg(required = true)]
        item_ids: Vec<String>,
    },
}

/// Execute one ops subcommand against a running instance.
pub async fn run_ops(base_url: &str, op: OpsCommand) -> ExitCode {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to build HTTP client: {e}");
            return ExitCode::from(1);
        }
    };

    let base = base_url.trim_end_matches('/');
    let request = match op {
        OpsCommand::QueueStatus => client.get(format!("{base}/api/queue/status")),
        OpsCommand::QueueReset => client.post(format!("{base}/api/queue/reset")),
        OpsCommand::SchedulerRun => client.post(format!("{base}/api/scheduler/run")),
        OpsCommand::DetectMissing => client.post(format!("{base}/api/detect-missing")),
        OpsCommand::ForceScrape { item_ids } => {
            if item_ids.iter().any(|id| id.trim().is_empty()) {
                eprintln!("item ids must not be blank");
                return ExitCode::from(2);
            }
            client
                .post(format!("{base}/api/scrape/force"))
                .json(&serde_json::json!({ "itemIds": item_ids }))
        }
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("request failed: {e}");
            return ExitCode::from(1);
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    // Pretty-print JSON bodies when possible
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or(body)),
        Err(_) => println!("{body}"),
    }

    if status.is_success() {
        ExitCode::SUCCESS
    } else if status.is_client_error() {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_force_scrape_ids() {
        let args = Args::parse_from(["brickwatch", "ops", "force-scrape", "75192-1", "10316-1"]);
        match args.command {
            Some(Command::Ops {
                op: OpsCommand::ForceScrape { item_ids },
                ..
            }) => assert_eq!(item_ids, vec!["75192-1", "10316-1"]),
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
