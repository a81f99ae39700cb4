//! CLI command definitions and dispatch for the `cadence` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a
//! noun-verb pattern (e.g., `cadence workflow create`, `cadence run show`).

pub mod contact;
pub mod event;
pub mod preview;
pub mod run;
pub mod sweep;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use cadence_observe::LogFormat;

/// Durable automation workflows for CRM contacts.
#[derive(Parser)]
#[command(name = "cadence", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format (pretty or json).
    #[arg(long, global = true, env = "CADENCE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "CADENCE_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflow definitions.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Start, inspect and control runs.
    Run {
        #[command(subcommand)]
        action: run::RunCommand,
    },

    /// Deliver a CRM event (JSON) to matching workflows.
    Event {
        /// Path to a JSON event file, or `-` for stdin.
        file: String,
    },

    /// Resume due steps once.
    Sweep {
        /// Maximum number of due steps to resume.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Sweep on a schedule and fire scheduled workflows until Ctrl+C.
    Worker {
        /// Sweep cadence (cron expression or human form).
        #[arg(long, default_value = "every 30 seconds")]
        schedule: String,

        /// Maximum number of due steps per sweep.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Render a step against sample data without running anything.
    Preview {
        /// Step config file (JSON or YAML).
        step: std::path::PathBuf,

        /// Sample merge context file (JSON); empty when omitted.
        #[arg(long)]
        sample: Option<std::path::PathBuf>,
    },

    /// Load contacts and organizations.
    Contacts {
        #[command(subcommand)]
        action: contact::ContactCommand,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on (defaults to `server.port` in config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to `server.host` in config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Colored status label shared by the table renderers.
pub(crate) fn status_cell(status: &str) -> comfy_table::Cell {
    use comfy_table::{Cell, Color};
    let color = match status {
        "completed" => Color::Green,
        "failed" => Color::Red,
        "waiting" | "pending" => Color::Yellow,
        "running" => Color::Cyan,
        _ => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

/// First 8 characters of an id, for tables.
pub(crate) fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_defaults() {
        let cli = Cli::try_parse_from(["cadence", "worker"]).unwrap();
        match cli.command {
            Commands::Worker { schedule, limit } => {
                assert_eq!(schedule, "every 30 seconds");
                assert!(limit.is_none());
            }
            _ => panic!("expected worker"),
        }
    }

    #[test]
    fn test_run_start_parses_ids() {
        let wf = uuid::Uuid::now_v7();
        let contact = uuid::Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "cadence",
            "--json",
            "run",
            "start",
            &wf.to_string(),
            "--contact",
            &contact.to_string(),
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Run {
                action: run::RunCommand::Start { workflow_id, contact_id }
            } if workflow_id == wf && contact_id == contact
        ));
    }
}
