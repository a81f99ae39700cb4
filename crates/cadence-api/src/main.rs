//! Cadence CLI and REST API entry point.
//!
//! Binary name: `cadence`
//!
//! Parses CLI arguments, opens the database and wires the engine, then
//! dispatches to a command handler, the worker loop or the REST server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,cadence=debug",
        _ => "trace",
    };
    cadence_observe::init_tracing(filter, cli.log_format, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let result = run(cli).await;
    cadence_observe::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cadence", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    tracing::debug!(data_dir = %state.data_dir.display(), "state ready");

    match cli.command {
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, cli.json).await?;
        }
        Commands::Run { action } => {
            cli::run::handle_run_command(action, &state, cli.json).await?;
        }
        Commands::Event { file } => {
            cli::event::handle_event(&file, &state, cli.json).await?;
        }
        Commands::Sweep { limit } => {
            cli::sweep::handle_sweep(limit, &state, cli.json).await?;
        }
        Commands::Worker { schedule, limit } => {
            cli::sweep::run_worker(&schedule, limit, state).await?;
        }
        Commands::Preview { step, sample } => {
            cli::preview::handle_preview(&step, sample.as_deref(), &state, cli.json).await?;
        }
        Commands::Contacts { action } => {
            cli::contact::handle_contact_command(action, &state, cli.json).await?;
        }
        Commands::Serve { port, host } => {
            let server = &state.engine.config().server;
            let host = host.unwrap_or_else(|| server.host.clone());
            let port = port.unwrap_or(server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Cadence API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            if state.api_token.is_none() {
                println!(
                    "  {}",
                    console::style(format!(
                        "No {} set: the API accepts unauthenticated requests",
                        state::API_TOKEN_ENV
                    ))
                    .yellow()
                );
            }
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
