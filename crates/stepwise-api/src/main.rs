//! Stepwise CLI and REST API entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, initializes the database and orchestrator, then
//! dispatches to the appropriate command handler, the dispatcher loop, or
//! the REST API server.

mod builtin;
mod cli;
mod http;
mod state;

use anyhow::Context as _;
use clap::Parser;
use clap_complete::generate;
use console::style;
use stepwise_observe::{TracingOptions, init_tracing, shutdown_tracing};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        quiet: cli.quiet,
        json: false,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Start {
            workflow_type,
            context,
            correlation_id,
        } => {
            cli::workflow::start(&state, &workflow_type, context.as_deref(), correlation_id, json)
                .await?;
        }

        Commands::Status { id } => cli::workflow::status(&state, id, json).await?,

        Commands::List { status, limit } => {
            cli::workflow::list(&state, status.as_deref(), limit, json).await?;
        }

        Commands::Resume { id } => cli::workflow::resume(&state, id, json).await?,

        Commands::Cancel { id, yes } => cli::workflow::cancel(&state, id, yes, json).await?,

        Commands::Retry { id, from_action } => {
            cli::workflow::retry(&state, id, from_action, json).await?;
        }

        Commands::Signal {
            workflow_id,
            action_id,
            result,
        } => {
            cli::workflow::signal(&state, workflow_id, action_id, result.as_deref(), json).await?;
        }

        Commands::Types => cli::workflow::types(&state, json)?,

        Commands::Info => cli::info::info(&state, json).await?,

        Commands::Worker => {
            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));

            if !cli.quiet {
                println!(
                    "  {} Stepwise worker polling {}",
                    style("*").bold(),
                    style(state.data_dir.display()).cyan()
                );
                println!("  {}", style("Press Ctrl+C to stop").dim());
            }
            state.dispatcher().run(shutdown).await;
        }

        Commands::Serve {
            port,
            host,
            no_worker,
        } => {
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("cannot bind {addr}"))?;

            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));

            let worker = if no_worker {
                None
            } else {
                let dispatcher = state.dispatcher();
                let token = shutdown.clone();
                Some(tokio::spawn(async move { dispatcher.run(token).await }))
            };

            println!(
                "  {} Stepwise API listening on {}",
                style("*").bold(),
                style(format!("http://{addr}")).cyan()
            );
            println!("  {}", style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);
            let server_shutdown = shutdown.clone();
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await?;

            shutdown.cancel();
            if let Some(worker) = worker {
                if let Err(e) = worker.await {
                    tracing::error!(error = %e, "dispatcher task failed");
                }
            }
            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled before state initialization"),
    }

    Ok(())
}

async fn cancel_on_signal(token: CancellationToken) {
    shutdown_signal().await;
    tracing::info!("shutdown requested");
    token.cancel();
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
