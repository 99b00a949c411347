//! CLI command definitions for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing. Workflow commands take the
//! workflow id as their first positional argument.

pub mod info;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Durable workflow orchestrator.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true, env = "STEPWISE_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a workflow of the given type.
    Start {
        /// Registered workflow type.
        workflow_type: String,

        /// Initial context as a JSON object.
        #[arg(long, short = 'c')]
        context: Option<String>,

        /// Correlation id (defaults to `correlation_id` in the context, then
        /// a generated id).
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Show a workflow and its actions.
    Status {
        id: Uuid,
    },

    /// List workflows, newest first.
    #[command(alias = "ls")]
    List {
        /// Filter by status (created, processing, waiting, paused, completed,
        /// failed, cancelled).
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Resume a paused workflow.
    Resume {
        id: Uuid,
    },

    /// Cancel a workflow.
    Cancel {
        id: Uuid,

        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Retry a paused or failed workflow.
    Retry {
        id: Uuid,

        /// Rewind to this action index first, resetting it and every later
        /// action.
        #[arg(long)]
        from_action: Option<u32>,
    },

    /// Complete an action that is waiting for an external event.
    Signal {
        workflow_id: Uuid,

        action_id: Uuid,

        /// Result as JSON (defaults to null).
        #[arg(long)]
        result: Option<String>,
    },

    /// List registered workflow types.
    Types,

    /// Show workflow counts and pending callbacks.
    Info,

    /// Run the dispatcher: deliver queued actions and delayed callbacks.
    Worker,

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Do not run the dispatcher in this process.
        #[arg(long)]
        no_worker: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
