//! Command-line interface definitions.

pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Multi-agent orchestration core.
#[derive(Parser, Debug)]
#[command(name = "hive", version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file (defaults to .hive/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the orchestrator loop
    Run,

    /// Submit a task to the queue
    Submit {
        /// Task title
        title: String,
        /// Detailed description
        #[arg(long, default_value = "")]
        description: String,
        /// Task kind, matched against agent capabilities
        #[arg(long)]
        kind: String,
        /// Priority, higher is more urgent
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Prerequisite task ids (repeatable)
        #[arg(long = "after")]
        prerequisites: Vec<Uuid>,
        /// Execution estimate in seconds
        #[arg(long, default_value_t = 3600)]
        estimate_secs: u32,
        /// Idempotency key for safe re-submission
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Show queue depth and resource usage
    Status,

    /// List registered agents
    Agents,

    /// List escalations
    Escalations {
        /// Include resolved escalations
        #[arg(long)]
        all: bool,
    },

    /// Cancel a task
    Cancel {
        task_id: Uuid,
        /// Reason recorded on the task
        #[arg(long, default_value = "operator cancellation")]
        reason: String,
    },

    /// Show the full audit trail of a task
    History { task_id: Uuid },

    /// Print the effective configuration as YAML
    Config,
}
