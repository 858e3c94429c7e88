//! Hive CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use hive_core::application::{HiveCore, Orchestrator};
use hive_core::cli::{output, Cli, Commands};
use hive_core::domain::models::Task;
use hive_core::infrastructure::config::ConfigLoader;
use hive_core::infrastructure::database::DatabaseConnection;
use hive_core::infrastructure::logging;
use hive_core::services::agent_registry::AgentFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };

    // Config rendering needs no database or logging side effects.
    if matches!(cli.command, Commands::Config) {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    // Initialize database connection and schema
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    let database_url = format!("sqlite:{}", config.database.path);
    let db = DatabaseConnection::with_max_connections(&database_url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to apply schema")?;

    let core = HiveCore::build(config, db.pool().clone());

    match cli.command {
        Commands::Run => {
            let (orchestrator, handle) = Orchestrator::new(core);
            let loop_task = tokio::spawn(orchestrator.run());

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            handle.shutdown();
            loop_task
                .await
                .context("Orchestrator task panicked")?
                .context("Orchestrator loop failed")?;
        }

        Commands::Submit {
            title,
            description,
            kind,
            priority,
            prerequisites,
            estimate_secs,
            idempotency_key,
        } => {
            let description = if description.is_empty() {
                title.clone()
            } else {
                description
            };
            let mut task = Task::new(title, description, kind.as_str())
                .with_priority(priority)
                .with_prerequisites(prerequisites)
                .with_estimate(estimate_secs);
            if let Some(key) = idempotency_key {
                task = task.with_idempotency_key(key);
            }
            let outcome = core.submit(task).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "task_id": outcome.task_id().to_string() })
                );
            } else {
                println!("submitted {}", outcome.task_id());
            }
        }

        Commands::Status => {
            let stats = core.queue_stats().await?;
            let snapshot = core.resource_snapshot().await;
            if cli.json {
                let counts: std::collections::HashMap<&str, u64> = stats
                    .counts
                    .iter()
                    .map(|(k, v)| (k.as_str(), *v))
                    .collect();
                println!("{}", serde_json::json!({ "live": stats.live, "counts": counts }));
            } else {
                print!("{}", output::render_status(&stats, &snapshot));
            }
        }

        Commands::Agents => {
            let agents = core.list_agents(&AgentFilter::default()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&agents)?);
            } else {
                print!("{}", output::render_agents(&agents));
            }
        }

        Commands::Escalations { all } => {
            let escalations = core.list_escalations(!all).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&escalations)?);
            } else {
                print!("{}", output::render_escalations(&escalations));
            }
        }

        Commands::Cancel { task_id, reason } => {
            let outcome = core.cancel(task_id, &reason).await?;
            println!("{outcome:?}");
        }

        Commands::History { task_id } => {
            let history = core.task_history(task_id).await?;
            print!("{}", output::render_history(&history));
        }

        Commands::Config => {
            // Handled before the database is opened.
            unreachable!("config command is handled earlier");
        }
    }

    Ok(())
}
