//! strata-sync CLI
//!
//! Command-line tool for synchronizing a database with a schema file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use strata_sqlite::SqliteExecutor;
use strata_sync::{introspect, load_schema, plan, StateStore, SyncCoordinator};

/// Keep a SQLite database in step with a declarative schema.
#[derive(Parser)]
#[command(name = "strata-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a schema file to the database.
    Sync {
        /// Path to the schema JSON file.
        #[arg(short, long)]
        schema: PathBuf,

        /// Identity used to key the sync cache (defaults to the database URL).
        #[arg(long)]
        identity: Option<String>,
    },

    /// Show the statements a sync would run, without executing them.
    Plan {
        /// Path to the schema JSON file.
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Print the live structure of the tables named by a schema file.
    Inspect {
        /// Path to the schema JSON file.
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Show the recorded sync state of every schema.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let executor = Arc::new(SqliteExecutor::connect(&cli.database).await?);

    match cli.command {
        Commands::Sync { schema, identity } => {
            let schema = load_schema(&schema)?;
            let identity = identity.unwrap_or_else(|| cli.database.clone());
            let result = SyncCoordinator::new()
                .synchronize(Arc::clone(&executor), &schema, &identity)
                .await?;

            if result.changed {
                info!(
                    "Applied {} statement(s) for schema '{}':",
                    result.applied_statements.len(),
                    schema.name
                );
                for statement in &result.applied_statements {
                    println!("{statement};");
                }
            } else {
                info!("Schema '{}' is up to date.", schema.name);
            }
            for warning in &result.warnings {
                warn!("{warning}");
            }
            info!("Schema hash: {}", result.hash);
        }

        Commands::Plan { schema } => {
            let schema = load_schema(&schema)?;
            let plan = plan(executor.as_ref(), &schema).await?;

            if plan.is_empty() {
                info!("No changes.");
            }
            for statement in &plan.statements {
                println!("{statement};");
            }
            for warning in &plan.warnings {
                warn!("{warning}");
            }
        }

        Commands::Inspect { schema } => {
            let schema = load_schema(&schema)?;
            let live = introspect(executor.as_ref(), &schema).await?;
            println!("{}", serde_json::to_string_pretty(&live)?);
        }

        Commands::Status => {
            let store = StateStore::new(executor.as_ref());
            store.ensure_table().await?;
            let states = store.list().await?;

            if states.is_empty() {
                info!("No schema has been synchronized yet.");
            }
            for state in states {
                let updated = state
                    .updated_at_utc()
                    .map_or_else(|| state.updated_at.to_string(), |t| t.to_rfc3339());
                let version = state
                    .version
                    .map_or_else(|| "-".to_string(), |v| v.to_string());
                println!(
                    "{}\t{}\tversion {}\t{}",
                    state.schema_name, state.schema_hash, version, updated
                );
            }
        }
    }

    Ok(())
}
