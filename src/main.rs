//! Maintenance CLI for logvault log stores.
//!
//! Every subcommand works against one logical store and prints JSON on
//! stdout. The store is shut down (exit backup, close-time migration)
//! before the process exits.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logvault_store::{
    AddOptions, BackendKind, LogFacade, MigrationOutcome, NewLog, Page, StoreConfig,
};
use logvault_telemetry::{TelemetryConfig, init_telemetry};
use serde_json::{Value, json};

#[derive(Debug, Parser)]
#[command(name = "logvault", about = "Inspect and maintain logvault log stores")]
struct Args {
    /// Logical store name.
    #[arg(long, default_value = "default")]
    name: String,

    /// JSON config file, merged over defaults before `LOGVAULT_*` env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force a backend instead of trying `MySQL` first.
    #[arg(long = "type")]
    backend: Option<BackendKind>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write an entry, merging object data into an existing one.
    Add {
        /// Entry id.
        id: String,
        /// JSON payload.
        #[arg(long, default_value = "null")]
        data: String,
        /// Audit message.
        #[arg(long, default_value = "")]
        message: String,
        /// Replace stored data instead of merging.
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
    /// Print one entry.
    Get {
        /// Entry id.
        id: String,
    },
    /// Print entries in store order.
    List {
        /// Maximum entries.
        #[arg(long)]
        limit: Option<u32>,
        /// Entries to skip.
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Delete an entry.
    Remove {
        /// Entry id.
        id: String,
    },
    /// Write a SQL dump of the embedded store.
    Backup {
        /// Destination file. Defaults to the data directory's backups folder.
        dest: Option<PathBuf>,
    },
    /// Promote embedded entries into `MySQL` now.
    Migrate,
    /// List `MySQL` server connections.
    Processlist,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let telemetry = TelemetryConfig {
        json: args.json_logs,
        ..TelemetryConfig::default()
    }
    .with_verbosity(args.verbose);
    init_telemetry(&telemetry).context("failed to install tracing subscriber")?;

    let mut config = StoreConfig::load(args.config.as_deref()).context("failed to load config")?;
    if args.backend.is_some() {
        config.backend = args.backend;
    }

    let facade = LogFacade::new(&args.name, config)
        .with_context(|| format!("failed to create store '{}'", args.name))?;

    let outcome = run(&facade, args.command).await;
    let shutdown = facade.shutdown().await;

    let output = outcome?;
    shutdown.context("failed to shut down store")?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(facade: &LogFacade, command: Command) -> Result<Value> {
    let output = match command {
        Command::Add {
            id,
            data,
            message,
            replace,
        } => {
            let data: Value = serde_json::from_str(&data).context("--data is not valid JSON")?;
            let options = if replace {
                AddOptions::replace()
            } else {
                AddOptions::default()
            };
            let entry = facade
                .add_log(NewLog::new(id, data).with_message(message), options)
                .await?;
            serde_json::to_value(entry)?
        }
        Command::Get { id } => match facade.get_log_by_id(&id).await? {
            Some(entry) => serde_json::to_value(entry)?,
            None => anyhow::bail!("no entry with id '{id}'"),
        },
        Command::List { limit, offset } => {
            let entries = facade.get_logs(Page { limit, offset }).await?;
            serde_json::to_value(entries)?
        }
        Command::Remove { id } => json!({ "removed": facade.remove_log(&id).await? }),
        Command::Backup { dest } => {
            let path = facade.backup(dest.as_deref()).await?;
            json!({ "backup": path.display().to_string() })
        }
        Command::Migrate => outcome_json(facade.migrate_now().await?),
        Command::Processlist => serde_json::to_value(facade.show_process_list().await?)?,
    };
    if let Some(kind) = facade.backend_kind() {
        tracing::debug!(backend = %kind, "command finished");
    }
    Ok(output)
}

fn outcome_json(outcome: MigrationOutcome) -> Value {
    match outcome {
        MigrationOutcome::NoSource => json!({ "status": "no-source" }),
        MigrationOutcome::Unchanged => json!({ "status": "unchanged" }),
        MigrationOutcome::Migrated { copied, skipped } => {
            json!({ "status": "migrated", "copied": copied, "skipped": skipped })
        }
    }
}
