//! `config-binder` command-line tool.
//!
//! Binds the members listed in a TOML manifest to a directory-backed store
//! and reads, writes or watches them.
//!
//! ```text
//! config-binder --config binder.toml get hostname
//! config-binder --config binder.toml set hostname example.org
//! config-binder --config binder.toml dump
//! config-binder --config binder.toml watch
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use config_binder::config::load_config;
use config_binder::observability::init_logging;
use config_binder::{ConfigBinder, FsStore, TypeTag, Value};

#[derive(Parser)]
#[command(name = "config-binder")]
#[command(about = "Read and write configuration bound to a hierarchical store", long_about = None)]
struct Cli {
    /// Manifest describing base paths, store and members
    #[arg(short, long, default_value = "config-binder.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current value of a member
    Get { name: String },
    /// Write a value to the primary base path
    Set { name: String, value: String },
    /// Remove a member from the primary base path
    Unset { name: String },
    /// Print every member as JSON
    Dump,
    /// Print member changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.logging)?;

    let store = Arc::new(FsStore::open(&config.store.root)?);
    let binder = ConfigBinder::bind(store, &config.descriptor(), &config.base_path_refs())?;
    let result = run(&binder, cli.command).await;
    binder.close();
    result
}

async fn run(binder: &ConfigBinder, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let config = binder.config();
    match command {
        Commands::Get { name } => {
            println!("{}", render(&config.get(&name)?));
        }
        Commands::Set { name, value } => {
            let value = match config.spec(&name)?.declared_type {
                TypeTag::Structured => Value::Structured(serde_json::from_str(&value)?),
                _ => Value::Text(value),
            };
            config.set(&name, value)?;
        }
        Commands::Unset { name } => {
            config.unset(&name)?;
        }
        Commands::Dump => {
            let snapshot = serde_json::Value::Object(config.snapshot()?);
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Watch => {
            let mut changes = binder.subscribe();
            tracing::info!(base_paths = ?binder.base_paths(), "Watching for changes");
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Ok(change) => {
                            let value = config.get(&change.name).map(|v| render(&v));
                            match value {
                                Ok(v) => println!("{} {} ({}) = {}", change.kind, change.name, change.base_path, v),
                                Err(e) => eprintln!("{} {} ({}): {}", change.kind, change.name, change.base_path, e),
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Change stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

fn render(value: &Value) -> String {
    match value {
        Value::Absent => String::new(),
        Value::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}
