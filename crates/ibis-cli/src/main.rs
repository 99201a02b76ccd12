//! `ibis`: command-line front end for the Ibis knowledge base.
//!
//! Each invocation loads the store, runs one operation, saves if anything
//! changed and prints the result as JSON.
//!
//! # Usage
//!
//! ```
//! ibis topic add Paris --kind place --parent Europe
//! ibis source add "Book X" --kind book --author "A. Author"
//! ibis fact record "The Eiffel Tower opened" --topic Paris --source <id> --on 1889-03-31
//! ibis query --place Europe --from 1800-01-01 --to 1899-12-31
//! ```

mod commands;
mod parse;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use ibis_core::{KnowledgeBase, Policy, store::SnapshotStore};
use ibis_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ibis", author, version, about = "Sourced facts under hierarchical topics")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "ibis.toml")]
  config: PathBuf,

  /// SQLite file to operate on; overrides `store_path` from the config.
  #[arg(long, env = "IBIS_STORE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Shape of `ibis.toml` and the `IBIS_*` environment.
#[derive(Deserialize, Debug)]
struct Settings {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  policy:     Policy,
}

fn default_store_path() -> PathBuf { PathBuf::from("ibis.sqlite") }

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("IBIS").separator("__"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise settings")
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = load_settings(&cli.config)?;
  let store_path = expand_tilde(cli.store.as_deref().unwrap_or(settings.store_path.as_path()));

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let records = store.load().await.context("failed to load snapshot")?;
  let kb = KnowledgeBase::from_records(records, settings.policy)
    .context("stored snapshot is inconsistent")?;

  let outcome = commands::run(&kb, cli.command)?;
  if outcome.changed {
    store
      .save(&kb.snapshot().export())
      .await
      .context("failed to save snapshot")?;
  }

  println!("{}", serde_json::to_string_pretty(&outcome.output)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
