mod config;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use devlog_store::{
  create_storage, DevlogFilter, DevlogId, DevlogPriority, DevlogStatus, DevlogType,
  HybridStorageProvider, NoteCategory, StorageProvider,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devlog")]
#[command(about = "Inspect and synchronize devlog entries")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./devlog.yaml, then $XDG_CONFIG_HOME/devlog/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List entries, most recently updated first
  List {
    #[arg(long)]
    status: Vec<DevlogStatus>,
    #[arg(long = "type")]
    devlog_type: Vec<DevlogType>,
    #[arg(long)]
    priority: Vec<DevlogPriority>,
    #[arg(long)]
    assignee: Option<String>,
    /// Created on or after (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Created on or before (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
  },
  /// Show one or more entries
  Show {
    #[arg(required = true)]
    ids: Vec<DevlogId>,
  },
  /// Full-text search over titles, descriptions and notes
  Search { query: String },
  /// Counts by status, type and priority
  Stats,
  /// Append a note to an entry
  Note {
    id: DevlogId,
    content: String,
    #[arg(long, default_value = "progress")]
    category: NoteCategory,
    /// Files the note refers to
    #[arg(long = "file")]
    files: Vec<String>,
  },
  /// Delete an entry
  Delete { id: DevlogId },
  /// Synchronize a hybrid store
  Sync {
    #[command(subcommand)]
    action: SyncAction,
  },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum SyncAction {
  /// Remote to cache
  Pull,
  /// Cache to remote
  Push,
  /// Pull, then push
  Both,
  /// Entry counts and sync state
  Status,
}

/// Install the tracing subscriber. The returned guard flushes file logs on drop.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let appender = tracing_appender::rolling::never(dir, name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
      Ok(None)
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
  (!values.is_empty()).then_some(values)
}

async fn run(storage: &dyn StorageProvider, command: Command) -> Result<()> {
  match command {
    Command::List {
      status,
      devlog_type,
      priority,
      assignee,
      from,
      to,
    } => {
      let filter = DevlogFilter {
        status: non_empty(status),
        devlog_type: non_empty(devlog_type),
        priority: non_empty(priority),
        assignee,
        from_date: from,
        to_date: to,
      };
      print_json(&storage.list(Some(&filter)).await?)?;
    }
    Command::Show { ids } => {
      let entries = futures::future::try_join_all(ids.iter().map(|id| storage.get(*id))).await?;
      for (id, entry) in ids.iter().zip(entries) {
        match entry {
          Some(entry) => print_json(&entry)?,
          None => return Err(eyre!("Devlog entry {} not found", id)),
        }
      }
    }
    Command::Search { query } => print_json(&storage.search(&query).await?)?,
    Command::Stats => print_json(&storage.get_stats().await?)?,
    Command::Note {
      id,
      content,
      category,
      files,
    } => {
      let entry = storage.add_note(id, category, &content, files).await?;
      info!(%id, notes = entry.notes.len(), "note added");
      print_json(&entry)?;
    }
    Command::Delete { id } => {
      storage.delete(id).await?;
      info!(%id, "entry deleted");
    }
    Command::Sync { action } => {
      let hybrid = storage
        .as_any()
        .downcast_ref::<HybridStorageProvider>()
        .ok_or_else(|| eyre!("sync requires hybrid storage (configured: {})", storage.backend_name()))?;
      match action {
        SyncAction::Pull => print_json(&hybrid.pull().await?)?,
        SyncAction::Push => print_json(&hybrid.push().await?)?,
        SyncAction::Both => print_json(&hybrid.force_sync_both_directions().await?)?,
        SyncAction::Status => print_json(&hybrid.get_remote_status().await)?,
      }
    }
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let storage = create_storage(&config.storage)?;
  storage.initialize().await?;

  let result = run(storage.as_ref(), args.command).await;
  storage.dispose().await?;
  result
}
