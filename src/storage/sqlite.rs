//! SQLite storage provider, used on its own or as the hybrid cache.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::any::Any;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{require_valid_id, stamp_for_save, StorageProvider};
use crate::error::{Result, StorageError};
use crate::types::{
  DevlogEntry, DevlogFilter, DevlogId, DevlogPriority, DevlogStats, DevlogStatus, DevlogType,
};

/// Schema for the entry table.
///
/// The full entry is stored as JSON in `data`; the other columns are copies
/// used for filtering, searching and aggregation.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devlog_entries (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL,
    title TEXT NOT NULL,
    type TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    assignee TEXT,
    search_text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devlog_entries_status ON devlog_entries(status);
CREATE INDEX IF NOT EXISTS idx_devlog_entries_type ON devlog_entries(type);
CREATE INDEX IF NOT EXISTS idx_devlog_entries_updated ON devlog_entries(updated_at);
"#;

const LIST_ORDER: &str = "ORDER BY updated_at DESC, id DESC";

#[derive(Debug, Clone)]
enum Location {
  File(PathBuf),
  Memory,
}

/// SQLite-based storage provider.
pub struct SqliteStorageProvider {
  location: Location,
  conn: Mutex<Option<Connection>>,
}

impl SqliteStorageProvider {
  /// Provider backed by a database file, created on `initialize`.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      location: Location::File(path.into()),
      conn: Mutex::new(None),
    }
  }

  /// Provider backed by a private in-memory database.
  pub fn in_memory() -> Self {
    Self {
      location: Location::Memory,
      conn: Mutex::new(None),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
    self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Run `f` against the open connection.
  fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let guard = self.lock();
    let conn = guard.as_ref().ok_or(StorageError::NotInitialized("sqlite"))?;
    f(conn)
  }

  fn open(&self) -> Result<Connection> {
    let conn = match &self.location {
      Location::Memory => Connection::open_in_memory()?,
      Location::File(path) => {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
          std::fs::create_dir_all(parent)?;
        }
        Connection::open(path)?
      }
    };
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
  }
}

// ============================================================================
// Row helpers
// ============================================================================

fn format_time(time: DateTime<Utc>) -> String {
  time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn search_text(entry: &DevlogEntry) -> String {
  let mut text = format!("{}\n{}", entry.title, entry.description);
  for note in &entry.notes {
    text.push('\n');
    text.push_str(&note.content);
  }
  text.to_lowercase()
}

fn load(conn: &Connection, id: DevlogId) -> Result<Option<DevlogEntry>> {
  let data: Option<Vec<u8>> = conn
    .query_row(
      "SELECT data FROM devlog_entries WHERE id = ?",
      params![id.get()],
      |row| row.get(0),
    )
    .optional()?;

  match data {
    Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    None => Ok(None),
  }
}

fn write(conn: &Connection, entry: &DevlogEntry) -> Result<()> {
  let id = entry
    .id
    .ok_or_else(|| StorageError::InvalidIdentifier("missing id".to_string()))?;
  require_valid_id(id)?;
  let data = serde_json::to_vec(entry)?;

  conn.execute(
    "INSERT OR REPLACE INTO devlog_entries
       (id, key, title, type, status, priority, assignee, search_text, created_at, updated_at, data)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      id.get(),
      entry.key,
      entry.title,
      entry.devlog_type.as_str(),
      entry.status.as_str(),
      entry.priority.as_str(),
      entry.assignee,
      search_text(entry),
      format_time(entry.created_at),
      format_time(entry.updated_at),
      data,
    ],
  )?;
  Ok(())
}

fn next_id(conn: &Connection) -> Result<DevlogId> {
  let max: i64 = conn.query_row(
    "SELECT COALESCE(MAX(id), 0) FROM devlog_entries",
    [],
    |row| row.get(0),
  )?;
  Ok(DevlogId::new(max + 1))
}

fn query_entries(conn: &Connection, sql: &str, args: &[String]) -> Result<Vec<DevlogEntry>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, Vec<u8>>(0))?;

  let mut entries = Vec::new();
  for data in rows {
    entries.push(serde_json::from_slice(&data?)?);
  }
  Ok(entries)
}

/// Append `column IN (?, ...)` for a non-empty set.
fn push_in_clause<T: ToString>(
  clauses: &mut Vec<String>,
  args: &mut Vec<String>,
  column: &str,
  values: &Option<Vec<T>>,
) {
  if let Some(values) = values.as_ref().filter(|v| !v.is_empty()) {
    let placeholders = vec!["?"; values.len()].join(", ");
    clauses.push(format!("{} IN ({})", column, placeholders));
    args.extend(values.iter().map(ToString::to_string));
  }
}

fn filter_sql(filter: &DevlogFilter) -> (String, Vec<String>) {
  let mut clauses = Vec::new();
  let mut args = Vec::new();

  push_in_clause(&mut clauses, &mut args, "status", &filter.status);
  push_in_clause(&mut clauses, &mut args, "type", &filter.devlog_type);
  push_in_clause(&mut clauses, &mut args, "priority", &filter.priority);

  if let Some(assignee) = &filter.assignee {
    clauses.push("assignee = ?".to_string());
    args.push(assignee.clone());
  }
  // Timestamps are fixed-width RFC 3339, so lexical order is chronological.
  if let Some(from) = filter.from_date {
    clauses.push("created_at >= ?".to_string());
    args.push(from.format("%Y-%m-%d").to_string());
  }
  if let Some(to) = filter.to_date {
    clauses.push("created_at < ?".to_string());
    args.push((to + Duration::days(1)).format("%Y-%m-%d").to_string());
  }

  let where_clause = if clauses.is_empty() {
    String::new()
  } else {
    format!("WHERE {}", clauses.join(" AND "))
  };
  (where_clause, args)
}

fn escape_like(query: &str) -> String {
  let mut escaped = String::with_capacity(query.len());
  for c in query.chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

fn count_by<T: std::str::FromStr + Ord>(
  conn: &Connection,
  column: &str,
) -> Result<std::collections::BTreeMap<T, usize>> {
  let sql = format!(
    "SELECT {col}, COUNT(*) FROM devlog_entries GROUP BY {col}",
    col = column
  );
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt.query_map([], |row| {
    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
  })?;

  let mut counts = std::collections::BTreeMap::new();
  for row in rows {
    let (value, count) = row?;
    match value.parse::<T>() {
      Ok(key) => {
        counts.insert(key, count as usize);
      }
      Err(_) => warn!(column, value = %value, "skipping unknown value in stats"),
    }
  }
  Ok(counts)
}

#[async_trait]
impl StorageProvider for SqliteStorageProvider {
  async fn initialize(&self) -> Result<()> {
    let mut guard = self.lock();
    if guard.is_none() {
      *guard = Some(self.open()?);
      debug!(location = ?self.location, "sqlite storage initialized");
    }
    Ok(())
  }

  async fn exists(&self, id: DevlogId) -> Result<bool> {
    if !id.is_valid() {
      return Ok(false);
    }
    self.with_conn(|conn| {
      let found: Option<i64> = conn
        .query_row(
          "SELECT 1 FROM devlog_entries WHERE id = ?",
          params![id.get()],
          |row| row.get(0),
        )
        .optional()?;
      Ok(found.is_some())
    })
  }

  async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
    if !id.is_valid() {
      return Ok(None);
    }
    self.with_conn(|conn| load(conn, id))
  }

  async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
    if let Some(id) = entry.id {
      require_valid_id(id)?;
    }
    self.with_conn(|conn| {
      let existing = match entry.id {
        Some(id) => load(conn, id)?,
        None => None,
      };
      let next = next_id(conn)?;
      stamp_for_save(&mut entry, next, existing.as_ref());
      write(conn, &entry)?;
      Ok(entry)
    })
  }

  async fn import(&self, entry: &DevlogEntry) -> Result<()> {
    self.with_conn(|conn| write(conn, entry))
  }

  async fn delete(&self, id: DevlogId) -> Result<()> {
    require_valid_id(id)?;
    self.with_conn(|conn| {
      let removed = conn.execute("DELETE FROM devlog_entries WHERE id = ?", params![id.get()])?;
      if removed == 0 {
        debug!(%id, "delete of absent entry");
      }
      Ok(())
    })
  }

  async fn list(&self, filter: Option<&DevlogFilter>) -> Result<Vec<DevlogEntry>> {
    let (where_clause, args) = filter.map(filter_sql).unwrap_or_default();
    let sql = format!(
      "SELECT data FROM devlog_entries {} {}",
      where_clause, LIST_ORDER
    );
    self.with_conn(|conn| query_entries(conn, &sql, &args))
  }

  async fn search(&self, query: &str) -> Result<Vec<DevlogEntry>> {
    let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
    let sql = format!(
      "SELECT data FROM devlog_entries WHERE search_text LIKE ? ESCAPE '\\' {}",
      LIST_ORDER
    );
    self.with_conn(|conn| query_entries(conn, &sql, &[pattern]))
  }

  async fn get_stats(&self) -> Result<DevlogStats> {
    self.with_conn(|conn| {
      let total: i64 = conn.query_row("SELECT COUNT(*) FROM devlog_entries", [], |row| row.get(0))?;
      Ok(DevlogStats {
        total_entries: total as usize,
        by_status: count_by::<DevlogStatus>(conn, "status")?,
        by_type: count_by::<DevlogType>(conn, "type")?,
        by_priority: count_by::<DevlogPriority>(conn, "priority")?,
      })
    })
  }

  async fn get_next_id(&self) -> Result<DevlogId> {
    self.with_conn(next_id)
  }

  async fn dispose(&self) -> Result<()> {
    // Dropping the connection closes it.
    self.lock().take();
    Ok(())
  }

  fn backend_name(&self) -> &'static str {
    "sqlite"
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}
