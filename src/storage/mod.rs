//! Storage provider contract and its backends.
//!
//! Every backend implements [`StorageProvider`]:
//! - [`JsonStorageProvider`]: one JSON file per entry in a local directory
//! - [`SqliteStorageProvider`]: embedded database, also used as the hybrid cache
//! - [`GithubStorageProvider`]: entries stored as GitHub issues
//! - [`HybridStorageProvider`]: GitHub as source of truth, SQLite as read cache
//!
//! [`create_storage`] selects a backend from a [`StorageConfig`].

mod factory;
mod github;
mod hybrid;
mod json;
#[cfg(test)]
pub(crate) mod memory;
mod sqlite;

use async_trait::async_trait;
use std::any::Any;

use crate::error::{Result, StorageError};
use crate::types::{DevlogEntry, DevlogFilter, DevlogId, DevlogStats, NoteCategory};

pub use factory::{create_storage, SqliteStorageConfig, StorageConfig};
pub use github::GithubStorageProvider;
pub use hybrid::{HybridStorageProvider, RemoteStatus, SyncOutcome, SyncReport, SyncStats};
pub use json::JsonStorageProvider;
pub use sqlite::SqliteStorageProvider;

/// Storage trait implemented by every backend.
///
/// `initialize` must complete before any other call. Lookups by a malformed id
/// (see [`DevlogId::is_valid`]) behave as "not found"; `delete` rejects them
/// with [`StorageError::InvalidIdentifier`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
  /// Idempotent setup (directories, tables, connections).
  async fn initialize(&self) -> Result<()>;

  async fn exists(&self, id: DevlogId) -> Result<bool>;

  async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>>;

  /// Upsert. Assigns an id when unset, stamps `created_at` on insert and
  /// refreshes `updated_at`. Returns the entry as persisted.
  async fn save(&self, entry: DevlogEntry) -> Result<DevlogEntry>;

  /// Upsert exactly as given, timestamps included. Used by synchronization.
  async fn import(&self, entry: &DevlogEntry) -> Result<()>;

  /// Deleting a well-formed id that does not exist is not an error.
  async fn delete(&self, id: DevlogId) -> Result<()>;

  async fn list(&self, filter: Option<&DevlogFilter>) -> Result<Vec<DevlogEntry>>;

  /// Free-text search over title, description and notes.
  async fn search(&self, query: &str) -> Result<Vec<DevlogEntry>>;

  async fn get_stats(&self) -> Result<DevlogStats>;

  /// Id the backend would assign to the next new entry.
  async fn get_next_id(&self) -> Result<DevlogId>;

  /// Release held resources. The provider must not be used afterwards.
  async fn dispose(&self) -> Result<()>;

  fn is_remote_storage(&self) -> bool {
    false
  }

  fn is_git_based(&self) -> bool {
    false
  }

  /// Short backend name used in status reports and logs.
  fn backend_name(&self) -> &'static str;

  /// Downcast hook for backend-specific operations (e.g. hybrid sync).
  fn as_any(&self) -> &dyn Any;

  /// Append a note to an existing entry and save it.
  async fn add_note(
    &self,
    id: DevlogId,
    category: NoteCategory,
    content: &str,
    files: Vec<String>,
  ) -> Result<DevlogEntry> {
    let mut entry = self.get(id).await?.ok_or(StorageError::NotFound(id))?;
    entry.add_note(category, content, files);
    self.save(entry).await
  }
}

/// Reject malformed ids for operations that cannot proceed without one.
pub(crate) fn require_valid_id(id: DevlogId) -> Result<DevlogId> {
  if id.is_valid() {
    Ok(id)
  } else {
    Err(StorageError::InvalidIdentifier(id.to_string()))
  }
}

/// Prepare an entry for `save`: assign `next_id` when unset and stamp times.
pub(crate) fn stamp_for_save(entry: &mut DevlogEntry, next_id: DevlogId, existing: Option<&DevlogEntry>) {
  if entry.id.is_none() {
    entry.id = Some(next_id);
  }
  if let Some(existing) = existing {
    entry.created_at = existing.created_at;
    entry.updated_at = entry.updated_at.max(existing.updated_at);
  }
  entry.touch();
}
