//! In-memory provider for tests, with latency and failure injection.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{require_valid_id, stamp_for_save, StorageProvider};
use crate::error::{Result, StorageError};
use crate::types::{sort_entries, DevlogEntry, DevlogFilter, DevlogId, DevlogStats};

#[derive(Default)]
pub(crate) struct MemoryStorageProvider {
  entries: Mutex<HashMap<DevlogId, DevlogEntry>>,
  remote: bool,
  list_delay: Option<Duration>,
  fail_writes: AtomicBool,
  fail_reads: AtomicBool,
  pub(crate) imports: AtomicUsize,
  pub(crate) gets: AtomicUsize,
  pub(crate) disposed: AtomicBool,
}

impl MemoryStorageProvider {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Reports itself as remote storage.
  pub(crate) fn remote() -> Self {
    Self {
      remote: true,
      ..Self::default()
    }
  }

  /// Every `list` sleeps for `delay` before reading.
  pub(crate) fn with_list_delay(mut self, delay: Duration) -> Self {
    self.list_delay = Some(delay);
    self
  }

  pub(crate) fn with_entries(self, entries: impl IntoIterator<Item = DevlogEntry>) -> Self {
    {
      let mut map = self.lock();
      for entry in entries {
        if let Some(id) = entry.id {
          map.insert(id, entry);
        }
      }
    }
    self
  }

  pub(crate) fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  pub(crate) fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::SeqCst);
  }

  /// Snapshot sorted by id.
  pub(crate) fn snapshot(&self) -> Vec<DevlogEntry> {
    let mut entries: Vec<DevlogEntry> = self.lock().values().cloned().collect();
    entries.sort_by_key(|e| e.id);
    entries
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DevlogId, DevlogEntry>> {
    self.entries.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn check_writes(&self) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(StorageError::RemoteUnavailable("injected write failure".into()));
    }
    Ok(())
  }

  fn check_reads(&self) -> Result<()> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(StorageError::RemoteUnavailable("injected read failure".into()));
    }
    Ok(())
  }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
  async fn initialize(&self) -> Result<()> {
    Ok(())
  }

  async fn exists(&self, id: DevlogId) -> Result<bool> {
    Ok(self.get(id).await?.is_some())
  }

  async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    self.check_reads()?;
    Ok(self.lock().get(&id).cloned())
  }

  async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
    self.check_writes()?;
    let mut map = self.lock();
    let next = DevlogId::new(map.keys().map(|id| id.get()).max().unwrap_or(0) + 1);
    let existing = entry.id.and_then(|id| map.get(&id).cloned());
    stamp_for_save(&mut entry, next, existing.as_ref());
    if let Some(id) = entry.id {
      map.insert(id, entry.clone());
    }
    Ok(entry)
  }

  async fn import(&self, entry: &DevlogEntry) -> Result<()> {
    self.imports.fetch_add(1, Ordering::SeqCst);
    self.check_writes()?;
    if let Some(id) = entry.id {
      self.lock().insert(id, entry.clone());
    }
    Ok(())
  }

  async fn delete(&self, id: DevlogId) -> Result<()> {
    require_valid_id(id)?;
    self.check_writes()?;
    self.lock().remove(&id);
    Ok(())
  }

  async fn list(&self, filter: Option<&DevlogFilter>) -> Result<Vec<DevlogEntry>> {
    if let Some(delay) = self.list_delay {
      tokio::time::sleep(delay).await;
    }
    self.check_reads()?;
    let mut entries: Vec<DevlogEntry> = self
      .lock()
      .values()
      .filter(|e| filter.map_or(true, |f| f.matches(e)))
      .cloned()
      .collect();
    sort_entries(&mut entries);
    Ok(entries)
  }

  async fn search(&self, query: &str) -> Result<Vec<DevlogEntry>> {
    let needle = query.to_lowercase();
    let mut entries: Vec<DevlogEntry> = self
      .lock()
      .values()
      .filter(|e| e.matches_text(&needle))
      .cloned()
      .collect();
    sort_entries(&mut entries);
    Ok(entries)
  }

  async fn get_stats(&self) -> Result<DevlogStats> {
    Ok(DevlogStats::from_entries(self.lock().values()))
  }

  async fn get_next_id(&self) -> Result<DevlogId> {
    Ok(DevlogId::new(
      self.lock().keys().map(|id| id.get()).max().unwrap_or(0) + 1,
    ))
  }

  async fn dispose(&self) -> Result<()> {
    self.disposed.store(true, Ordering::SeqCst);
    Ok(())
  }

  fn is_remote_storage(&self) -> bool {
    self.remote
  }

  fn backend_name(&self) -> &'static str {
    "memory"
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}
