//! Hybrid storage: a remote provider as source of truth with a local cache.
//!
//! Reads are served cache-first (single lookups fall back to the remote and
//! fill the cache). Writes go to both backends concurrently, without rollback
//! when only one side fails. Reconciliation is explicit (`pull`/`push`) or
//! periodic when a sync interval is configured.

use async_trait::async_trait;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{require_valid_id, stamp_for_save, StorageProvider};
use crate::error::Result;
use crate::types::{DevlogEntry, DevlogFilter, DevlogId, DevlogStats};

/// Counts of a completed reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
  pub upserted: usize,
  pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SyncOutcome {
  Completed(SyncReport),
  /// Another reconciliation was already running; nothing was done.
  Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
  pub remote_count: usize,
  pub cache_count: usize,
  /// True whenever the counts differ. Equal counts with different contents
  /// still report `false`.
  pub needs_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
  pub backend: &'static str,
  pub sync_in_progress: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stats: Option<SyncStats>,
  /// Why the stats could not be gathered
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Clears the in-progress flag when dropped, whatever the exit path.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for SyncGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// State shared with the background sync task.
struct SyncEngine {
  remote: Arc<dyn StorageProvider>,
  cache: Arc<dyn StorageProvider>,
  syncing: AtomicBool,
}

impl SyncEngine {
  async fn remote_to_cache(&self) -> Result<SyncOutcome> {
    let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
      debug!("sync already in progress, skipping");
      return Ok(SyncOutcome::Skipped);
    };

    let (remote, cached) = tokio::try_join!(self.remote.list(None), self.cache.list(None))?;
    let cached: HashMap<DevlogId, DevlogEntry> = cached
      .into_iter()
      .filter_map(|e| e.id.map(|id| (id, e)))
      .collect();
    let remote_ids: HashSet<DevlogId> = remote.iter().filter_map(|e| e.id).collect();

    let upserts: Vec<&DevlogEntry> = remote
      .iter()
      .filter(|r| {
        r.id.is_some_and(|id| {
          cached
            .get(&id)
            .map_or(true, |c| r.updated_at > c.updated_at)
        })
      })
      .collect();
    let deletions: Vec<DevlogId> = cached
      .keys()
      .filter(|id| !remote_ids.contains(id))
      .copied()
      .collect();

    for entry in &upserts {
      self.cache.import(entry).await?;
    }
    for id in &deletions {
      self.cache.delete(*id).await?;
    }

    let report = SyncReport {
      upserted: upserts.len(),
      deleted: deletions.len(),
    };
    info!(upserted = report.upserted, deleted = report.deleted, "synced remote to cache");
    Ok(SyncOutcome::Completed(report))
  }

  async fn cache_to_remote(&self) -> Result<SyncOutcome> {
    let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
      debug!("sync already in progress, skipping");
      return Ok(SyncOutcome::Skipped);
    };

    let entries = self.cache.list(None).await?;
    for entry in &entries {
      self.remote.import(entry).await?;
    }

    info!(pushed = entries.len(), "synced cache to remote");
    Ok(SyncOutcome::Completed(SyncReport {
      upserted: entries.len(),
      deleted: 0,
    }))
  }

  async fn stats(&self) -> Result<SyncStats> {
    let (remote, cache) = tokio::try_join!(self.remote.list(None), self.cache.list(None))?;
    Ok(SyncStats {
      remote_count: remote.len(),
      cache_count: cache.len(),
      needs_sync: remote.len() != cache.len(),
    })
  }
}

/// Join the results of a dual write, preferring the remote error.
fn join_writes(operation: &str, id: Option<DevlogId>, remote: Result<()>, cache: Result<()>) -> Result<()> {
  match (remote, cache) {
    (Ok(()), Ok(())) => Ok(()),
    (Err(e), Ok(())) => {
      warn!(operation, ?id, error = %e, "remote write failed, cache was updated");
      Err(e)
    }
    (Ok(()), Err(e)) => {
      warn!(operation, ?id, error = %e, "cache write failed, remote was updated");
      Err(e)
    }
    (Err(remote), Err(_)) => Err(remote),
  }
}

pub struct HybridStorageProvider {
  engine: Arc<SyncEngine>,
  sync_interval: Option<Duration>,
  sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl HybridStorageProvider {
  pub fn new(remote: Arc<dyn StorageProvider>, cache: Arc<dyn StorageProvider>) -> Self {
    Self {
      engine: Arc::new(SyncEngine {
        remote,
        cache,
        syncing: AtomicBool::new(false),
      }),
      sync_interval: None,
      sync_task: Mutex::new(None),
    }
  }

  /// Run remote → cache every `interval` once initialized.
  pub fn with_sync_interval(mut self, interval: Duration) -> Self {
    self.sync_interval = Some(interval);
    self
  }

  pub fn remote(&self) -> &Arc<dyn StorageProvider> {
    &self.engine.remote
  }

  pub fn cache(&self) -> &Arc<dyn StorageProvider> {
    &self.engine.cache
  }

  pub fn is_syncing(&self) -> bool {
    self.engine.syncing.load(Ordering::Acquire)
  }

  /// Make the cache mirror the remote: add missing entries, refresh entries
  /// the remote updated more recently, drop entries the remote no longer has.
  pub async fn sync_from_remote_to_cache(&self) -> Result<SyncOutcome> {
    self.engine.remote_to_cache().await
  }

  /// Push every cached entry to the remote, without comparing timestamps.
  pub async fn sync_from_cache_to_git(&self) -> Result<SyncOutcome> {
    self.engine.cache_to_remote().await
  }

  /// Remote → cache, then cache → remote. Not atomic.
  pub async fn force_sync_both_directions(&self) -> Result<(SyncOutcome, SyncOutcome)> {
    let pulled = self.sync_from_remote_to_cache().await?;
    let pushed = self.sync_from_cache_to_git().await?;
    Ok((pulled, pushed))
  }

  pub async fn get_sync_stats(&self) -> Result<SyncStats> {
    self.engine.stats().await
  }

  /// Initialize both backends and fill the cache from the remote.
  pub async fn clone_remote(&self) -> Result<SyncOutcome> {
    self.initialize().await?;
    self.sync_from_remote_to_cache().await
  }

  pub async fn pull(&self) -> Result<SyncOutcome> {
    self.sync_from_remote_to_cache().await
  }

  pub async fn push(&self) -> Result<SyncOutcome> {
    self.sync_from_cache_to_git().await
  }

  /// The remote is authoritative, so conflicts resolve by pulling.
  pub async fn resolve_conflicts(&self) -> Result<SyncOutcome> {
    self.sync_from_remote_to_cache().await
  }

  /// Never fails; an unreachable remote is reported in `error`.
  pub async fn get_remote_status(&self) -> RemoteStatus {
    let (stats, error) = match self.engine.stats().await {
      Ok(stats) => (Some(stats), None),
      Err(e) => (None, Some(e.to_string())),
    };
    RemoteStatus {
      backend: self.engine.remote.backend_name(),
      sync_in_progress: self.is_syncing(),
      stats,
      error,
    }
  }

  fn start_background_sync(&self) {
    let Some(period) = self.sync_interval else {
      return;
    };
    let mut task = self.sync_task.lock().unwrap_or_else(|p| p.into_inner());
    if task.is_some() {
      return;
    }

    let engine = Arc::clone(&self.engine);
    *task = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      // The first tick completes immediately.
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if let Err(e) = engine.remote_to_cache().await {
          warn!(error = %e, "background sync failed");
        }
      }
    }));
    debug!(interval_ms = period.as_millis() as u64, "started background sync");
  }

  fn stop_background_sync(&self) {
    let task = self
      .sync_task
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .take();
    if let Some(task) = task {
      task.abort();
    }
  }
}

impl Drop for HybridStorageProvider {
  fn drop(&mut self) {
    self.stop_background_sync();
  }
}

#[async_trait]
impl StorageProvider for HybridStorageProvider {
  async fn initialize(&self) -> Result<()> {
    tokio::try_join!(self.engine.remote.initialize(), self.engine.cache.initialize())?;
    self.start_background_sync();
    Ok(())
  }

  async fn exists(&self, id: DevlogId) -> Result<bool> {
    Ok(self.get(id).await?.is_some())
  }

  async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
    if !id.is_valid() {
      return Ok(None);
    }
    if let Some(entry) = self.engine.cache.get(id).await? {
      return Ok(Some(entry));
    }

    let Some(entry) = self.engine.remote.get(id).await? else {
      return Ok(None);
    };
    debug!(%id, "cache miss served by remote");
    if let Err(e) = self.engine.cache.import(&entry).await {
      warn!(%id, error = %e, "failed to fill cache");
    }
    Ok(Some(entry))
  }

  async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
    let (next, existing) = match entry.id {
      Some(id) => {
        require_valid_id(id)?;
        let existing = match self.engine.cache.get(id).await? {
          Some(e) => Some(e),
          None => self.engine.remote.get(id).await?,
        };
        (id, existing)
      }
      None => (self.engine.remote.get_next_id().await?, None),
    };
    stamp_for_save(&mut entry, next, existing.as_ref());

    let (remote, cache) = tokio::join!(
      self.engine.remote.import(&entry),
      self.engine.cache.import(&entry)
    );
    join_writes("save", entry.id, remote, cache)?;
    Ok(entry)
  }

  async fn import(&self, entry: &DevlogEntry) -> Result<()> {
    let (remote, cache) = tokio::join!(
      self.engine.remote.import(entry),
      self.engine.cache.import(entry)
    );
    join_writes("import", entry.id, remote, cache)
  }

  async fn delete(&self, id: DevlogId) -> Result<()> {
    require_valid_id(id)?;
    let (remote, cache) = tokio::join!(self.engine.remote.delete(id), self.engine.cache.delete(id));
    join_writes("delete", Some(id), remote, cache)
  }

  async fn list(&self, filter: Option<&DevlogFilter>) -> Result<Vec<DevlogEntry>> {
    self.engine.cache.list(filter).await
  }

  async fn search(&self, query: &str) -> Result<Vec<DevlogEntry>> {
    self.engine.cache.search(query).await
  }

  async fn get_stats(&self) -> Result<DevlogStats> {
    self.engine.cache.get_stats().await
  }

  async fn get_next_id(&self) -> Result<DevlogId> {
    self.engine.remote.get_next_id().await
  }

  async fn dispose(&self) -> Result<()> {
    self.stop_background_sync();
    tokio::try_join!(self.engine.remote.dispose(), self.engine.cache.dispose())?;
    Ok(())
  }

  fn is_remote_storage(&self) -> bool {
    true
  }

  fn backend_name(&self) -> &'static str {
    "hybrid"
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}
