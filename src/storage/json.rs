//! Local JSON-file storage: one pretty-printed file per entry.

use async_trait::async_trait;
use std::any::Any;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{require_valid_id, stamp_for_save, StorageProvider};
use crate::error::{Result, StorageError};
use crate::types::{sort_entries, DevlogEntry, DevlogFilter, DevlogId, DevlogStats};

/// Default directory, relative to the working directory
pub const DEFAULT_DIRECTORY: &str = ".devlog";

/// Storage keeping `<directory>/entries/<id>.json`.
pub struct JsonStorageProvider {
  directory: PathBuf,
  /// Serializes id assignment and writes
  write_lock: Mutex<()>,
}

impl JsonStorageProvider {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      write_lock: Mutex::new(()),
    }
  }

  fn entries_dir(&self) -> PathBuf {
    self.directory.join("entries")
  }

  fn entry_path(&self, id: DevlogId) -> PathBuf {
    self.entries_dir().join(format!("{}.json", id))
  }

  async fn read_entry(path: &Path) -> Result<Option<DevlogEntry>> {
    match fs::read(path).await {
      Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  async fn write_entry(&self, entry: &DevlogEntry) -> Result<()> {
    let id = entry
      .id
      .ok_or_else(|| StorageError::InvalidIdentifier("missing id".to_string()))?;
    require_valid_id(id)?;
    let json = serde_json::to_vec_pretty(entry)?;

    // Write-then-rename so readers never observe a partial file.
    let path = self.entry_path(id);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, &path).await?;
    Ok(())
  }

  async fn read_all(&self) -> Result<Vec<DevlogEntry>> {
    let mut dir = match fs::read_dir(self.entries_dir()).await {
      Ok(dir) => dir,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        return Err(StorageError::NotInitialized("json"))
      }
      Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    while let Some(item) = dir.next_entry().await? {
      let path = item.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      if let Some(entry) = Self::read_entry(&path).await? {
        entries.push(entry);
      }
    }
    Ok(entries)
  }

  async fn max_id(&self) -> Result<i64> {
    Ok(
      self
        .read_all()
        .await?
        .iter()
        .filter_map(|e| e.id.map(|id| id.get()))
        .max()
        .unwrap_or(0),
    )
  }
}

#[async_trait]
impl StorageProvider for JsonStorageProvider {
  async fn initialize(&self) -> Result<()> {
    fs::create_dir_all(self.entries_dir()).await?;
    debug!(directory = %self.directory.display(), "json storage initialized");
    Ok(())
  }

  async fn exists(&self, id: DevlogId) -> Result<bool> {
    Ok(self.get(id).await?.is_some())
  }

  async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
    if !id.is_valid() {
      return Ok(None);
    }
    Self::read_entry(&self.entry_path(id)).await
  }

  async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
    if let Some(id) = entry.id {
      require_valid_id(id)?;
    }
    let _guard = self.write_lock.lock().await;

    let existing = match entry.id {
      Some(id) => Self::read_entry(&self.entry_path(id)).await?,
      None => None,
    };
    let next = DevlogId::new(self.max_id().await? + 1);
    stamp_for_save(&mut entry, next, existing.as_ref());
    self.write_entry(&entry).await?;
    Ok(entry)
  }

  async fn import(&self, entry: &DevlogEntry) -> Result<()> {
    let _guard = self.write_lock.lock().await;
    self.write_entry(entry).await
  }

  async fn delete(&self, id: DevlogId) -> Result<()> {
    require_valid_id(id)?;
    let _guard = self.write_lock.lock().await;
    match fs::remove_file(self.entry_path(id)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => {
        debug!(%id, "delete of absent entry");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn list(&self, filter: Option<&DevlogFilter>) -> Result<Vec<DevlogEntry>> {
    let mut entries = self.read_all().await?;
    if let Some(filter) = filter {
      entries.retain(|e| filter.matches(e));
    }
    sort_entries(&mut entries);
    Ok(entries)
  }

  async fn search(&self, query: &str) -> Result<Vec<DevlogEntry>> {
    let needle = query.to_lowercase();
    let mut entries = self.read_all().await?;
    entries.retain(|e| e.matches_text(&needle));
    sort_entries(&mut entries);
    Ok(entries)
  }

  async fn get_stats(&self) -> Result<DevlogStats> {
    Ok(DevlogStats::from_entries(&self.read_all().await?))
  }

  async fn get_next_id(&self) -> Result<DevlogId> {
    Ok(DevlogId::new(self.max_id().await? + 1))
  }

  async fn dispose(&self) -> Result<()> {
    Ok(())
  }

  fn backend_name(&self) -> &'static str {
    "json"
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}
