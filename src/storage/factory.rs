//! Storage selection from configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::json::DEFAULT_DIRECTORY;
use super::{
  GithubStorageProvider, HybridStorageProvider, JsonStorageProvider, SqliteStorageProvider,
  StorageProvider,
};
use crate::error::{Result, StorageError};
use crate::github::GithubStorageConfig;

/// Which backend to use and how to reach it, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageConfig {
  #[serde(alias = "local-file")]
  Json {
    #[serde(default)]
    directory: Option<PathBuf>,
  },
  #[serde(alias = "database", alias = "cache")]
  Sqlite(SqliteStorageConfig),
  #[serde(alias = "remote")]
  Github(GithubStorageConfig),
  #[serde(rename_all = "camelCase")]
  Hybrid {
    github: GithubStorageConfig,
    cache: SqliteStorageConfig,
    #[serde(default)]
    sync_interval_ms: Option<u64>,
  },
}

impl Default for StorageConfig {
  fn default() -> Self {
    StorageConfig::Json { directory: None }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteStorageConfig {
  #[serde(default)]
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub connection_string: Option<String>,
}

enum SqliteTarget {
  File(PathBuf),
  Memory,
}

impl SqliteStorageConfig {
  pub fn with_path(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      connection_string: None,
    }
  }

  /// `path` wins over `connection_string`. Accepted connection strings are
  /// `:memory:` and the `sqlite:` / `file:` schemes.
  fn resolve(&self) -> Result<SqliteTarget> {
    if let Some(path) = &self.path {
      return Ok(SqliteTarget::File(path.clone()));
    }
    let Some(raw) = self.connection_string.as_deref().map(str::trim) else {
      return Err(StorageError::Configuration(
        "sqlite storage requires a path or connectionString".into(),
      ));
    };

    let location = ["sqlite://", "sqlite:", "file:"]
      .iter()
      .find_map(|scheme| raw.strip_prefix(scheme))
      .or_else(|| (!raw.contains("://")).then_some(raw))
      .ok_or_else(|| {
        StorageError::Configuration(format!("unsupported sqlite connection string: {}", raw))
      })?;
    // Query parameters (e.g. `?mode=rwc`) are not used.
    let location = location.split('?').next().unwrap_or_default();

    match location {
      "" => Err(StorageError::Configuration("empty sqlite connection string".into())),
      ":memory:" => Ok(SqliteTarget::Memory),
      path => Ok(SqliteTarget::File(PathBuf::from(path))),
    }
  }

  fn build(&self) -> Result<SqliteStorageProvider> {
    Ok(match self.resolve()? {
      SqliteTarget::File(path) => SqliteStorageProvider::new(path),
      SqliteTarget::Memory => SqliteStorageProvider::in_memory(),
    })
  }
}

/// Build the provider described by `config`.
///
/// Configuration is validated here; no I/O happens until the caller runs
/// `initialize`.
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn StorageProvider>> {
  let storage: Arc<dyn StorageProvider> = match config {
    StorageConfig::Json { directory } => Arc::new(JsonStorageProvider::new(
      directory
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY)),
    )),
    StorageConfig::Sqlite(sqlite) => Arc::new(sqlite.build()?),
    StorageConfig::Github(github) => Arc::new(GithubStorageProvider::new(github.clone())?),
    StorageConfig::Hybrid {
      github,
      cache,
      sync_interval_ms,
    } => {
      let remote = Arc::new(GithubStorageProvider::new(github.clone())?);
      let cache = Arc::new(cache.build()?);
      let mut hybrid = HybridStorageProvider::new(remote, cache);
      if let Some(ms) = sync_interval_ms.filter(|ms| *ms > 0) {
        hybrid = hybrid.with_sync_interval(Duration::from_millis(ms));
      }
      Arc::new(hybrid)
    }
  };
  Ok(storage)
}
