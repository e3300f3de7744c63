use color_eyre::{eyre::eyre, Result};
use devlog_store::StorageConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variables consulted, in order, when the GitHub token is not in
/// the config file.
const TOKEN_VARS: [&str; 2] = ["DEVLOG_GITHUB_TOKEN", "GITHUB_TOKEN"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Backend selection. Defaults to JSON files under `.devlog/`.
  #[serde(default)]
  pub storage: StorageConfig,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./devlog.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/devlog/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("no config file found, using local JSON storage");
        Self::default()
      }
    };
    config.apply_token(|name| std::env::var(name).ok());
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("devlog.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("devlog").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Fill a missing GitHub token from the environment.
  fn apply_token(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    let github = match &mut self.storage {
      StorageConfig::Github(github) => github,
      StorageConfig::Hybrid { github, .. } => github,
      _ => return,
    };
    if github.token.as_deref().is_some_and(|t| !t.trim().is_empty()) {
      return;
    }
    github.token = TOKEN_VARS
      .iter()
      .find_map(|name| lookup(name).filter(|t| !t.trim().is_empty()));
  }
}
