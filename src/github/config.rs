//! GitHub storage configuration and its defaults.

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_LABEL_PREFIX: &str = "devlog";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubStorageConfig {
  pub owner: String,
  pub repo: String,
  /// API token. The config loader may fill this from the environment.
  #[serde(default)]
  pub token: Option<String>,
  /// Custom API base URL (GitHub Enterprise)
  #[serde(default)]
  pub api_url: Option<String>,
  #[serde(default)]
  pub branch: Option<String>,
  #[serde(default)]
  pub label_prefix: Option<String>,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
  pub requests_per_hour: u32,
  #[serde(alias = "retryDelay")]
  pub retry_delay_ms: u64,
  pub max_retries: u32,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      requests_per_hour: 5000,
      retry_delay_ms: 1000,
      max_retries: 3,
    }
  }
}

/// In-memory read cache kept by the GitHub provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
  pub enabled: bool,
  #[serde(alias = "ttl")]
  pub ttl_ms: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_ms: 300_000,
    }
  }
}

impl GithubStorageConfig {
  pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      repo: repo.into(),
      token: Some(token.into()),
      api_url: None,
      branch: None,
      label_prefix: None,
      rate_limit: RateLimitConfig::default(),
      cache: CacheConfig::default(),
      timeout_ms: None,
    }
  }

  /// Fill every optional field with its default.
  pub fn normalized(mut self) -> Self {
    self.api_url = Some(
      self
        .api_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
    );
    self.branch = Some(self.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()));
    self.label_prefix = Some(
      self
        .label_prefix
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string()),
    );
    self.timeout_ms = Some(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
    self
  }

  pub fn api_url(&self) -> &str {
    self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
  }

  pub fn label_prefix(&self) -> &str {
    self.label_prefix.as_deref().unwrap_or(DEFAULT_LABEL_PREFIX)
  }

  pub fn timeout_ms(&self) -> u64 {
    self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalized_fills_defaults() {
    let mut config = GithubStorageConfig::new("octo", "notes", "t");
    config.label_prefix = Some("  ".into());
    let config = config.normalized();

    assert_eq!(config.api_url.as_deref(), Some(DEFAULT_API_URL));
    assert_eq!(config.branch.as_deref(), Some("main"));
    assert_eq!(config.label_prefix(), "devlog");
    assert_eq!(config.timeout_ms(), 30_000);
    assert_eq!(config.rate_limit.requests_per_hour, 5000);
    assert!(config.cache.enabled);
  }

  #[test]
  fn test_deserialize_with_aliases() {
    let config: GithubStorageConfig = serde_json::from_value(serde_json::json!({
      "owner": "octo",
      "repo": "notes",
      "apiUrl": "https://ghe.example.com/api/v3",
      "rateLimit": { "requestsPerHour": 100, "retryDelay": 50 },
      "cache": { "enabled": false, "ttl": 10 }
    }))
    .unwrap();

    assert_eq!(config.token, None);
    assert_eq!(config.api_url(), "https://ghe.example.com/api/v3");
    assert_eq!(config.rate_limit.requests_per_hour, 100);
    assert_eq!(config.rate_limit.retry_delay_ms, 50);
    assert_eq!(config.rate_limit.max_retries, 3);
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl_ms, 10);
  }
}
