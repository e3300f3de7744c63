//! GitHub storage provider: one issue per devlog entry.
//!
//! Issue numbers are not devlog ids. The provider assigns time-based ids,
//! records the issue number in the entry's `github` external reference and
//! keeps an id → issue index for the lifetime of the process. Unknown ids are
//! found by searching for their metadata marker.

use async_trait::async_trait;
use chrono::Utc;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{require_valid_id, stamp_for_save, StorageProvider};
use crate::error::{Result, StorageError};
use crate::github::api_types::{ApiIssue, IssueRequest};
use crate::github::client::{GithubClient, IssueApi};
use crate::github::config::GithubStorageConfig;
use crate::github::mapper::{delete_request, entry_to_issue, is_tracked, issue_number, issue_to_entry};
use crate::github::query::QueryBuilder;
use crate::github::rate_limit::RateLimiter;
use crate::types::{sort_entries, DevlogEntry, DevlogFilter, DevlogId, DevlogStats};

/// Page size for search and listing (the API maximum)
const PER_PAGE: u32 = 100;

/// The search API serves at most this many results per query
const MAX_SEARCH_RESULTS: usize = 1000;

struct CachedEntry {
  stored_at: Instant,
  entry: DevlogEntry,
}

#[derive(Default)]
struct ProviderState {
  /// Issue number per devlog id, learned from reads and writes
  index: HashMap<DevlogId, u64>,
  cache: HashMap<DevlogId, CachedEntry>,
}

pub struct GithubStorageProvider {
  config: GithubStorageConfig,
  api: Arc<dyn IssueApi>,
  limiter: RateLimiter,
  queries: QueryBuilder,
  state: Mutex<ProviderState>,
  last_id: AtomicI64,
  initialized: AtomicBool,
}

impl GithubStorageProvider {
  /// Provider talking to the GitHub REST API. Requires owner, repo and token.
  pub fn new(config: GithubStorageConfig) -> Result<Self> {
    let config = config.normalized();
    validate(&config)?;
    if config.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
      return Err(StorageError::Configuration("github storage requires a token".into()));
    }
    let client = GithubClient::new(&config)?;
    Ok(Self::with_api(config, Arc::new(client)))
  }

  /// Provider over any [`IssueApi`] implementation.
  pub fn with_api(config: GithubStorageConfig, api: Arc<dyn IssueApi>) -> Self {
    let config = config.normalized();
    let queries = QueryBuilder::new(&config.owner, &config.repo, config.label_prefix());
    Self {
      limiter: RateLimiter::new(config.rate_limit),
      queries,
      api,
      config,
      state: Mutex::new(ProviderState::default()),
      last_id: AtomicI64::new(0),
      initialized: AtomicBool::new(false),
    }
  }

  pub fn config(&self) -> &GithubStorageConfig {
    &self.config
  }

  fn prefix(&self) -> &str {
    self.config.label_prefix()
  }

  fn lock(&self) -> MutexGuard<'_, ProviderState> {
    self.state.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn ensure_initialized(&self) -> Result<()> {
    if self.initialized.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(StorageError::NotInitialized("github"))
    }
  }

  // ==========================================================================
  // Read cache
  // ==========================================================================

  fn cached(&self, id: DevlogId) -> Option<DevlogEntry> {
    if !self.config.cache.enabled {
      return None;
    }
    let ttl = Duration::from_millis(self.config.cache.ttl_ms);
    let mut state = self.lock();
    match state.cache.get(&id) {
      Some(c) if c.stored_at.elapsed() < ttl => Some(c.entry.clone()),
      Some(_) => {
        state.cache.remove(&id);
        None
      }
      None => None,
    }
  }

  /// Record the issue behind an entry and refresh the read cache.
  fn remember(&self, entry: &DevlogEntry) {
    let Some(id) = entry.id else {
      return;
    };
    let mut state = self.lock();
    if let Some(number) = issue_number(entry) {
      state.index.insert(id, number);
    }
    if self.config.cache.enabled {
      state.cache.insert(
        id,
        CachedEntry {
          stored_at: Instant::now(),
          entry: entry.clone(),
        },
      );
    }
  }

  fn forget(&self, id: DevlogId) {
    let mut state = self.lock();
    state.index.remove(&id);
    state.cache.remove(&id);
  }

  // ==========================================================================
  // API access (every call goes through the rate limiter)
  // ==========================================================================

  async fn fetch_issue(&self, number: u64) -> Result<Option<ApiIssue>> {
    let api = self.api.as_ref();
    self.limiter.execute(move || api.get_issue(number)).await
  }

  /// Every page of a search. Fails with `IncompleteResults` rather than
  /// returning a partial set when GitHub reports a timed-out query or more
  /// matches than the search API will serve.
  async fn search_all(&self, query: &str) -> Result<Vec<ApiIssue>> {
    let api = self.api.as_ref();
    let mut issues = Vec::new();
    let mut page = 1;

    loop {
      let response = self
        .limiter
        .execute(move || api.search_issues(query, page, PER_PAGE))
        .await?;

      let count = response.items.len();
      let total = response.total_count;
      issues.extend(response.items);
      debug!(query, page, count, total, "fetched search page");

      if response.incomplete_results {
        return Err(StorageError::IncompleteResults {
          fetched: issues.len(),
          total,
        });
      }
      if count < PER_PAGE as usize || issues.len() as u64 >= total {
        break;
      }
      if issues.len() >= MAX_SEARCH_RESULTS {
        return Err(StorageError::IncompleteResults {
          fetched: issues.len(),
          total,
        });
      }
      page += 1;
    }

    Ok(issues)
  }

  /// Every issue carrying the devlog label, open or closed, from the
  /// repository issues endpoint. Pages until a short page.
  async fn list_all(&self) -> Result<Vec<ApiIssue>> {
    let api = self.api.as_ref();
    let label = self.prefix();
    let mut issues = Vec::new();
    let mut page = 1;

    loop {
      let items = self
        .limiter
        .execute(move || api.list_issues(label, page, PER_PAGE))
        .await?;

      let count = items.len();
      issues.extend(items);
      debug!(label, page, count, "fetched issue page");

      if count < PER_PAGE as usize {
        break;
      }
      page += 1;
    }

    Ok(issues)
  }

  /// Map tracked issues to entries, remembering their issue numbers.
  fn entries_from(&self, issues: &[ApiIssue]) -> Vec<DevlogEntry> {
    let prefix = self.prefix();
    issues
      .iter()
      .filter(|issue| is_tracked(issue, prefix))
      .map(|issue| {
        let entry = issue_to_entry(issue, prefix);
        self.remember(&entry);
        entry
      })
      .collect()
  }

  /// The live issue holding `id`, trying `hint` and the index before
  /// searching for the metadata marker.
  async fn locate(&self, id: DevlogId, hint: Option<u64>) -> Result<Option<(ApiIssue, DevlogEntry)>> {
    let prefix = self.prefix();
    let known = hint.or_else(|| self.lock().index.get(&id).copied());

    if let Some(number) = known {
      match self.fetch_issue(number).await? {
        Some(issue) => {
          let entry = issue_to_entry(&issue, prefix);
          if entry.id == Some(id) {
            if !is_tracked(&issue, prefix) {
              debug!(%id, number, "issue was deleted");
              return Ok(None);
            }
            return Ok(Some((issue, entry)));
          }
        }
        None => debug!(%id, number, "indexed issue no longer exists"),
      }
      self.forget(id);
    }

    let candidates = self.search_all(&self.queries.id_lookup(id)).await?;
    Ok(
      candidates
        .into_iter()
        .filter(|issue| is_tracked(issue, prefix))
        .map(|issue| {
          let entry = issue_to_entry(&issue, prefix);
          (issue, entry)
        })
        .find(|(_, entry)| entry.id == Some(id)),
    )
  }

  /// Create or update the issue for `entry` and return the stored entry.
  async fn write(&self, entry: &DevlogEntry, number: Option<u64>) -> Result<DevlogEntry> {
    let request: IssueRequest = entry_to_issue(entry, self.prefix())?;
    let api = self.api.as_ref();
    let request = &request;

    let issue = match number {
      Some(number) => {
        debug!(id = ?entry.id, number, "updating issue");
        self
          .limiter
          .execute(move || api.update_issue(number, request))
          .await?
      }
      None => {
        let issue = self.limiter.execute(move || api.create_issue(request)).await?;
        info!(id = ?entry.id, number = issue.number, "created issue");
        issue
      }
    };

    let stored = issue_to_entry(&issue, self.prefix());
    self.remember(&stored);
    Ok(stored)
  }

  fn next_surrogate_id(&self) -> DevlogId {
    let now = Utc::now().timestamp_millis();
    let previous = self
      .last_id
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
      .unwrap_or(now);
    DevlogId::new(now.max(previous + 1))
  }
}

fn validate(config: &GithubStorageConfig) -> Result<()> {
  if config.owner.trim().is_empty() {
    return Err(StorageError::Configuration("github storage requires an owner".into()));
  }
  if config.repo.trim().is_empty() {
    return Err(StorageError::Configuration("github storage requires a repo".into()));
  }
  Ok(())
}

#[async_trait]
impl StorageProvider for GithubStorageProvider {
  async fn initialize(&self) -> Result<()> {
    validate(&self.config)?;
    self.initialized.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn exists(&self, id: DevlogId) -> Result<bool> {
    Ok(self.get(id).await?.is_some())
  }

  async fn get(&self, id: DevlogId) -> Result<Option<DevlogEntry>> {
    if !id.is_valid() {
      return Ok(None);
    }
    self.ensure_initialized()?;

    if let Some(entry) = self.cached(id) {
      debug!(%id, "cache hit");
      return Ok(Some(entry));
    }

    match self.locate(id, None).await? {
      Some((_, entry)) => {
        self.remember(&entry);
        Ok(Some(entry))
      }
      None => Ok(None),
    }
  }

  async fn save(&self, mut entry: DevlogEntry) -> Result<DevlogEntry> {
    self.ensure_initialized()?;

    let found = match entry.id {
      Some(id) => {
        require_valid_id(id)?;
        self.locate(id, issue_number(&entry)).await?
      }
      None => None,
    };

    let next = match entry.id {
      Some(id) => id,
      None => self.next_surrogate_id(),
    };
    stamp_for_save(&mut entry, next, found.as_ref().map(|(_, e)| e));
    self.write(&entry, found.map(|(issue, _)| issue.number)).await
  }

  async fn import(&self, entry: &DevlogEntry) -> Result<()> {
    self.ensure_initialized()?;
    let id = entry
      .id
      .ok_or_else(|| StorageError::InvalidIdentifier("entry has no id".into()))?;
    require_valid_id(id)?;

    let found = self.locate(id, issue_number(entry)).await?;
    self.write(entry, found.map(|(issue, _)| issue.number)).await?;
    Ok(())
  }

  async fn delete(&self, id: DevlogId) -> Result<()> {
    require_valid_id(id)?;
    self.ensure_initialized()?;

    let Some((issue, _)) = self.locate(id, None).await? else {
      debug!(%id, "delete of absent entry");
      self.forget(id);
      return Ok(());
    };

    let api = self.api.as_ref();
    let number = issue.number;
    let request = delete_request(self.prefix());
    let request = &request;
    self
      .limiter
      .execute(move || api.update_issue(number, request))
      .await?;
    self.forget(id);
    info!(%id, number, "closed issue for deleted entry");
    Ok(())
  }

  async fn list(&self, filter: Option<&DevlogFilter>) -> Result<Vec<DevlogEntry>> {
    self.ensure_initialized()?;
    let issues = match filter {
      None => self.list_all().await?,
      // Truncated searches fall back to the full listing, filtered below.
      Some(f) => match self.search_all(&self.queries.build(Some(f))).await {
        Err(StorageError::IncompleteResults { fetched, total }) => {
          warn!(fetched, total, "filtered search incomplete, listing all issues");
          self.list_all().await?
        }
        other => other?,
      },
    };

    // Priority is not expressible in the query, and GitHub's state/date
    // semantics differ slightly from the entry's own fields.
    let mut entries: Vec<DevlogEntry> = self
      .entries_from(&issues)
      .into_iter()
      .filter(|e| filter.map_or(true, |f| f.matches(e)))
      .collect();
    sort_entries(&mut entries);
    Ok(entries)
  }

  async fn search(&self, query: &str) -> Result<Vec<DevlogEntry>> {
    if query.trim().is_empty() {
      return self.list(None).await;
    }
    self.ensure_initialized()?;
    let issues = self.search_all(&self.queries.search(query)).await?;
    let mut entries = self.entries_from(&issues);
    sort_entries(&mut entries);
    Ok(entries)
  }

  async fn get_stats(&self) -> Result<DevlogStats> {
    let entries = self.list(None).await?;
    Ok(DevlogStats::from_entries(&entries))
  }

  async fn get_next_id(&self) -> Result<DevlogId> {
    Ok(self.next_surrogate_id())
  }

  async fn dispose(&self) -> Result<()> {
    let mut state = self.lock();
    state.cache.clear();
    state.index.clear();
    self.initialized.store(false, Ordering::SeqCst);
    Ok(())
  }

  fn is_remote_storage(&self) -> bool {
    true
  }

  fn backend_name(&self) -> &'static str {
    "github"
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}
