//! In-memory stand-in for the GitHub issue API.
//!
//! Search understands the subset of the query syntax the provider emits: the
//! `label:"devlog"` scope, an optional quoted phrase matched against title
//! and body, and `is:closed`. Other qualifiers are ignored, so callers that
//! rely on them must post-filter (as the provider does). Like GitHub, search
//! serves at most the first 1000 results of a query.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::api_types::{ApiIssue, ApiLabel, ApiSearchResponse, ApiUser, IssueRequest};
use super::client::IssueApi;
use crate::error::{Result, StorageError};

const SEARCH_RESULT_CAP: usize = 1000;

#[derive(Default)]
pub(crate) struct FakeIssueApi {
  issues: Mutex<BTreeMap<u64, ApiIssue>>,
  failures: Mutex<VecDeque<StorageError>>,
  pub(crate) queries: Mutex<Vec<String>>,
  pub(crate) calls: AtomicUsize,
  listings: AtomicUsize,
  incomplete: AtomicBool,
}

impl FakeIssueApi {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// The next calls fail with these errors, in order.
  pub(crate) fn fail_next(&self, errors: impl IntoIterator<Item = StorageError>) {
    self.failures.lock().unwrap().extend(errors);
  }

  /// Add an issue directly, as if created on github.com.
  pub(crate) fn insert(&self, request: &IssueRequest) -> u64 {
    let mut issues = self.issues.lock().unwrap();
    let number = issues.keys().max().copied().unwrap_or(0) + 1;
    issues.insert(number, build_issue(number, request));
    number
  }

  pub(crate) fn issue(&self, number: u64) -> Option<ApiIssue> {
    self.issues.lock().unwrap().get(&number).cloned()
  }

  pub(crate) fn len(&self) -> usize {
    self.issues.lock().unwrap().len()
  }

  pub(crate) fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub(crate) fn search_count(&self) -> usize {
    self.queries.lock().unwrap().len()
  }

  pub(crate) fn list_count(&self) -> usize {
    self.listings.load(Ordering::SeqCst)
  }

  /// Make search responses report `incomplete_results`, as GitHub does when
  /// a query times out.
  pub(crate) fn set_incomplete_results(&self, incomplete: bool) {
    self.incomplete.store(incomplete, Ordering::SeqCst);
  }

  fn begin(&self) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.failures.lock().unwrap().pop_front() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

fn build_issue(number: u64, request: &IssueRequest) -> ApiIssue {
  let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(number as i64);
  ApiIssue {
    number,
    title: request.title.clone().unwrap_or_default(),
    body: request.body.clone(),
    state: request.state.clone().unwrap_or_else(|| "open".into()),
    labels: request
      .labels
      .iter()
      .flatten()
      .map(|name| ApiLabel { name: name.clone() })
      .collect(),
    assignees: request
      .assignees
      .iter()
      .flatten()
      .map(|login| ApiUser { login: login.clone() })
      .collect(),
    html_url: format!("https://github.com/octo/notes/issues/{}", number),
    created_at: created,
    updated_at: created,
    pull_request: None,
  }
}

fn apply(issue: &mut ApiIssue, request: &IssueRequest) {
  if let Some(title) = &request.title {
    issue.title = title.clone();
  }
  if let Some(body) = &request.body {
    issue.body = Some(body.clone());
  }
  if let Some(labels) = &request.labels {
    issue.labels = labels.iter().map(|name| ApiLabel { name: name.clone() }).collect();
  }
  if let Some(assignees) = &request.assignees {
    issue.assignees = assignees
      .iter()
      .map(|login| ApiUser { login: login.clone() })
      .collect();
  }
  if let Some(state) = &request.state {
    issue.state = state.clone();
  }
  issue.updated_at = issue.updated_at + ChronoDuration::seconds(1);
}

/// The quoted value following `label:`, if any.
fn scope_label(query: &str) -> Option<&str> {
  let rest = &query[query.find("label:\"")? + "label:\"".len()..];
  rest.find('"').map(|end| &rest[..end])
}

/// The free-text phrase: the last quoted string followed by ` in:`.
fn phrase(query: &str) -> Option<String> {
  let end = query.rfind("\" in:")?;
  let start = query[..end].rfind('"')? + 1;
  Some(query[start..end].to_lowercase())
}

fn matches(issue: &ApiIssue, query: &str) -> bool {
  if let Some(label) = scope_label(query) {
    if !issue.has_label(label) {
      return false;
    }
  }
  if query.contains("is:closed") && !query.contains(" OR ") && !issue.is_closed() {
    return false;
  }
  match phrase(query) {
    Some(phrase) => {
      issue.title.to_lowercase().contains(&phrase)
        || issue
          .body
          .as_deref()
          .unwrap_or_default()
          .to_lowercase()
          .contains(&phrase)
    }
    None => true,
  }
}

#[async_trait]
impl IssueApi for FakeIssueApi {
  async fn search_issues(&self, query: &str, page: u32, per_page: u32) -> Result<ApiSearchResponse> {
    self.begin()?;
    self.queries.lock().unwrap().push(query.to_string());

    let issues = self.issues.lock().unwrap();
    let matching: Vec<ApiIssue> = issues
      .values()
      .rev()
      .filter(|issue| matches(issue, query))
      .cloned()
      .collect();

    let per_page = per_page.max(1) as usize;
    let start = (page.max(1) as usize - 1) * per_page;
    if start >= SEARCH_RESULT_CAP {
      return Err(StorageError::Remote {
        status: 422,
        message: "Only the first 1000 search results are available".into(),
      });
    }
    let end = (start + per_page).min(SEARCH_RESULT_CAP);
    Ok(ApiSearchResponse {
      total_count: matching.len() as u64,
      incomplete_results: self.incomplete.load(Ordering::SeqCst),
      items: matching.into_iter().take(end).skip(start).collect(),
    })
  }

  async fn list_issues(&self, label: &str, page: u32, per_page: u32) -> Result<Vec<ApiIssue>> {
    self.begin()?;
    self.listings.fetch_add(1, Ordering::SeqCst);

    let per_page = per_page.max(1) as usize;
    let start = (page.max(1) as usize - 1) * per_page;
    let issues = self.issues.lock().unwrap();
    Ok(
      issues
        .values()
        .rev()
        .filter(|issue| issue.has_label(label))
        .skip(start)
        .take(per_page)
        .cloned()
        .collect(),
    )
  }

  async fn get_issue(&self, number: u64) -> Result<Option<ApiIssue>> {
    self.begin()?;
    Ok(self.issue(number))
  }

  async fn create_issue(&self, request: &IssueRequest) -> Result<ApiIssue> {
    self.begin()?;
    let number = self.insert(request);
    self.issue(number).ok_or(StorageError::Remote {
      status: 500,
      message: "issue vanished".into(),
    })
  }

  async fn update_issue(&self, number: u64, request: &IssueRequest) -> Result<ApiIssue> {
    self.begin()?;
    let mut issues = self.issues.lock().unwrap();
    let issue = issues.get_mut(&number).ok_or(StorageError::Remote {
      status: 404,
      message: "Not Found".into(),
    })?;
    apply(issue, request);
    Ok(issue.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_query_parsing() {
    let q = r#"repo:o/r is:issue label:"devlog" "devlog metadata #17" in:body"#;
    assert_eq!(scope_label(q), Some("devlog"));
    assert_eq!(phrase(q).as_deref(), Some("devlog metadata #17"));
    assert_eq!(phrase(r#"repo:o/r is:issue label:"devlog""#), None);
  }

  #[tokio::test]
  async fn test_search_is_capped_like_github() {
    let api = FakeIssueApi::new();
    for _ in 0..1005 {
      api.insert(&IssueRequest {
        labels: Some(vec!["devlog".into()]),
        ..Default::default()
      });
    }
    let q = r#"repo:o/r is:issue label:"devlog""#;

    let last = api.search_issues(q, 10, 100).await.unwrap();
    assert_eq!(last.total_count, 1005);
    assert_eq!(last.items.len(), 100);
    assert!(matches!(
      api.search_issues(q, 11, 100).await,
      Err(StorageError::Remote { status: 422, .. })
    ));
    assert_eq!(api.list_issues("devlog", 11, 100).await.unwrap().len(), 5);
  }
}
