//! Conversions between devlog entries and GitHub issues.
//!
//! Type, priority and status are stored as prefixed labels so they can be
//! queried. Everything else rides in a metadata block appended to the issue
//! body:
//!
//! ```text
//! <description>
//!
//! <!-- devlog-metadata -->
//! <details>
//! <summary>devlog metadata #42</summary>
//!
//! ```json
//! {"id":42,...}
//! ```
//!
//! </details>
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::api_types::{ApiIssue, IssueRequest};
use crate::error::{Result, StorageError};
use crate::types::{
  generate_key, AiContext, DevlogContext, DevlogEntry, DevlogId, DevlogNote, DevlogPriority,
  DevlogStatus, DevlogType, ExternalReference,
};

/// System name used in external references for GitHub issues
pub const GITHUB_SYSTEM: &str = "github";

const JSON_FENCE: &str = "```json";
const FENCE_END: &str = "\n```";

// ============================================================================
// Labels
// ============================================================================

pub fn type_label(prefix: &str, value: DevlogType) -> String {
  format!("{}-type:{}", prefix, value)
}

pub fn priority_label(prefix: &str, value: DevlogPriority) -> String {
  format!("{}-priority:{}", prefix, value)
}

pub fn status_label(prefix: &str, value: DevlogStatus) -> String {
  format!("{}-status:{}", prefix, value)
}

/// Label that replaces all others when an entry is deleted
pub fn deleted_label(prefix: &str) -> String {
  format!("{}-deleted", prefix)
}

fn metadata_marker(prefix: &str) -> String {
  format!("<!-- {}-metadata -->", prefix)
}

/// Value from the first label of the form `<prefix>-<kind>:<value>`.
fn label_value<T: std::str::FromStr>(issue: &ApiIssue, prefix: &str, kind: &str) -> Option<T> {
  let label_prefix = format!("{}-{}:", prefix, kind);
  issue
    .labels
    .iter()
    .filter_map(|l| l.name.strip_prefix(&label_prefix))
    .find_map(|v| v.parse().ok())
}

/// Whether the issue is a live devlog entry (labelled, not a pull request).
pub fn is_tracked(issue: &ApiIssue, prefix: &str) -> bool {
  issue.pull_request.is_none() && issue.has_label(prefix)
}

/// Issue number recorded in the entry's GitHub reference.
pub fn issue_number(entry: &DevlogEntry) -> Option<u64> {
  entry
    .external_reference(GITHUB_SYSTEM)
    .and_then(|r| r.id.parse().ok())
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueMetadata {
  id: DevlogId,
  key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  assignee: Option<String>,
  #[serde(default)]
  context: DevlogContext,
  #[serde(default)]
  ai_context: AiContext,
  #[serde(default)]
  notes: Vec<DevlogNote>,
  #[serde(default)]
  files: Vec<String>,
  #[serde(default)]
  related_devlogs: Vec<String>,
  #[serde(default)]
  external_references: Vec<ExternalReference>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

/// Split a body into the description and the raw metadata JSON, if present.
fn split_body<'a>(body: &'a str, prefix: &str) -> (&'a str, Option<&'a str>) {
  let marker = metadata_marker(prefix);
  let Some(pos) = body.rfind(&marker) else {
    return (body, None);
  };

  let description = &body[..pos];
  let description = description.strip_suffix("\n\n").unwrap_or(description);

  let rest = &body[pos + marker.len()..];
  let json = rest.find(JSON_FENCE).and_then(|start| {
    let json = &rest[start + JSON_FENCE.len()..];
    json.find(FENCE_END).map(|end| json[..end].trim())
  });
  (description, json)
}

// ============================================================================
// Conversions
// ============================================================================

/// Build the create/update request for an entry. The entry must have an id.
pub fn entry_to_issue(entry: &DevlogEntry, prefix: &str) -> Result<IssueRequest> {
  let id = entry
    .id
    .ok_or_else(|| StorageError::InvalidIdentifier("entry has no id".to_string()))?;

  let metadata = IssueMetadata {
    id,
    key: entry.key.clone(),
    assignee: entry.assignee.clone(),
    context: entry.context.clone(),
    ai_context: entry.ai_context.clone(),
    notes: entry.notes.clone(),
    files: entry.files.clone(),
    related_devlogs: entry.related_devlogs.clone(),
    external_references: entry.external_references.clone(),
    created_at: entry.created_at,
    updated_at: entry.updated_at,
  };
  let json = serde_json::to_string(&metadata)?;

  let body = format!(
    "{description}\n\n{marker}\n<details>\n<summary>{prefix} metadata #{id}</summary>\n\n{fence}\n{json}\n```\n\n</details>\n",
    description = entry.description,
    marker = metadata_marker(prefix),
    fence = JSON_FENCE,
  );

  Ok(IssueRequest {
    title: Some(entry.title.clone()),
    body: Some(body),
    labels: Some(vec![
      prefix.to_string(),
      type_label(prefix, entry.devlog_type),
      priority_label(prefix, entry.priority),
      status_label(prefix, entry.status),
    ]),
    assignees: Some(entry.assignee.iter().cloned().collect()),
    state: Some(if entry.status.is_closed() { "closed" } else { "open" }.to_string()),
    state_reason: None,
  })
}

/// Request that archives the issue of a deleted entry.
pub fn delete_request(prefix: &str) -> IssueRequest {
  IssueRequest {
    labels: Some(vec![deleted_label(prefix)]),
    state: Some("closed".to_string()),
    state_reason: Some("not_planned".to_string()),
    ..Default::default()
  }
}

/// Rebuild an entry from an issue.
///
/// Issues created by hand (no metadata block) use the issue number as id and
/// the issue timestamps.
pub fn issue_to_entry(issue: &ApiIssue, prefix: &str) -> DevlogEntry {
  let body = issue.body.as_deref().unwrap_or_default();
  let (description, metadata_json) = split_body(body, prefix);

  let metadata = metadata_json.and_then(|json| {
    serde_json::from_str::<IssueMetadata>(json)
      .map_err(|e| warn!(issue = issue.number, error = %e, "ignoring unreadable issue metadata"))
      .ok()
  });

  let labelled_status = label_value::<DevlogStatus>(issue, prefix, "status");
  // The issue state wins when someone closed or reopened it on GitHub.
  let status = match (labelled_status, issue.is_closed()) {
    (Some(s), true) if !s.is_closed() => DevlogStatus::Done,
    (Some(s), false) if s.is_closed() => DevlogStatus::InProgress,
    (Some(s), _) => s,
    (None, true) => DevlogStatus::Done,
    (None, false) => DevlogStatus::New,
  };

  let mut entry = DevlogEntry {
    id: Some(DevlogId::new(issue.number as i64)),
    key: generate_key(&issue.title),
    title: issue.title.clone(),
    devlog_type: label_value(issue, prefix, "type").unwrap_or(DevlogType::Task),
    description: description.to_string(),
    status,
    priority: label_value(issue, prefix, "priority").unwrap_or(DevlogPriority::Medium),
    assignee: issue.assignees.first().map(|u| u.login.clone()),
    context: DevlogContext::default(),
    ai_context: AiContext::default(),
    notes: Vec::new(),
    files: Vec::new(),
    related_devlogs: Vec::new(),
    external_references: Vec::new(),
    created_at: issue.created_at,
    updated_at: issue.updated_at,
  };

  if let Some(m) = metadata {
    entry.id = Some(m.id);
    entry.key = m.key;
    entry.assignee = m.assignee;
    entry.context = m.context;
    entry.ai_context = m.ai_context;
    entry.notes = m.notes;
    entry.files = m.files;
    entry.related_devlogs = m.related_devlogs;
    entry.external_references = m.external_references;
    entry.created_at = m.created_at;
    entry.updated_at = m.updated_at;
  }

  let mut reference = entry
    .external_reference(GITHUB_SYSTEM)
    .cloned()
    .unwrap_or_else(|| ExternalReference {
      system: GITHUB_SYSTEM.to_string(),
      id: String::new(),
      url: None,
      title: None,
      status: None,
      last_sync: None,
    });
  reference.id = issue.number.to_string();
  if !issue.html_url.is_empty() {
    reference.url = Some(issue.html_url.clone());
  }
  entry.upsert_external_reference(reference);

  entry
}
