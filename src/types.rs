//! Devlog domain types shared by every storage backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Maximum length of a generated entry key
const MAX_KEY_LEN: usize = 60;

// ============================================================================
// Identifiers
// ============================================================================

/// Numeric devlog id, unique within a workspace.
///
/// Any `i64` can be held so that malformed ids coming from callers can be
/// represented; only positive values are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevlogId(i64);

impl DevlogId {
  pub const fn new(value: i64) -> Self {
    Self(value)
  }

  pub const fn get(self) -> i64 {
    self.0
  }

  pub const fn is_valid(self) -> bool {
    self.0 > 0
  }
}

impl fmt::Display for DevlogId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<i64> for DevlogId {
  fn from(value: i64) -> Self {
    Self(value)
  }
}

impl FromStr for DevlogId {
  type Err = StorageError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.trim()
      .parse::<i64>()
      .map(Self)
      .map_err(|_| StorageError::InvalidIdentifier(s.to_string()))
  }
}

// ============================================================================
// Enumerations
// ============================================================================

macro_rules! wire_enum {
  ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub enum $name {
      $(#[serde(rename = $wire)] $variant),+
    }

    impl $name {
      pub const ALL: &'static [Self] = &[$(Self::$variant),+];

      pub fn as_str(&self) -> &'static str {
        match self {
          $(Self::$variant => $wire),+
        }
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl FromStr for $name {
      type Err = String;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
          $($wire => Ok(Self::$variant),)+
          other => Err(format!("unknown {}: {}", stringify!($name), other)),
        }
      }
    }
  };
}

wire_enum!(
  /// Workflow status of an entry
  DevlogStatus {
    New => "new",
    InProgress => "in-progress",
    Blocked => "blocked",
    InReview => "in-review",
    Testing => "testing",
    Done => "done",
    Cancelled => "cancelled",
  }
);

impl DevlogStatus {
  /// The terminal status, expressed as `is:closed` in remote queries.
  pub const TERMINAL: DevlogStatus = DevlogStatus::Done;

  /// Whether entries in this status map to a closed remote issue.
  pub fn is_closed(&self) -> bool {
    matches!(self, DevlogStatus::Done | DevlogStatus::Cancelled)
  }
}

wire_enum!(
  DevlogType {
    Feature => "feature",
    Bugfix => "bugfix",
    Task => "task",
    Refactor => "refactor",
    Docs => "docs",
  }
);

wire_enum!(
  DevlogPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
  }
);

wire_enum!(
  NoteCategory {
    Progress => "progress",
    Issue => "issue",
    Solution => "solution",
    Idea => "idea",
    Reminder => "reminder",
    Feedback => "feedback",
  }
);

// ============================================================================
// Entry
// ============================================================================

/// A single timestamped note. Notes are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevlogNote {
  pub id: String,
  pub timestamp: DateTime<Utc>,
  pub category: NoteCategory,
  pub content: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub files: Vec<String>,
}

/// Business and technical context captured for an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevlogContext {
  pub business_context: String,
  pub technical_context: String,
  pub acceptance_criteria: Vec<String>,
  pub dependencies: Vec<String>,
  pub decisions: Vec<String>,
  pub risks: Vec<String>,
}

/// Context maintained by AI agents working on an entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiContext {
  pub current_summary: String,
  pub key_insights: Vec<String>,
  pub open_questions: Vec<String>,
  pub related_patterns: Vec<String>,
  pub suggested_next_steps: Vec<String>,
  pub last_ai_update: Option<DateTime<Utc>>,
  pub context_version: u32,
}

/// Link to the same work item in another system (GitHub, Jira, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
  pub system: String,
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_sync: Option<DateTime<Utc>>,
}

/// A devlog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevlogEntry {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<DevlogId>,
  pub key: String,
  pub title: String,
  #[serde(rename = "type")]
  pub devlog_type: DevlogType,
  #[serde(default)]
  pub description: String,
  pub status: DevlogStatus,
  pub priority: DevlogPriority,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assignee: Option<String>,
  #[serde(default)]
  pub context: DevlogContext,
  #[serde(default)]
  pub ai_context: AiContext,
  #[serde(default)]
  pub notes: Vec<DevlogNote>,
  #[serde(default)]
  pub files: Vec<String>,
  #[serde(default)]
  pub related_devlogs: Vec<String>,
  #[serde(default)]
  pub external_references: Vec<ExternalReference>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl DevlogEntry {
  /// Create a draft entry without an id. The provider assigns the id on save.
  pub fn new(title: impl Into<String>, devlog_type: DevlogType, description: impl Into<String>) -> Self {
    let title = title.into();
    let now = Utc::now();
    Self {
      id: None,
      key: generate_key(&title),
      title,
      devlog_type,
      description: description.into(),
      status: DevlogStatus::New,
      priority: DevlogPriority::Medium,
      assignee: None,
      context: DevlogContext::default(),
      ai_context: AiContext::default(),
      notes: Vec::new(),
      files: Vec::new(),
      related_devlogs: Vec::new(),
      external_references: Vec::new(),
      created_at: now,
      updated_at: now,
    }
  }

  /// Refresh `updated_at`, never moving it backwards.
  pub fn touch(&mut self) {
    self.updated_at = self.updated_at.max(Utc::now());
  }

  /// Append a note and refresh `updated_at`.
  pub fn add_note(
    &mut self,
    category: NoteCategory,
    content: impl Into<String>,
    files: Vec<String>,
  ) -> &DevlogNote {
    self.touch();
    let content = content.into();
    let timestamp = self.updated_at;
    let id = note_id(self.id, timestamp, &content, self.notes.len());
    self.notes.push(DevlogNote {
      id,
      timestamp,
      category,
      content,
      files,
    });
    &self.notes[self.notes.len() - 1]
  }

  /// The reference for `system`, if any. The first one is authoritative.
  pub fn external_reference(&self, system: &str) -> Option<&ExternalReference> {
    self.external_references.iter().find(|r| r.system == system)
  }

  /// Replace the reference for `reference.system`, or append it.
  pub fn upsert_external_reference(&mut self, reference: ExternalReference) {
    match self
      .external_references
      .iter_mut()
      .find(|r| r.system == reference.system)
    {
      Some(existing) => *existing = reference,
      None => self.external_references.push(reference),
    }
  }

  /// Case-insensitive match of `needle` (already lowercased) against title,
  /// description and note contents.
  pub fn matches_text(&self, needle: &str) -> bool {
    self.title.to_lowercase().contains(needle)
      || self.description.to_lowercase().contains(needle)
      || self
        .notes
        .iter()
        .any(|n| n.content.to_lowercase().contains(needle))
  }
}

/// Derive a slug from a title: lowercase ASCII alphanumerics joined by single
/// hyphens.
pub fn generate_key(title: &str) -> String {
  let mut key = String::with_capacity(title.len());
  for c in title.chars() {
    if c.is_ascii_alphanumeric() {
      key.push(c.to_ascii_lowercase());
    } else if !key.is_empty() && !key.ends_with('-') {
      key.push('-');
    }
  }
  if key.len() > MAX_KEY_LEN {
    key.truncate(MAX_KEY_LEN);
  }
  key.trim_end_matches('-').to_string()
}

fn note_id(entry: Option<DevlogId>, timestamp: DateTime<Utc>, content: &str, position: usize) -> String {
  let mut hasher = Sha256::new();
  hasher.update(entry.map(|id| id.get()).unwrap_or_default().to_le_bytes());
  hasher.update(timestamp.to_rfc3339().as_bytes());
  hasher.update(content.as_bytes());
  hasher.update(position.to_le_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("note-{}", &digest[..12])
}

/// Order used by every `list`/`search`: most recently updated first, ties by
/// descending id.
pub fn sort_entries(entries: &mut [DevlogEntry]) {
  entries.sort_by(|a, b| {
    b.updated_at
      .cmp(&a.updated_at)
      .then_with(|| b.id.cmp(&a.id))
  });
}

// ============================================================================
// Filter and stats
// ============================================================================

/// Conjunction of optional constraints. `None` (or an empty list) means no
/// constraint on that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevlogFilter {
  pub status: Option<Vec<DevlogStatus>>,
  #[serde(rename = "type")]
  pub devlog_type: Option<Vec<DevlogType>>,
  pub priority: Option<Vec<DevlogPriority>>,
  pub assignee: Option<String>,
  /// Inclusive lower bound on the creation date
  pub from_date: Option<NaiveDate>,
  /// Inclusive upper bound on the creation date
  pub to_date: Option<NaiveDate>,
}

fn allows<T: PartialEq>(set: &Option<Vec<T>>, value: &T) -> bool {
  match set {
    Some(values) if !values.is_empty() => values.contains(value),
    _ => true,
  }
}

impl DevlogFilter {
  pub fn matches(&self, entry: &DevlogEntry) -> bool {
    let created = entry.created_at.date_naive();
    allows(&self.status, &entry.status)
      && allows(&self.devlog_type, &entry.devlog_type)
      && allows(&self.priority, &entry.priority)
      && self
        .assignee
        .as_ref()
        .map_or(true, |a| entry.assignee.as_ref() == Some(a))
      && self.from_date.map_or(true, |from| created >= from)
      && self.to_date.map_or(true, |to| created <= to)
  }
}

/// Aggregate counts over the current entry set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevlogStats {
  pub total_entries: usize,
  pub by_status: BTreeMap<DevlogStatus, usize>,
  pub by_type: BTreeMap<DevlogType, usize>,
  pub by_priority: BTreeMap<DevlogPriority, usize>,
}

impl DevlogStats {
  pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a DevlogEntry>) -> Self {
    let mut stats = Self::default();
    for entry in entries {
      stats.total_entries += 1;
      *stats.by_status.entry(entry.status).or_default() += 1;
      *stats.by_type.entry(entry.devlog_type).or_default() += 1;
      *stats.by_priority.entry(entry.priority).or_default() += 1;
    }
    stats
  }
}
