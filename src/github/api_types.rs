//! Serde types matching GitHub REST API requests and responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiLabel {
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiUser {
  pub login: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiIssue {
  pub number: u64,
  pub title: String,
  #[serde(default)]
  pub body: Option<String>,
  /// "open" or "closed"
  pub state: String,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
  #[serde(default)]
  pub assignees: Vec<ApiUser>,
  #[serde(default)]
  pub html_url: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Present when the item is a pull request
  #[serde(default)]
  pub pull_request: Option<serde_json::Value>,
}

impl ApiIssue {
  pub fn has_label(&self, name: &str) -> bool {
    self.labels.iter().any(|l| l.name == name)
  }

  pub fn is_closed(&self) -> bool {
    self.state == "closed"
  }
}

/// `GET /search/issues` response page
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSearchResponse {
  #[serde(default)]
  pub total_count: u64,
  #[serde(default)]
  pub incomplete_results: bool,
  #[serde(default)]
  pub items: Vec<ApiIssue>,
}

/// Error body returned by the API
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
  pub message: String,
}

/// Body for issue create (POST) and update (PATCH). Unset fields are left
/// untouched by PATCH.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub labels: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assignees: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state_reason: Option<String>,
}
