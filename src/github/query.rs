//! Builds GitHub issue search queries from devlog filters.
//!
//! Clauses are joined with spaces (AND) in a fixed order: base, status,
//! type, assignee, created-from, created-to.

use super::mapper::{status_label, type_label};
use crate::types::{DevlogFilter, DevlogId, DevlogStatus};

#[derive(Debug, Clone)]
pub struct QueryBuilder {
  owner: String,
  repo: String,
  prefix: String,
}

impl QueryBuilder {
  pub fn new(owner: impl Into<String>, repo: impl Into<String>, prefix: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      repo: repo.into(),
      prefix: prefix.into(),
    }
  }

  /// Scope to the repository, to issues, and to the devlog label.
  pub fn base(&self) -> String {
    format!(
      "repo:{}/{} is:issue label:\"{}\"",
      self.owner, self.repo, self.prefix
    )
  }

  pub fn build(&self, filter: Option<&DevlogFilter>) -> String {
    let mut clauses = vec![self.base()];
    let Some(filter) = filter else {
      return clauses.join(" ");
    };

    if let Some(statuses) = &filter.status {
      let group = or_group(statuses.iter().map(|s| self.status_clause(*s)).collect());
      clauses.extend(group);
    }
    if let Some(types) = &filter.devlog_type {
      let group = or_group(
        types
          .iter()
          .map(|t| label_clause(&type_label(&self.prefix, *t)))
          .collect(),
      );
      clauses.extend(group);
    }
    if let Some(assignee) = &filter.assignee {
      clauses.push(format!("assignee:{}", assignee));
    }
    if let Some(from) = filter.from_date {
      clauses.push(format!("created:>={}", from.format("%Y-%m-%d")));
    }
    if let Some(to) = filter.to_date {
      clauses.push(format!("created:<={}", to.format("%Y-%m-%d")));
    }

    clauses.join(" ")
  }

  /// Free-text search over title and body (notes live in the body).
  pub fn search(&self, text: &str) -> String {
    let text: String = text.chars().filter(|c| *c != '"').collect();
    format!("{} \"{}\" in:title,body", self.base(), text.trim())
  }

  /// Find the issue carrying the metadata block of `id`.
  pub fn id_lookup(&self, id: DevlogId) -> String {
    format!(
      "{} \"{} metadata #{}\" in:body",
      self.base(),
      self.prefix,
      id
    )
  }

  fn status_clause(&self, status: DevlogStatus) -> String {
    if status == DevlogStatus::TERMINAL {
      "is:closed".to_string()
    } else {
      label_clause(&status_label(&self.prefix, status))
    }
  }
}

fn label_clause(label: &str) -> String {
  format!("label:\"{}\"", label)
}

/// A single clause stays bare; several are wrapped as `(a OR b)`.
fn or_group(clauses: Vec<String>) -> Option<String> {
  match clauses.len() {
    0 => None,
    1 => clauses.into_iter().next(),
    _ => Some(format!("({})", clauses.join(" OR "))),
  }
}
