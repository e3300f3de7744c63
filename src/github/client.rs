//! Thin GitHub REST client for the issue endpoints used by the provider.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::{ApiErrorResponse, ApiIssue, ApiSearchResponse, IssueRequest};
use super::config::GithubStorageConfig;
use crate::error::{Result, StorageError};

const API_VERSION: &str = "2022-11-28";

/// Issue operations the GitHub provider needs.
#[async_trait]
pub trait IssueApi: Send + Sync {
  /// One page (1-based) of `GET /search/issues`.
  async fn search_issues(&self, query: &str, page: u32, per_page: u32) -> Result<ApiSearchResponse>;

  /// One page (1-based) of `GET /repos/{owner}/{repo}/issues` carrying
  /// `label`, open and closed, most recently updated first. Unlike search,
  /// this endpoint has no result cap.
  async fn list_issues(&self, label: &str, page: u32, per_page: u32) -> Result<Vec<ApiIssue>>;

  /// `None` when the issue does not exist or was removed.
  async fn get_issue(&self, number: u64) -> Result<Option<ApiIssue>>;

  async fn create_issue(&self, request: &IssueRequest) -> Result<ApiIssue>;

  async fn update_issue(&self, number: u64, request: &IssueRequest) -> Result<ApiIssue>;
}

/// GitHub API client
#[derive(Clone)]
pub struct GithubClient {
  http: Client,
  /// API root, always ending in `/`
  base_url: Url,
  owner: String,
  repo: String,
}

impl GithubClient {
  pub fn new(config: &GithubStorageConfig) -> Result<Self> {
    let token = config
      .token
      .as_deref()
      .filter(|t| !t.trim().is_empty())
      .ok_or_else(|| StorageError::Configuration("GitHub token is required".into()))?;

    let mut headers = HeaderMap::new();
    let auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
      .map_err(|_| StorageError::Configuration("GitHub token is not a valid header value".into()))?;
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
    headers.insert(
      USER_AGENT,
      HeaderValue::from_static(concat!("devlog-store/", env!("CARGO_PKG_VERSION"))),
    );

    let http = Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_millis(config.timeout_ms()))
      .build()
      .map_err(|e| StorageError::Configuration(format!("failed to build HTTP client: {}", e)))?;

    let mut raw = config.api_url().trim_end_matches('/').to_string();
    raw.push('/');
    let base_url = Url::parse(&raw)
      .map_err(|e| StorageError::Configuration(format!("invalid apiUrl {:?}: {}", raw, e)))?;

    Ok(Self {
      http,
      base_url,
      owner: config.owner.clone(),
      repo: config.repo.clone(),
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| StorageError::Configuration(format!("invalid API path {}: {}", path, e)))
  }

  fn issues_path(&self) -> String {
    format!("repos/{}/{}/issues", self.owner, self.repo)
  }

  async fn send(&self, request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(map_transport_error)?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let remaining = response
      .headers()
      .get("x-ratelimit-remaining")
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(status, remaining.as_deref(), &body))
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
    let response = self.send(request).await?;
    response.json::<T>().await.map_err(map_transport_error)
  }
}

#[async_trait]
impl IssueApi for GithubClient {
  async fn search_issues(&self, query: &str, page: u32, per_page: u32) -> Result<ApiSearchResponse> {
    let mut url = self.url("search/issues")?;
    url
      .query_pairs_mut()
      .append_pair("q", query)
      .append_pair("sort", "updated")
      .append_pair("order", "desc")
      .append_pair("page", &page.to_string())
      .append_pair("per_page", &per_page.to_string());

    debug!(query, page, "searching issues");
    self.send_json(self.http.get(url)).await
  }

  async fn list_issues(&self, label: &str, page: u32, per_page: u32) -> Result<Vec<ApiIssue>> {
    let mut url = self.url(&self.issues_path())?;
    url
      .query_pairs_mut()
      .append_pair("labels", label)
      .append_pair("state", "all")
      .append_pair("sort", "updated")
      .append_pair("direction", "desc")
      .append_pair("page", &page.to_string())
      .append_pair("per_page", &per_page.to_string());

    debug!(label, page, "listing issues");
    self.send_json(self.http.get(url)).await
  }

  async fn get_issue(&self, number: u64) -> Result<Option<ApiIssue>> {
    let url = self.url(&format!("{}/{}", self.issues_path(), number))?;
    match self.send_json(self.http.get(url)).await {
      Ok(issue) => Ok(Some(issue)),
      Err(StorageError::Remote { status: 404 | 410, .. }) => Ok(None),
      Err(e) => Err(e),
    }
  }

  async fn create_issue(&self, request: &IssueRequest) -> Result<ApiIssue> {
    let url = self.url(&self.issues_path())?;
    self.send_json(self.http.post(url).json(request)).await
  }

  async fn update_issue(&self, number: u64, request: &IssueRequest) -> Result<ApiIssue> {
    let url = self.url(&format!("{}/{}", self.issues_path(), number))?;
    self
      .send_json(self.http.request(Method::PATCH, url).json(request))
      .await
  }
}

/// Map a non-success response to a storage error.
///
/// GitHub signals primary rate limits with 403 and `x-ratelimit-remaining: 0`,
/// secondary ones with 403 or 429 and a "rate limit" message.
pub fn classify_error(status: StatusCode, ratelimit_remaining: Option<&str>, body: &str) -> StorageError {
  let message = serde_json::from_str::<ApiErrorResponse>(body)
    .map(|e| e.message)
    .unwrap_or_else(|_| body.chars().take(300).collect());

  let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
    || (status == StatusCode::FORBIDDEN
      && (ratelimit_remaining == Some("0") || message.to_lowercase().contains("rate limit")));

  if rate_limited {
    StorageError::RateLimited(message)
  } else if status.is_server_error() {
    StorageError::RemoteUnavailable(format!("HTTP {}: {}", status.as_u16(), message))
  } else {
    StorageError::Remote {
      status: status.as_u16(),
      message,
    }
  }
}

fn map_transport_error(err: reqwest::Error) -> StorageError {
  if err.is_decode() {
    StorageError::Remote {
      status: err.status().map(|s| s.as_u16()).unwrap_or(200),
      message: format!("unexpected response body: {}", err),
    }
  } else if err.is_timeout() {
    StorageError::RemoteUnavailable(format!("request timed out: {}", err))
  } else {
    StorageError::RemoteUnavailable(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_rate_limits() {
    assert!(classify_error(StatusCode::TOO_MANY_REQUESTS, None, "").is_rate_limited());
    assert!(
      classify_error(StatusCode::FORBIDDEN, Some("0"), r#"{"message":"Forbidden"}"#).is_rate_limited()
    );
    assert!(classify_error(
      StatusCode::FORBIDDEN,
      Some("12"),
      r#"{"message":"You have exceeded a secondary rate limit"}"#
    )
    .is_rate_limited());
  }

  #[test]
  fn test_classify_other_errors() {
    assert!(matches!(
      classify_error(StatusCode::BAD_GATEWAY, None, "upstream"),
      StorageError::RemoteUnavailable(_)
    ));

    match classify_error(
      StatusCode::FORBIDDEN,
      Some("4999"),
      r#"{"message":"Resource not accessible by integration"}"#,
    ) {
      StorageError::Remote { status, message } => {
        assert_eq!(status, 403);
        assert_eq!(message, "Resource not accessible by integration");
      }
      other => panic!("unexpected error: {:?}", other),
    }

    match classify_error(StatusCode::UNPROCESSABLE_ENTITY, None, "not json") {
      StorageError::Remote { status, message } => {
        assert_eq!(status, 422);
        assert_eq!(message, "not json");
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_new_requires_token_and_valid_url() {
    let mut config = GithubStorageConfig::new("octo", "notes", "");
    assert!(matches!(
      GithubClient::new(&config),
      Err(StorageError::Configuration(_))
    ));

    config.token = Some("ghp_x".into());
    config.api_url = Some("not a url".into());
    assert!(matches!(
      GithubClient::new(&config),
      Err(StorageError::Configuration(_))
    ));
  }

  #[test]
  fn test_urls_keep_enterprise_prefix() {
    let mut config = GithubStorageConfig::new("octo", "notes", "ghp_x");
    config.api_url = Some("https://ghe.example.com/api/v3/".into());
    let client = GithubClient::new(&config).unwrap();

    let url = client.url(&format!("{}/5", client.issues_path())).unwrap();
    assert_eq!(
      url.as_str(),
      "https://ghe.example.com/api/v3/repos/octo/notes/issues/5"
    );
  }
}
