//! GitHub issues as a devlog backend: REST client, request throttling,
//! search query construction and the entry/issue mapping.

pub mod api_types;
pub mod client;
pub mod config;
#[cfg(test)]
pub(crate) mod fake;
pub mod mapper;
pub mod query;
pub mod rate_limit;

pub use client::{GithubClient, IssueApi};
pub use config::{CacheConfig, GithubStorageConfig, RateLimitConfig};
pub use query::QueryBuilder;
pub use rate_limit::RateLimiter;
