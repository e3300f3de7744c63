//! Storage layer for devlog entries.
//!
//! Entries can live in local JSON files, a SQLite database, GitHub issues, or
//! a hybrid of GitHub and a SQLite cache kept in sync. All backends implement
//! [`StorageProvider`]; [`create_storage`] builds one from a [`StorageConfig`].

pub mod error;
pub mod github;
pub mod storage;
pub mod types;

pub use error::{Result, StorageError};
pub use storage::{create_storage, HybridStorageProvider, StorageConfig, StorageProvider};
pub use types::{
  DevlogEntry, DevlogFilter, DevlogId, DevlogPriority, DevlogStats, DevlogStatus, DevlogType,
  NoteCategory,
};
