//! Snapshot sources
//!
//! A snapshot is one poll's worth of grouped count rows. Sources are queried
//! once per cycle and either return every row or fail as a whole.

pub mod sql;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use sql::SqlSnapshotSource;

/// One grouped count row: how many items of `group_key` sit in `stage_label`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub count: u64,
    pub stage_label: String,
    pub group_key: String,
}

impl SnapshotRow {
    pub fn new(count: u64, stage_label: impl Into<String>, group_key: impl Into<String>) -> Self {
        Self {
            count,
            stage_label: stage_label.into(),
            group_key: group_key.into(),
        }
    }
}

/// Produces snapshots on demand
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current grouped counts. An empty vector is a successful
    /// fetch with no rows, distinct from an error.
    async fn fetch(&self) -> Result<Vec<SnapshotRow>, SourceError>;
}

/// Snapshot source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Source connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

impl SourceError {
    /// True when the source could not be reached at all, false when it was
    /// reachable but the query failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SourceError::Unavailable(_) | SourceError::ConnectTimeout(_)
        )
    }
}
