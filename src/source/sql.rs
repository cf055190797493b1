//! SQL-backed snapshot source

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;

use super::{SnapshotRow, SnapshotSource, SourceError};
use crate::config::SourceConfig;

/// Grouped batch counts per processing stage and project
pub const DEFAULT_QUERY: &str = "SELECT COUNT(b.id) AS batch_count, \
     ps.name AS processing_stage, \
     p.name AS project \
     FROM batch AS b \
     JOIN processing_stage AS ps ON b.processing_stage_id = ps.id \
     JOIN project AS p ON b.project_id = p.id \
     GROUP BY ps.name, p.name";

/// Queries a Postgres database for grouped counts, one connection per fetch
pub struct SqlSnapshotSource {
    options: PgConnectOptions,
    query: String,
    timeout: Duration,
}

impl SqlSnapshotSource {
    pub fn new(config: &SourceConfig) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database);
        if let Some(user) = &config.user {
            options = options.username(user);
        }
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        Self {
            options,
            query: config.query.clone(),
            timeout: config.timeout,
        }
    }

    async fn connect(&self) -> Result<PgConnection, SourceError> {
        tokio::time::timeout(self.timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| SourceError::ConnectTimeout(self.timeout))?
            .map_err(|e| SourceError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for SqlSnapshotSource {
    async fn fetch(&self) -> Result<Vec<SnapshotRow>, SourceError> {
        let mut conn = self.connect().await?;

        let result = tokio::time::timeout(
            self.timeout,
            sqlx::query_as::<_, (i64, String, String)>(&self.query).fetch_all(&mut conn),
        )
        .await;

        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Failed to close source connection cleanly");
        }

        let rows = result
            .map_err(|_| SourceError::QueryTimeout(self.timeout))?
            .map_err(|e| SourceError::Query(e.to_string()))?;

        rows.into_iter().map(row_from_tuple).collect()
    }
}

fn row_from_tuple((count, stage_label, group_key): (i64, String, String)) -> Result<SnapshotRow, SourceError> {
    let count = u64::try_from(count).map_err(|_| {
        SourceError::InvalidRow(format!("negative count {} for {}", count, group_key))
    })?;
    Ok(SnapshotRow {
        count,
        stage_label,
        group_key,
    })
}
