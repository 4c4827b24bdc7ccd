use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

use shared::domain::{PersistedRide, RideState};

/// Durable home of the current ride record, one row per session key.
#[async_trait]
pub trait RideRecordStore: Send + Sync {
    async fn save_ride(&self, session_key: &str, record: &PersistedRide) -> Result<()>;
    async fn load_ride(&self, session_key: &str) -> Result<Option<PersistedRide>>;
    /// Returns whether a record was removed.
    async fn clear_ride(&self, session_key: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRideSummary {
    pub session_key: String,
    pub ride_id: Option<String>,
    pub status: RideState,
    pub recorded_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own empty schema.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open ride store at '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn list_rides(&self) -> Result<Vec<StoredRideSummary>> {
        let rows = sqlx::query(
            "SELECT session_key, ride_id, status, recorded_at_ms FROM persisted_rides
             ORDER BY recorded_at_ms DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<StoredRideSummary> {
                let status: String = row.try_get("status")?;
                Ok(StoredRideSummary {
                    session_key: row.try_get("session_key")?,
                    ride_id: row.try_get("ride_id")?,
                    status: parse_status(&status)?,
                    recorded_at: millis_to_datetime(row.try_get("recorded_at_ms")?)?,
                })
            })
            .collect()
    }

    /// Deletes every record stamped before `cutoff`.
    pub async fn purge_recorded_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM persisted_rides WHERE recorded_at_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .context("failed to purge stale ride records")?;
        let purged = result.rows_affected();
        if purged > 0 {
            info!(purged, %cutoff, "storage: purged stale ride records");
        }
        Ok(purged)
    }
}

#[async_trait]
impl RideRecordStore for Storage {
    async fn save_ride(&self, session_key: &str, record: &PersistedRide) -> Result<()> {
        let record_json =
            serde_json::to_string(record).context("failed to encode persisted ride")?;
        sqlx::query(
            "INSERT INTO persisted_rides (session_key, ride_id, status, recorded_at_ms, record_json, updated_at)
             VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(session_key) DO UPDATE SET
                ride_id = excluded.ride_id,
                status = excluded.status,
                recorded_at_ms = excluded.recorded_at_ms,
                record_json = excluded.record_json,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(session_key)
        .bind(record.ride_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(record.status.as_str())
        .bind(record.timestamp.timestamp_millis())
        .bind(record_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save ride for session '{session_key}'"))?;
        debug!(session_key, status = %record.status, "storage: ride record saved");
        Ok(())
    }

    async fn load_ride(&self, session_key: &str) -> Result<Option<PersistedRide>> {
        let row = sqlx::query("SELECT record_json FROM persisted_rides WHERE session_key = ?")
            .bind(session_key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let record_json: String = row.try_get(0)?;
        let record = serde_json::from_str(&record_json).with_context(|| {
            format!("persisted ride for session '{session_key}' is not valid JSON")
        })?;
        Ok(Some(record))
    }

    async fn clear_ride(&self, session_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM persisted_rides WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_status(raw: &str) -> Result<RideState> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("unknown ride status '{raw}' in storage"))
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .with_context(|| format!("invalid recorded_at_ms value {millis}"))
}

pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
