use crate::clock::{Clock, SystemClock};
use crate::config::CameraId;
use crate::error::{PaxcountError, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, FromRow, SqliteConnection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One persisted count snapshot. Immutable once constructed; rows are
/// append-only and never mutated or deleted by the core.
#[derive(Debug, Clone, FromRow)]
pub struct DetectionCount {
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    pub count: i64,
}

/// Append-only persistence for periodic count snapshots.
///
/// Every camera worker shares one connection; the mutex is held for the
/// duration of a single insert, which is all the serialization append-only
/// rows need. The connection is opened once at session start and closed once
/// after the last worker has joined.
pub struct AggregationStore {
    conn: Mutex<Option<SqliteConnection>>,
    clock: Arc<dyn Clock>,
}

impl AggregationStore {
    /// Open (creating the file if missing) and run idempotent setup.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let conn = SqliteConnection::connect_with(&options).await?;
        info!("Aggregation store opened at {}", path.display());

        let store = Self {
            conn: Mutex::new(Some(conn)),
            clock,
        };
        store.setup().await?;
        Ok(store)
    }

    /// In-memory store for tests and dry runs.
    pub async fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        let conn = SqliteConnection::connect_with(&options).await?;
        let store = Self {
            conn: Mutex::new(Some(conn)),
            clock,
        };
        store.setup().await?;
        Ok(store)
    }

    /// Create the Counts table. A no-op when it already exists.
    async fn setup(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = Self::require_conn(&mut guard)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS Counts (
                timestamp TEXT,
                camera_id TEXT,
                count INTEGER
            )",
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Append one `(now, camera_id, count)` row. Safe to call concurrently
    /// from every worker.
    pub async fn insert(&self, camera_id: &CameraId, count: u32) -> Result<()> {
        let timestamp = self.clock.now();
        let mut guard = self.conn.lock().await;
        let conn = Self::require_conn(&mut guard)?;
        sqlx::query("INSERT INTO Counts (timestamp, camera_id, count) VALUES (?1, ?2, ?3)")
            .bind(timestamp)
            .bind(camera_id.to_string())
            .bind(count as i64)
            .execute(conn)
            .await?;
        debug!("Stored count {} for camera {}", count, camera_id);
        Ok(())
    }

    /// Read back all snapshots in insertion order. Operator/report query;
    /// the session core itself never reads.
    pub async fn fetch_counts(&self) -> Result<Vec<DetectionCount>> {
        let mut guard = self.conn.lock().await;
        let conn = Self::require_conn(&mut guard)?;
        let rows = sqlx::query_as::<_, DetectionCount>(
            "SELECT timestamp, camera_id, count FROM Counts ORDER BY rowid",
        )
        .fetch_all(conn)
        .await?;
        Ok(rows)
    }

    /// Release the underlying connection. Called exactly once at session end;
    /// later calls (and inserts) fail cleanly.
    pub async fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .await
            .take()
            .ok_or_else(|| PaxcountError::system("aggregation store already closed"))?;
        conn.close().await?;
        info!("Aggregation store closed");
        Ok(())
    }

    fn require_conn<'a>(
        guard: &'a mut Option<SqliteConnection>,
    ) -> Result<&'a mut SqliteConnection> {
        guard
            .as_mut()
            .ok_or_else(|| PaxcountError::system("aggregation store is closed"))
    }
}
