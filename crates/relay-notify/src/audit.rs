//! Audit log: a bounded, never-blocking sink in front of durable storage.
//!
//! Dispatch workers hand records to [`AuditSink::record`], which only ever
//! `try_send`s. A single [`AuditWriter`] task drains the buffer into an
//! [`AuditStore`]. When the buffer is full the newest record is dropped and
//! counted. Storage errors are logged and never reach the caller.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tokio::sync::{mpsc, watch};

use relay_core::error::{RelayError, Result};
use relay_core::traits::AuditStore;
use relay_core::types::AuditRecord;

#[derive(Default)]
struct SinkCounters {
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Audit counters for the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AuditStats {
    pub written: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Cheap, cloneable producer handle.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditRecord>>,
    counters: Arc<SinkCounters>,
}

impl AuditSink {
    /// Create a sink with room for `capacity` pending records, plus the
    /// writer that drains it.
    pub fn new(capacity: usize, store: Arc<dyn AuditStore>) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(SinkCounters::default());
        let sink = Self {
            tx: Some(tx),
            counters: counters.clone(),
        };
        let writer = AuditWriter {
            rx,
            store,
            counters,
        };
        (sink, writer)
    }

    /// Sink that discards everything, for `audit.enabled = false`.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            counters: Arc::new(SinkCounters::default()),
        }
    }

    /// Offer a record. Never blocks; a full or closed buffer drops it.
    pub fn record(&self, record: AuditRecord) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(record) {
            let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "buffer full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            tracing::warn!("📝 Audit record dropped ({reason}), {dropped} dropped so far");
        }
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            written: self.counters.written.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Consumer half of the audit buffer.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditRecord>,
    store: Arc<dyn AuditStore>,
    counters: Arc<SinkCounters>,
}

impl AuditWriter {
    /// Drain records until shutdown, then flush what is buffered within `grace`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, grace: Duration) {
        tracing::info!("📝 Audit writer started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = self.rx.recv() => match next {
                    Some(record) => self.write(&record).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        let pending = self.rx.len();
        let flushed = tokio::time::timeout(grace, async {
            while let Some(record) = self.rx.recv().await {
                self.write(&record).await;
            }
        })
        .await;
        match flushed {
            Ok(()) => tracing::info!("📝 Audit writer stopped ({pending} flushed on shutdown)"),
            Err(_) => tracing::warn!(
                "📝 Audit flush exceeded {}s, {} records discarded",
                grace.as_secs(),
                self.rx.len()
            ),
        }
    }

    async fn write(&self, record: &AuditRecord) {
        match self.store.append(record).await {
            Ok(()) => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("📝 Audit append failed for {}: {e}", record.user_id);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// SQLite store
// ═══════════════════════════════════════════════════════════════

/// `events` table in a local SQLite file.
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Open or create the audit database, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| RelayError::audit(format!("open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RelayError::audit(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date_add TEXT NOT NULL,
                user_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                recipient TEXT NOT NULL,
                success INTEGER NOT NULL,
                msg TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_date ON events(date_add);
            ",
        )
        .map_err(|e| RelayError::audit(format!("migrate: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RelayError::audit(format!("lock: {e}")))?;
        let mut stmt = conn
            .prepare(
                "SELECT date_add, user_id, channel, recipient, success, msg
                 FROM events ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| RelayError::audit(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let date: String = row.get(0)?;
                Ok(AuditRecord {
                    timestamp: chrono::DateTime::parse_from_rfc3339(&date)
                        .map(|d| d.with_timezone(&chrono::Utc))
                        .unwrap_or_default(),
                    user_id: row.get(1)?,
                    channel: row.get(2)?,
                    recipient: row.get(3)?,
                    success: row.get::<_, i64>(4)? != 0,
                    message: row.get(5)?,
                })
            })
            .map_err(|e| RelayError::audit(e.to_string()))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::audit(e.to_string()))
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RelayError::audit(format!("lock: {e}")))?;
        conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| RelayError::audit(e.to_string()))
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| RelayError::audit(format!("lock: {e}")))?;
            conn.execute(
                "INSERT INTO events (date_add, user_id, channel, recipient, success, msg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.timestamp.to_rfc3339(),
                    record.user_id,
                    record.channel,
                    record.recipient,
                    record.success as i64,
                    record.message,
                ],
            )
            .map_err(|e| RelayError::audit(format!("insert: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| RelayError::audit(format!("join: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store that never finishes an append.
    struct StuckStore;

    #[async_trait]
    impl AuditStore for StuckStore {
        async fn append(&self, _record: &AuditRecord) -> Result<()> {
            std::future::pending().await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn append(&self, _record: &AuditRecord) -> Result<()> {
            Err(RelayError::audit("disk full"))
        }
    }

    fn rec(user: &str) -> AuditRecord {
        AuditRecord::new(user, "+100", "sms", true, "Sent")
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let (sink, _writer) = AuditSink::new(4, Arc::new(StuckStore));
        let start = std::time::Instant::now();
        for i in 0..5 {
            sink.record(rec(&format!("U{i}")));
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn test_disabled_sink_is_silent() {
        let sink = AuditSink::disabled();
        sink.record(rec("U1"));
        assert_eq!(sink.stats(), AuditStats::default());
    }

    #[tokio::test]
    async fn test_writer_persists_and_flushes_on_shutdown() {
        let store = Arc::new(SqliteAuditStore::open_in_memory().unwrap());
        let (sink, writer) = AuditSink::new(16, store.clone());
        for i in 0..3 {
            sink.record(rec(&format!("U{i}")));
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(writer.run(rx, Duration::from_secs(2)));
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(sink.stats().written, 3);
        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_id, "U2");
        assert!(recent[0].success);
    }

    #[tokio::test]
    async fn test_store_errors_are_counted_not_raised() {
        let (sink, writer) = AuditSink::new(8, Arc::new(FailingStore));
        sink.record(rec("U1"));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(writer.run(rx, Duration::from_secs(1)));
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(sink.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_sqlite_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/events.db");
        let store = SqliteAuditStore::open(&path).unwrap();
        let long = "m".repeat(900);
        store
            .append(&AuditRecord::new("U9", "https://hook", "callback", false, &long))
            .await
            .unwrap();
        let rows = store.recent(10).unwrap();
        assert_eq!(rows[0].message.len(), 500);
        assert_eq!(rows[0].channel, "callback");
        assert!(!rows[0].success);
    }
}
