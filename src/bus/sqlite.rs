//! SQLite-backed durable bus
//!
//! Messages are appended to a single `messages` table; each durable
//! consumer's acknowledged position per topic lives in `consumers`.

use tokio_util::sync::CancellationToken;
use super::traits::{BusError, BusResult, Delivery, MessageBus, Subscription};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// How often an idle subscriber re-checks the table for messages written
/// by other processes sharing the same file.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

struct Shared {
    conn: Mutex<Option<Connection>>,
    notify: Notify,
    closed: AtomicBool,
    location: String,
}

impl Shared {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> BusResult<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(BusError::Closed)?;
        Ok(f(conn)?)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Durable bus stored in one SQLite database.
///
/// Cloning is cheap; clones share the connection. The connection is
/// released by [`MessageBus::close`] or when the last clone is dropped.
#[derive(Clone)]
pub struct SqliteBus {
    shared: Arc<Shared>,
}

impl SqliteBus {
    fn from_connection(conn: Connection, location: String) -> Self {
        Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(Some(conn)),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                location,
            }),
        }
    }

    /// Open the bus file at `path`. Call [`MessageBus::initialize`] before use.
    pub fn open(path: impl AsRef<Path>) -> BusResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let location = path.display().to_string();
        let conn = Connection::open(path).map_err(|source| BusError::Connect {
            path: location.clone(),
            source,
        })?;
        Ok(Self::from_connection(conn, location))
    }

    /// Open a private in-memory bus (useful for testing)
    pub fn open_in_memory() -> BusResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| BusError::Connect {
            path: ":memory:".to_string(),
            source,
        })?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    /// Open and initialize in one step.
    pub async fn connect(path: impl AsRef<Path>) -> BusResult<Self> {
        let bus = Self::open(path)?;
        bus.initialize().await?;
        Ok(bus)
    }

    /// Number of messages ever published on `topic` and still retained
    pub fn message_count(&self, topic: &str) -> BusResult<usize> {
        self.shared.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE topic = ?1",
                params![topic],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|n| n as usize)
    }

    /// Last sequence acknowledged by `consumer` on `topic` (0 if none)
    pub fn acked_position(&self, topic: &str, consumer: &str) -> BusResult<i64> {
        self.shared.with_conn(|conn| acked_position(conn, topic, consumer))
    }
}

fn acked_position(conn: &Connection, topic: &str, consumer: &str) -> rusqlite::Result<i64> {
    Ok(conn
        .query_row(
            "SELECT acked FROM consumers WHERE name = ?1 AND topic = ?2",
            params![consumer, topic],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

#[async_trait]
impl MessageBus for SqliteBus {
    async fn initialize(&self) -> BusResult<()> {
        self.shared.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    topic TEXT NOT NULL,
                    payload BLOB NOT NULL,
                    published_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_topic
                    ON messages(topic, seq);

                CREATE TABLE IF NOT EXISTS consumers (
                    name TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    acked INTEGER NOT NULL,
                    PRIMARY KEY (name, topic)
                );
                "#,
            )
        })?;
        info!(location = %self.shared.location, "Bus initialized");
        Ok(())
    }

    async fn recreate(&self) -> BusResult<()> {
        let dropped = self.shared.with_conn(|conn| {
            let dropped = conn.execute("DELETE FROM messages", [])?;
            conn.execute("DELETE FROM consumers", [])?;
            Ok(dropped)
        })?;
        warn!(dropped = dropped, "Recreated bus stream; queued messages discarded");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()> {
        if self.shared.is_closed() {
            return Err(BusError::Closed);
        }
        let seq = self.shared.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (topic, payload, published_at) VALUES (?1, ?2, ?3)",
                params![topic, payload, chrono::Utc::now().to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        debug!(topic = %topic, seq = seq, bytes = payload.len(), "Published message");
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer: &str,
        cancel: CancellationToken,
    ) -> BusResult<Box<dyn Subscription>> {
        if self.shared.is_closed() {
            return Err(BusError::Closed);
        }
        let cursor = self
            .shared
            .with_conn(|conn| acked_position(conn, topic, consumer))?;
        info!(topic = %topic, consumer = %consumer, position = cursor, "Subscribed");
        Ok(Box::new(SqliteSubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            consumer: consumer.to_string(),
            cancel,
            cursor,
        }))
    }

    async fn high_water_mark(&self, topic: &str) -> BusResult<i64> {
        self.shared.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE topic = ?1",
                params![topic],
                |row| row.get(0),
            )
        })
    }

    async fn next_pending(&self, topic: &str, consumer: &str) -> BusResult<Option<i64>> {
        self.shared.with_conn(|conn| {
            let acked = acked_position(conn, topic, consumer)?;
            conn.query_row(
                "SELECT MIN(seq) FROM messages WHERE topic = ?1 AND seq > ?2",
                params![topic, acked],
                |row| row.get(0),
            )
        })
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let conn = self.shared.conn.lock().unwrap().take();
        if let Some(conn) = conn {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "Failed to close bus connection cleanly");
            }
        }
        self.shared.notify.notify_waiters();
        info!(location = %self.shared.location, "Bus closed");
    }
}

/// Subscription over one topic of a [`SqliteBus`]
struct SqliteSubscription {
    shared: Arc<Shared>,
    topic: String,
    consumer: String,
    cancel: CancellationToken,
    /// Last sequence handed out (not necessarily acknowledged)
    cursor: i64,
}

impl SqliteSubscription {
    fn fetch_next(&self) -> BusResult<Option<Delivery>> {
        self.shared.with_conn(|conn| {
            conn.query_row(
                "SELECT seq, payload FROM messages WHERE topic = ?1 AND seq > ?2 ORDER BY seq LIMIT 1",
                params![self.topic, self.cursor],
                |row| {
                    Ok(Delivery {
                        sequence: row.get(0)?,
                        topic: self.topic.clone(),
                        payload: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }
}

#[async_trait]
impl Subscription for SqliteSubscription {
    async fn next(&mut self) -> Option<BusResult<Delivery>> {
        let shared = Arc::clone(&self.shared);
        loop {
            if shared.is_closed() {
                return None;
            }
            // Register interest before checking so a publish in between is not missed.
            let notified = shared.notify.notified();

            match self.fetch_next() {
                Ok(Some(delivery)) => {
                    self.cursor = delivery.sequence;
                    return Some(Ok(delivery));
                }
                Ok(None) => {}
                Err(BusError::Closed) => return None,
                Err(e) => return Some(Err(e)),
            }

            if self.cancel.is_cancelled() {
                debug!(topic = %self.topic, consumer = %self.consumer, "Subscription drained");
                return None;
            }

            tokio::select! {
                _ = notified => {}
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> BusResult<()> {
        self.shared.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO consumers (name, topic, acked) VALUES (?1, ?2, ?3)
                ON CONFLICT(name, topic) DO UPDATE SET acked = MAX(acked, excluded.acked)
                "#,
                params![self.consumer, self.topic, delivery.sequence],
            )
        })?;
        Ok(())
    }
}
