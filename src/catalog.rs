//! Catalog and access log
//!
//! SQLite-backed store of content items and their access events. The
//! caching core consumes this through the `Catalog` trait so tests can
//! inject fakes; production wiring opens one database under the cache root.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::model::{AccessEvent, ContentItem};

/// Durable store of content items and per-item access events.
///
/// All operations are synchronous from the core's point of view; failures
/// surface as `StorageError` and abort only the current item or cycle.
pub trait Catalog: Send + Sync {
    fn find_by_id(&self, content_id: i64) -> Result<Option<ContentItem>, StorageError>;
    fn find_by_path(&self, path: &str) -> Result<Option<ContentItem>, StorageError>;
    fn all_ids(&self) -> Result<Vec<i64>, StorageError>;
    fn downloaded_ids(&self) -> Result<Vec<i64>, StorageError>;

    /// Insert or replace an item (unique by content id).
    fn upsert(&self, item: &ContentItem) -> Result<(), StorageError>;

    /// Flip `downloaded` on and record the cache-insertion time and final
    /// size after a successful fetch.
    fn mark_downloaded(&self, content_id: i64, cache_time: i64, size: u64)
        -> Result<(), StorageError>;

    /// Remove an item together with its accumulated access events.
    fn delete(&self, content_id: i64) -> Result<(), StorageError>;

    /// Total size of items with `downloaded = true`.
    fn total_cached_size(&self) -> Result<u64, StorageError>;

    /// Downloaded items whose cache-insertion time is older than `cutoff_ms`.
    fn find_stale(&self, cutoff_ms: i64) -> Result<Vec<ContentItem>, StorageError>;

    fn record_access(&self, event: &AccessEvent) -> Result<(), StorageError>;
    fn accesses_for(&self, content_id: i64) -> Result<Vec<AccessEvent>, StorageError>;

    /// Every downloaded item paired with its access history; the trainer's
    /// ground-truth input.
    fn all_with_accesses(&self) -> Result<Vec<(ContentItem, Vec<AccessEvent>)>, StorageError>;
}

/// SQLite implementation. WAL mode for concurrent readers; the connection
/// sits behind a mutex so the catalog can be shared as `Arc<dyn Catalog>`.
pub struct SqliteCatalog {
    db: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open or create the catalog database under the given directory.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let db_path = dir.join("catalog.db");
        let db = Connection::open(&db_path)?;
        info!(path = %db_path.display(), "Catalog opened");
        Self::init(db)
    }

    /// In-memory catalog, used by tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StorageError> {
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS content (
                content_id   INTEGER PRIMARY KEY,
                origin_url   TEXT NOT NULL,
                path         TEXT NOT NULL UNIQUE,
                size         INTEGER NOT NULL DEFAULT 0,
                publish_time INTEGER NOT NULL DEFAULT 0,
                cache_time   INTEGER NOT NULL DEFAULT 0,
                downloaded   INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS access_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id  INTEGER NOT NULL,
                client_addr TEXT NOT NULL,
                timestamp   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_access_content
                ON access_log(content_id);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
        Ok(ContentItem {
            content_id: row.get(0)?,
            origin_url: row.get(1)?,
            path: row.get(2)?,
            size: row.get::<_, i64>(3)? as u64,
            publish_time: row.get(4)?,
            cache_time: row.get(5)?,
            downloaded: row.get::<_, i64>(6)? != 0,
        })
    }
}

const ITEM_COLUMNS: &str =
    "content_id, origin_url, path, size, publish_time, cache_time, downloaded";

impl Catalog for SqliteCatalog {
    fn find_by_id(&self, content_id: i64) -> Result<Option<ContentItem>, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {ITEM_COLUMNS} FROM content WHERE content_id = ?1"
        ))?;
        Ok(stmt
            .query_row([content_id], Self::row_to_item)
            .optional()?)
    }

    fn find_by_path(&self, path: &str) -> Result<Option<ContentItem>, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {ITEM_COLUMNS} FROM content WHERE path = ?1"
        ))?;
        Ok(stmt.query_row([path], Self::row_to_item).optional()?)
    }

    fn all_ids(&self) -> Result<Vec<i64>, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let mut stmt = db.prepare_cached("SELECT content_id FROM content ORDER BY content_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn downloaded_ids(&self) -> Result<Vec<i64>, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let mut stmt = db.prepare_cached(
            "SELECT content_id FROM content WHERE downloaded = 1 ORDER BY content_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn upsert(&self, item: &ContentItem) -> Result<(), StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        db.execute(
            "INSERT INTO content (content_id, origin_url, path, size,
                                  publish_time, cache_time, downloaded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(content_id) DO UPDATE SET
                origin_url = ?2, path = ?3, size = ?4,
                publish_time = ?5, cache_time = ?6, downloaded = ?7",
            params![
                item.content_id,
                item.origin_url,
                item.path,
                item.size as i64,
                item.publish_time,
                item.cache_time,
                item.downloaded as i64,
            ],
        )?;
        debug!(content_id = item.content_id, "Upserted content item");
        Ok(())
    }

    fn mark_downloaded(
        &self,
        content_id: i64,
        cache_time: i64,
        size: u64,
    ) -> Result<(), StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let changed = db.execute(
            "UPDATE content SET downloaded = 1, cache_time = ?2, size = ?3
             WHERE content_id = ?1",
            params![content_id, cache_time, size as i64],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(content_id));
        }
        Ok(())
    }

    fn delete(&self, content_id: i64) -> Result<(), StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        db.execute("DELETE FROM access_log WHERE content_id = ?1", [content_id])?;
        db.execute("DELETE FROM content WHERE content_id = ?1", [content_id])?;
        debug!(content_id, "Deleted content item and its access log");
        Ok(())
    }

    fn total_cached_size(&self) -> Result<u64, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let total: i64 = db.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM content WHERE downloaded = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    fn find_stale(&self, cutoff_ms: i64) -> Result<Vec<ContentItem>, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {ITEM_COLUMNS} FROM content
             WHERE downloaded = 1 AND cache_time < ?1
             ORDER BY content_id"
        ))?;
        let items = stmt
            .query_map([cutoff_ms], Self::row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn record_access(&self, event: &AccessEvent) -> Result<(), StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        db.execute(
            "INSERT INTO access_log (content_id, client_addr, timestamp)
             VALUES (?1, ?2, ?3)",
            params![event.content_id, event.client_addr, event.timestamp],
        )?;
        Ok(())
    }

    fn accesses_for(&self, content_id: i64) -> Result<Vec<AccessEvent>, StorageError> {
        let db = self.db.lock().expect("catalog lock poisoned");
        let mut stmt = db.prepare_cached(
            "SELECT content_id, client_addr, timestamp FROM access_log
             WHERE content_id = ?1 ORDER BY timestamp",
        )?;
        let events = stmt
            .query_map([content_id], |row| {
                Ok(AccessEvent {
                    content_id: row.get(0)?,
                    client_addr: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn all_with_accesses(&self) -> Result<Vec<(ContentItem, Vec<AccessEvent>)>, StorageError> {
        let items = {
            let db = self.db.lock().expect("catalog lock poisoned");
            let mut stmt = db.prepare_cached(&format!(
                "SELECT {ITEM_COLUMNS} FROM content WHERE downloaded = 1
                 ORDER BY content_id"
            ))?;
            let items = stmt
                .query_map([], Self::row_to_item)?
                .collect::<Result<Vec<_>, _>>()?;
            items
        };

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let accesses = self.accesses_for(item.content_id)?;
            out.push((item, accesses));
        }
        Ok(out)
    }
}
