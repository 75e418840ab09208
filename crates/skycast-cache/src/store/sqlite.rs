//! SQLite-backed persistent cache store.
//!
//! A single connection sits behind a mutex, so scans page through the key
//! space in fixed-size chunks and release the connection between chunks.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{expiry_for, type_matches, CacheStore, UsageCounters};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::policy::is_expired;
use crate::types::{CacheEntry, DataType, EntryMetadata, KeyFilter, ScannedEntry};

/// Rows fetched per lock acquisition during scans.
pub const DEFAULT_SCAN_CHUNK: usize = 500;

const METADATA_COLUMNS: &str =
    "key, length(payload), data_type, location_id, cached_at, expires_at, access_count";

/// SQLite cache for weather payloads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    usage: UsageCounters,
    scan_chunk: usize,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, clock)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
            clock,
            usage: UsageCounters::default(),
            scan_chunk: DEFAULT_SCAN_CHUNK,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Override the number of rows read per scan chunk.
    pub fn with_scan_chunk(mut self, rows: usize) -> Self {
        self.scan_chunk = rows.max(1);
        self
    }

    /// Initialize the database schema.
    ///
    /// Metadata columns are nullable so rows written by older or foreign
    /// writers can be detected as malformed instead of failing the scan.
    fn init_schema(&self) -> StoreResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload BLOB,
                data_type TEXT,
                location_id TEXT,
                cached_at INTEGER,
                expires_at INTEGER,
                access_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
            CREATE INDEX IF NOT EXISTS idx_cache_location ON cache_entries(location_id);
            "#,
        )?;
        Ok(())
    }

    /// Run raw SQL against the connection (for fixtures and migrations).
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn scan_page(
        &self,
        filter: &KeyFilter,
        after: Option<&str>,
    ) -> StoreResult<Vec<ScannedEntry>> {
        let (clause, arg) = filter_clause(filter);
        let sql = format!(
            "SELECT {} FROM cache_entries WHERE (?1 IS NULL OR key > ?1) AND {} ORDER BY key LIMIT ?2",
            METADATA_COLUMNS, clause
        );

        let mut args: Vec<Value> = vec![
            after.map_or(Value::Null, |k| Value::Text(k.to_string())),
            Value::Integer(self.scan_chunk as i64),
        ];
        if let Some(arg) = arg {
            args.push(Value::Text(arg));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), scanned_from_row)?;
        let page = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(page)
    }
}

impl CacheStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        data_type: Option<DataType>,
        location_id: Option<&str>,
        ttl: Duration,
    ) -> StoreResult<EntryMetadata> {
        let now = self.clock.now();
        let expires_at = expiry_for(now, ttl)?;
        let payload_bytes = payload.len();

        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            tx.execute(
                r#"
                INSERT INTO cache_entries
                (key, payload, data_type, location_id, cached_at, expires_at, access_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                "#,
                params![
                    key,
                    payload,
                    data_type.map(|t| t.as_str()),
                    location_id,
                    now.timestamp_millis(),
                    expires_at.timestamp_millis(),
                ],
            )?;
            tx.commit()?;
        }

        self.usage.record_write();
        // Millisecond storage precision is what a later read will observe.
        Ok(EntryMetadata {
            key: key.to_string(),
            data_type,
            location_id: location_id.map(str::to_string),
            cached_at: from_millis(now.timestamp_millis()).unwrap_or(now),
            expires_at: from_millis(expires_at.timestamp_millis()).unwrap_or(expires_at),
            access_count: 0,
            payload_bytes,
        })
    }

    fn get_as(&self, key: &str, data_type: Option<DataType>) -> StoreResult<Option<CacheEntry>> {
        let now = self.clock.now();
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                &format!("SELECT {}, payload FROM cache_entries WHERE key = ?1", METADATA_COLUMNS),
                params![key],
                |row| Ok((scanned_from_row(row)?, row.get::<_, Option<Vec<u8>>>(7).ok().flatten())),
            )
            .optional()?;

        let (meta, payload) = match row {
            Some((ScannedEntry::Valid(meta), Some(payload))) => (meta, payload),
            Some((ScannedEntry::Valid(_), None)) | Some((ScannedEntry::Malformed { .. }, _)) => {
                tracing::debug!(key, "Malformed cache row treated as miss");
                self.usage.record_miss();
                return Ok(None);
            }
            None => {
                self.usage.record_miss();
                return Ok(None);
            }
        };

        if is_expired(meta.expires_at, now) {
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE key = ?1 AND expires_at <= ?2",
                params![key, now.timestamp_millis()],
            )?;
            self.usage.record_deletions(removed);
            self.usage.record_miss();
            return Ok(None);
        }

        if !type_matches(&meta, data_type) {
            tracing::debug!(
                key,
                requested = ?data_type,
                stored = ?meta.data_type,
                "Cached entry has a different data type"
            );
            self.usage.record_miss();
            return Ok(None);
        }

        conn.execute(
            "UPDATE cache_entries SET access_count = access_count + 1 WHERE key = ?1",
            params![key],
        )?;
        self.usage.record_hit();

        Ok(Some(CacheEntry {
            metadata: EntryMetadata {
                access_count: meta.access_count + 1,
                ..meta
            },
            payload,
        }))
    }

    fn delete(&self, key: &str) -> StoreResult<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        self.usage.record_deletions(removed);
        Ok(removed)
    }

    fn delete_matching(&self, filter: &KeyFilter) -> StoreResult<usize> {
        let removed = match filter {
            KeyFilter::Keys(keys) => {
                let mut removed = 0;
                for key in keys {
                    removed += self
                        .conn
                        .lock()
                        .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                }
                removed
            }
            other => {
                let (clause, arg) = filter_clause(other);
                // Placeholder numbering in filter_clause starts at ?3.
                let sql = format!(
                    "DELETE FROM cache_entries WHERE {}",
                    clause.replace("?3", "?1")
                );
                let conn = self.conn.lock();
                match arg {
                    Some(arg) => conn.execute(&sql, params![arg])?,
                    None => conn.execute(&sql, [])?,
                }
            }
        };
        self.usage.record_deletions(removed);
        Ok(removed)
    }

    fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let removed = self.conn.lock().execute(
            "DELETE FROM cache_entries WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now.timestamp_millis()],
        )?;
        self.usage.record_deletions(removed);
        Ok(removed > 0)
    }

    fn delete_malformed(&self, key: &str) -> StoreResult<bool> {
        // Check and delete under one lock so a concurrent put cannot land between them.
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM cache_entries WHERE key = ?1", METADATA_COLUMNS),
                params![key],
                scanned_from_row,
            )
            .optional()?;
        if !matches!(row, Some(ScannedEntry::Malformed { .. })) {
            return Ok(false);
        }

        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        self.usage.record_deletions(removed);
        Ok(removed > 0)
    }

    fn scan(&self, filter: &KeyFilter) -> StoreResult<Vec<ScannedEntry>> {
        if let KeyFilter::Keys(keys) = filter {
            let mut found = Vec::new();
            for key in keys {
                let conn = self.conn.lock();
                let row = conn
                    .query_row(
                        &format!("SELECT {} FROM cache_entries WHERE key = ?1", METADATA_COLUMNS),
                        params![key],
                        scanned_from_row,
                    )
                    .optional()?;
                found.extend(row);
            }
            return Ok(found);
        }

        let mut results = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self.scan_page(filter, after.as_deref())?;
            let full = page.len() >= self.scan_chunk;
            after = page.last().map(|e| e.key().to_string());
            results.extend(page);
            if !full || after.is_none() {
                break;
            }
        }
        Ok(results)
    }

    fn cap_expiry(&self, key: &str, cap: DateTime<Utc>) -> StoreResult<bool> {
        let cap_ms = cap.timestamp_millis();
        let changed = self.conn.lock().execute(
            "UPDATE cache_entries SET expires_at = ?2 WHERE key = ?1 AND expires_at > ?2 AND cached_at < ?2",
            params![key, cap_ms],
        )?;
        Ok(changed > 0)
    }

    fn compact(&self) -> StoreResult<()> {
        self.conn.lock().execute_batch("VACUUM;")?;
        Ok(())
    }

    fn usage(&self) -> &UsageCounters {
        &self.usage
    }
}

/// SQL predicate for a filter plus its bound argument (always `?3`).
fn filter_clause(filter: &KeyFilter) -> (String, Option<String>) {
    match filter {
        KeyFilter::All => ("1 = 1".to_string(), None),
        KeyFilter::Prefix(prefix) => (
            "substr(key, 1, length(?3)) = ?3".to_string(),
            Some(prefix.clone()),
        ),
        KeyFilter::Location(loc) => ("location_id = ?3".to_string(), Some(loc.clone())),
        // Handled key by key by the callers.
        KeyFilter::Keys(_) => ("0 = 1".to_string(), None),
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Decode a metadata row; decoding problems become `Malformed`, not errors.
fn scanned_from_row(row: &Row) -> rusqlite::Result<ScannedEntry> {
    let key: String = row.get(0)?;
    Ok(match metadata_from_row(&key, row) {
        Ok(meta) => ScannedEntry::Valid(meta),
        Err(reason) => ScannedEntry::Malformed { key, reason },
    })
}

fn metadata_from_row(key: &str, row: &Row) -> Result<EntryMetadata, String> {
    let payload_bytes = opt_int(row, 1)?.ok_or("missing payload")?;
    let data_type = match opt_text(row, 2)? {
        Some(s) => Some(s.parse::<DataType>()?),
        None => None,
    };
    let location_id = opt_text(row, 3)?;
    let cached_at = opt_int(row, 4)?
        .and_then(from_millis)
        .ok_or("missing cached_at")?;
    let expires_at = opt_int(row, 5)?
        .and_then(from_millis)
        .ok_or("missing expires_at")?;
    let access_count = opt_int(row, 6)?.unwrap_or(0);

    if expires_at <= cached_at {
        return Err("expires_at does not follow cached_at".to_string());
    }

    Ok(EntryMetadata {
        key: key.to_string(),
        data_type,
        location_id,
        cached_at,
        expires_at,
        access_count: u64::try_from(access_count).unwrap_or(0),
        payload_bytes: usize::try_from(payload_bytes).unwrap_or(0),
    })
}

fn opt_int(row: &Row, idx: usize) -> Result<Option<i64>, String> {
    match row.get_ref(idx).map_err(|e| e.to_string())? {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(v) => Ok(Some(v)),
        other => Err(format!("column {} has type {}", idx, other.data_type())),
    }
}

fn opt_text(row: &Row, idx: usize) -> Result<Option<String>, String> {
    match row.get_ref(idx).map_err(|e| e.to_string())? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| e.to_string()),
        other => Err(format!("column {} has type {}", idx, other.data_type())),
    }
}
