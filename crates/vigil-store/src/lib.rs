//! Durable storage for breakpoints, their watch expressions and the hits they
//! record.
//!
//! A [`Store`] wraps a single SQLite connection. The control plane keeps one
//! long-lived handle (see [`Store::open`]); code running on application threads
//! opens short-lived handles with [`Store::connect`]. Every write runs inside a
//! `BEGIN IMMEDIATE` transaction and is retried with jittered backoff while
//! another handle holds the write lock.

mod error;
mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

pub use error::{StoreError, StoreResult};

pub type BreakpointId = u64;
pub type ExpressionId = u64;
pub type HitId = u64;

/// File name of the database inside the store directory.
pub const DB_FILE_NAME: &str = "db.sqlite";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_MAX_BUSY_RETRIES: u32 = 32;
const BACKOFF_BASE_MS: u64 = 2;
const BACKOFF_CAP_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// SQLite's own busy handler timeout.
    pub busy_timeout: Duration,
    /// Extra attempts after SQLite gives up with `SQLITE_BUSY`.
    pub max_busy_retries: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_busy_retries: DEFAULT_MAX_BUSY_RETRIES,
        }
    }
}

/// A breakpoint as requested by a client, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBreakpoint {
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub file: String,
    pub line: u32,
    pub condition: Option<String>,
    /// Watch expressions in insertion order.
    pub expressions: Vec<String>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub id: ExpressionId,
    pub breakpoint_id: BreakpointId,
    pub text: String,
}

/// A recorded hit.
///
/// `breakpoint_id` is `None` once the breakpoint has been removed, while
/// `origin_breakpoint_id` always names the breakpoint that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub id: HitId,
    pub breakpoint_id: Option<BreakpointId>,
    pub origin_breakpoint_id: BreakpointId,
    pub created_at_ms: i64,
    /// Rendered expression values, index-aligned with the breakpoint's
    /// expressions at the time of the hit.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionValue {
    pub hit_id: HitId,
    pub expression_id: Option<ExpressionId>,
    pub value: String,
}

/// A hit waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHit {
    pub breakpoint_id: BreakpointId,
    pub values: Vec<String>,
}

/// Handle to the breakpoint database. Cheap to open; not shared across
/// threads by the debugger, although it is `Send + Sync`.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    conn: Mutex<Connection>,
    options: StoreOptions,
}

impl Store {
    /// Opens (creating if needed) `dir/db.sqlite` and applies the schema.
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(DB_FILE_NAME);

        let conn = open_connection(&path, &options)?;
        conn.execute_batch(schema::JOURNAL_PRAGMAS)?;
        conn.execute_batch(schema::SCHEMA)?;

        tracing::debug!(target: "vigil.store", path = %path.display(), "opened breakpoint store");
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            options,
        })
    }

    /// Opens a handle on an existing database without touching the schema.
    pub fn connect(db_path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = open_connection(&path, &options)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub fn add_breakpoint(&self, new: &NewBreakpoint) -> StoreResult<Breakpoint> {
        let created_at_ms = now_ms();
        let id = self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO breakpoint (file, line, condition, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![new.file, new.line, new.condition, created_at_ms],
            )?;
            let id = tx.last_insert_rowid() as BreakpointId;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO expression (breakpoint_id, position, text) VALUES (?1, ?2, ?3)",
                )?;
                for (position, text) in new.expressions.iter().enumerate() {
                    insert.execute(params![id, position as i64, text])?;
                }
            }
            tx.commit()?;
            Ok(id)
        })?;

        tracing::debug!(target: "vigil.store", id, file = %new.file, line = new.line, "added breakpoint");
        Ok(Breakpoint {
            id,
            file: new.file.clone(),
            line: new.line,
            condition: new.condition.clone(),
            expressions: new.expressions.clone(),
            created_at_ms,
        })
    }

    /// Deletes a breakpoint and its expressions. Recorded hits are kept with
    /// their live reference cleared. Returns `false` if no such breakpoint
    /// existed.
    pub fn remove_breakpoint(&self, id: BreakpointId) -> StoreResult<bool> {
        if !is_row_id(id) {
            return Ok(false);
        }
        let removed = self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = tx.execute("DELETE FROM breakpoint WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(changed > 0)
        })?;
        if removed {
            tracing::debug!(target: "vigil.store", id, "removed breakpoint");
        }
        Ok(removed)
    }

    pub fn get_breakpoint(&self, id: BreakpointId) -> StoreResult<Option<Breakpoint>> {
        if !is_row_id(id) {
            return Ok(None);
        }
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, file, line, condition, created_at_ms FROM breakpoint WHERE id = ?1",
                params![id],
                breakpoint_from_row,
            )
            .optional()?;
        match row {
            Some(mut breakpoint) => {
                breakpoint.expressions = expression_texts(&conn, breakpoint.id)?;
                Ok(Some(breakpoint))
            }
            None => Ok(None),
        }
    }

    /// All breakpoints, ordered by id.
    pub fn list_breakpoints(&self) -> StoreResult<Vec<Breakpoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, file, line, condition, created_at_ms FROM breakpoint ORDER BY id",
        )?;
        let mut breakpoints = stmt
            .query_map([], breakpoint_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for breakpoint in &mut breakpoints {
            breakpoint.expressions = expression_texts(&conn, breakpoint.id)?;
        }
        Ok(breakpoints)
    }

    pub fn expressions(&self, breakpoint_id: BreakpointId) -> StoreResult<Vec<Expression>> {
        if !is_row_id(breakpoint_id) {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, breakpoint_id, text FROM expression WHERE breakpoint_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![breakpoint_id], |row| {
            Ok(Expression {
                id: row.get(0)?,
                breakpoint_id: row.get(1)?,
                text: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Hits recorded for the breakpoint with this id, including hits written
    /// before it was removed. Ordered by hit id.
    pub fn get_hits(&self, breakpoint_id: BreakpointId) -> StoreResult<Vec<Hit>> {
        if !is_row_id(breakpoint_id) {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, breakpoint_id, origin_breakpoint_id, created_at_ms FROM hit \
             WHERE origin_breakpoint_id = ?1 ORDER BY id",
        )?;
        let mut hits = stmt
            .query_map(params![breakpoint_id], |row| {
                Ok(Hit {
                    id: row.get(0)?,
                    breakpoint_id: row.get(1)?,
                    origin_breakpoint_id: row.get(2)?,
                    created_at_ms: row.get(3)?,
                    values: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for hit in &mut hits {
            hit.values = expression_values(&conn, hit.id)?
                .into_iter()
                .map(|value| value.value)
                .collect();
        }
        Ok(hits)
    }

    pub fn hit_values(&self, hit_id: HitId) -> StoreResult<Vec<ExpressionValue>> {
        let conn = self.conn.lock();
        expression_values(&conn, hit_id)
    }

    /// Number of hit rows in the database.
    pub fn hit_count(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM hit", [], |row| row.get(0))?)
    }

    pub fn log_hit(&self, hit: &PendingHit) -> StoreResult<HitId> {
        let ids = self.log_hits_batch(std::slice::from_ref(hit))?;
        Ok(ids.first().copied().unwrap_or_default())
    }

    /// Writes all hits in one transaction and returns their ids in order.
    ///
    /// A hit whose breakpoint no longer exists is still recorded, with its
    /// live reference left `NULL`. On error nothing is written.
    pub fn log_hits_batch(&self, hits: &[PendingHit]) -> StoreResult<Vec<HitId>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let created_at_ms = now_ms();
        let ids = self.write(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut ids = Vec::with_capacity(hits.len());
            {
                let mut exists =
                    tx.prepare_cached("SELECT EXISTS(SELECT 1 FROM breakpoint WHERE id = ?1)")?;
                let mut expression_ids = tx.prepare_cached(
                    "SELECT id FROM expression WHERE breakpoint_id = ?1 ORDER BY position",
                )?;
                let mut insert_hit = tx.prepare_cached(
                    "INSERT INTO hit (breakpoint_id, origin_breakpoint_id, created_at_ms) \
                     VALUES (?1, ?2, ?3)",
                )?;
                let mut insert_value = tx.prepare_cached(
                    "INSERT INTO expression_value (hit_id, expression_id, position, value) \
                     VALUES (?1, ?2, ?3, ?4)",
                )?;

                let mut known: HashMap<BreakpointId, Option<Vec<ExpressionId>>> = HashMap::new();
                for hit in hits {
                    if !known.contains_key(&hit.breakpoint_id) {
                        let live: bool =
                            exists.query_row(params![hit.breakpoint_id], |row| row.get(0))?;
                        let entry = if live {
                            let ids = expression_ids
                                .query_map(params![hit.breakpoint_id], |row| row.get(0))?
                                .collect::<Result<Vec<ExpressionId>, _>>()?;
                            Some(ids)
                        } else {
                            None
                        };
                        known.insert(hit.breakpoint_id, entry);
                    }
                    let expressions = known.get(&hit.breakpoint_id).and_then(Option::as_ref);
                    let live_ref = expressions.map(|_| hit.breakpoint_id);

                    insert_hit.execute(params![live_ref, hit.breakpoint_id, created_at_ms])?;
                    let hit_id = tx.last_insert_rowid() as HitId;
                    for (position, value) in hit.values.iter().enumerate() {
                        let expression_id =
                            expressions.and_then(|ids| ids.get(position)).copied();
                        insert_value.execute(params![
                            hit_id,
                            expression_id,
                            position as i64,
                            value
                        ])?;
                    }
                    ids.push(hit_id);
                }
            }
            tx.commit()?;
            Ok(ids)
        })?;

        tracing::trace!(target: "vigil.store", count = ids.len(), "logged hits");
        Ok(ids)
    }

    /// Runs `op` against the connection, retrying while the database is busy.
    ///
    /// The connection lock is released between attempts.
    fn write<T>(
        &self,
        mut op: impl FnMut(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut attempt = 0u32;
        loop {
            let result = {
                let mut conn = self.conn.lock();
                op(&mut *conn)
            };
            match result {
                Err(err) if err.is_busy() && attempt < self.options.max_busy_retries => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        target: "vigil.store",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database busy; retrying write"
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

fn open_connection(path: &Path, options: &StoreOptions) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(options.busy_timeout)?;
    conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
    Ok(conn)
}

/// SQLite row ids are signed; ids past `i64::MAX` never name a row.
fn is_row_id(id: u64) -> bool {
    i64::try_from(id).is_ok()
}

fn breakpoint_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Breakpoint> {
    Ok(Breakpoint {
        id: row.get(0)?,
        file: row.get(1)?,
        line: row.get(2)?,
        condition: row.get(3)?,
        expressions: Vec::new(),
        created_at_ms: row.get(4)?,
    })
}

fn expression_texts(conn: &Connection, breakpoint_id: BreakpointId) -> StoreResult<Vec<String>> {
    let mut stmt = conn
        .prepare_cached("SELECT text FROM expression WHERE breakpoint_id = ?1 ORDER BY position")?;
    let rows = stmt.query_map(params![breakpoint_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

fn expression_values(conn: &Connection, hit_id: HitId) -> StoreResult<Vec<ExpressionValue>> {
    let mut stmt = conn.prepare_cached(
        "SELECT hit_id, expression_id, value FROM expression_value WHERE hit_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![hit_id], |row| {
        Ok(ExpressionValue {
            hit_id: row.get(0)?,
            expression_id: row.get(1)?,
            value: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Exponential backoff with full jitter, capped at [`BACKOFF_CAP_MS`].
fn backoff_delay(attempt: u32) -> Duration {
    let ceiling = BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(BACKOFF_CAP_MS);
    let jitter = rand::random::<u64>() % (ceiling + 1);
    Duration::from_millis(jitter.max(1))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
