//! SQL schema for the breakpoint store.
//!
//! Every statement is idempotent; the schema is applied each time a
//! long-lived handle is opened.

/// Per-connection settings. WAL mode is persisted in the database file, so
/// short-lived handles only need the connection-scoped pragmas.
pub(crate) const CONNECTION_PRAGMAS: &str = "
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;
";

pub(crate) const JOURNAL_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
";

/// `AUTOINCREMENT` on `breakpoint` and `hit` keeps ids from being reused once
/// the newest row is deleted.
///
/// Hits outlive their breakpoint: `hit.breakpoint_id` is nulled on removal and
/// `origin_breakpoint_id` keeps the id that fired. Likewise
/// `expression_value.expression_id` is nulled when the expression goes away.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS breakpoint (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    condition TEXT,
    created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS expression (
    id INTEGER PRIMARY KEY,
    breakpoint_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    FOREIGN KEY (breakpoint_id) REFERENCES breakpoint(id)
        ON DELETE CASCADE
        ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS expression_breakpoint_idx
    ON expression (breakpoint_id, position);

CREATE TABLE IF NOT EXISTS hit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    breakpoint_id INTEGER,
    origin_breakpoint_id INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL,
    FOREIGN KEY (breakpoint_id) REFERENCES breakpoint(id)
        ON DELETE SET NULL
        ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS hit_origin_idx
    ON hit (origin_breakpoint_id, id);

CREATE TABLE IF NOT EXISTS expression_value (
    id INTEGER PRIMARY KEY,
    hit_id INTEGER NOT NULL,
    expression_id INTEGER,
    position INTEGER NOT NULL,
    value TEXT NOT NULL,
    FOREIGN KEY (hit_id) REFERENCES hit(id)
        ON DELETE CASCADE
        ON UPDATE CASCADE,
    FOREIGN KEY (expression_id) REFERENCES expression(id)
        ON DELETE SET NULL
        ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS expression_value_hit_idx
    ON expression_value (hit_id, position);
";
