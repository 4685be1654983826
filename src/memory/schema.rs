use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::error::{Error, Result};

/// Current schema version.  Increment when adding new migrations.
const SCHEMA_VERSION: u32 = 1;

/// `meta` key under which the pinned embedding dimension is recorded.
const EMBEDDING_DIM_KEY: &str = "embedding_dimensions";

/// Apply all pending migrations to `conn`.
///
/// Tables are created with `IF NOT EXISTS` and the `meta` table tracks which
/// version has been applied. Everything runs in one immediate transaction, so
/// a racing initializer either sees no schema or the complete one.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    // WAL lets searches proceed while another user's append is committing.
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    // ------------------------------------------------------------------
    // meta: tracks schema version and arbitrary key/value pairs.
    // ------------------------------------------------------------------
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let current_version = get_schema_version(&tx)?;

    if current_version >= SCHEMA_VERSION {
        debug!(version = current_version, "memory schema up to date");
        return Ok(());
    }

    if current_version < 1 {
        migrate_v1(&tx)?;
    }

    set_schema_version(&tx, SCHEMA_VERSION)?;
    tx.commit()?;
    debug!(version = SCHEMA_VERSION, "memory schema migrated");
    Ok(())
}

// ---------------------------------------------------------------------------
// v1: initial tables
// ---------------------------------------------------------------------------

fn migrate_v1(conn: &Connection) -> Result<()> {
    // ------------------------------------------------------------------
    // user_memories: one immutable row per utterance. Embeddings are
    // little-endian f32 blobs; `dimensions` is kept alongside so a row can
    // be validated without decoding it.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_memories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT    NOT NULL,
            role        TEXT    NOT NULL CHECK (role IN ('user', 'assistant')),
            content     TEXT    NOT NULL,
            embedding   BLOB    NOT NULL,
            dimensions  INTEGER NOT NULL,
            ts          TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    // Every query is scoped to a single user.
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_user_memories_username ON user_memories(username, id);",
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

fn get_schema_version(conn: &Connection) -> Result<u32> {
    Ok(get_meta(conn, "schema_version")?
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Pin the store's embedding dimension on first use and reject any later
/// vector of a different length.
///
/// Must run inside the same transaction as the insert it guards.
pub fn check_embedding_dimensions(conn: &Connection, dimensions: usize) -> Result<()> {
    match get_meta(conn, EMBEDDING_DIM_KEY)? {
        Some(pinned) => {
            let pinned: usize = pinned.parse().map_err(|_| {
                Error::persistence(format!("invalid pinned embedding dimension '{pinned}'"))
            })?;
            if pinned != dimensions {
                return Err(Error::persistence(format!(
                    "embedding has {dimensions} dimensions but the store holds {pinned}-dimensional vectors"
                )));
            }
        }
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                params![EMBEDDING_DIM_KEY, dimensions.to_string()],
            )?;
        }
    }
    Ok(())
}

/// The embedding dimension pinned by the first insert, if any.
pub fn pinned_dimensions(conn: &Connection) -> Result<Option<usize>> {
    Ok(get_meta(conn, EMBEDDING_DIM_KEY)?.and_then(|v| v.parse().ok()))
}
