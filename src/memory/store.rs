use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, TransactionBehavior};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

use super::embeddings::EmbeddingProvider;
use super::schema;
use super::search::rank;
use super::types::{MemoryHit, MemoryRecord, Role};

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// How long a writer waits for SQLite's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregate figures about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub records: u64,
    pub users: u64,
    /// Dimension pinned by the first insert.
    pub dimensions: Option<usize>,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Append-only store of per-user utterances with cosine-similarity search.
///
/// Backed by a SQLite file shared by every user; rows are partitioned by
/// username at query time. The handle is cheaply cloneable and safe to use
/// from many sessions at once: each operation checks a pooled connection out
/// on a blocking thread.
#[derive(Clone)]
pub struct MemoryStore {
    pool: DbPool,
    embedder: Arc<dyn EmbeddingProvider>,
    schema_ready: Arc<OnceCell<()>>,
    default_limit: i64,
    path: PathBuf,
}

impl MemoryStore {
    /// Open (or create) the database at `path`.
    ///
    /// The schema is not touched here; call [`MemoryStore::ensure_schema`]
    /// once at startup.
    pub fn open(
        path: &Path,
        pool_size: u32,
        default_limit: i64,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        if default_limit <= 0 {
            return Err(Error::InvalidArgument(format!(
                "default search limit must be positive, got {default_limit}"
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::persistence(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(BUSY_TIMEOUT)
            .build(manager)?;

        info!(
            db = %path.display(),
            model = embedder.model_name(),
            "memory store opened"
        );

        Ok(Self {
            pool,
            embedder,
            schema_ready: Arc::new(OnceCell::new()),
            default_limit,
            path: path.to_path_buf(),
        })
    }

    /// Open the store described by the application configuration.
    pub fn from_config(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open(
            &config.memory_db_path(),
            config.memory.pool_size,
            config.memory.search_limit,
            embedder,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_limit(&self) -> i64 {
        self.default_limit
    }

    /// Create the memory table, its index and metadata if absent.
    ///
    /// Idempotent. The first successful call per handle runs the migrations;
    /// later calls return immediately. Concurrent first calls wait on the same
    /// initialization.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                self.with_conn(|conn| schema::run_migrations(conn)).await?;
                debug!(db = %self.path.display(), "memory schema ready");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Embed `content` and persist it as a new record for `username`.
    ///
    /// Returns the store-assigned record id. Nothing is written unless both
    /// the embedding and the insert succeed.
    pub async fn append(&self, username: &str, role: Role, content: &str) -> Result<i64> {
        require_username(username)?;
        if content.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "memory content must not be empty".to_string(),
            ));
        }

        self.ensure_schema().await?;

        let embedding = self
            .embedder
            .embed(content)
            .await
            .map_err(|e| Error::EmbeddingFailed(Box::new(e)))?;

        let owner = username.to_string();
        let text = content.to_string();
        let id = self
            .with_conn(move |conn| insert_record(conn, &owner, role, &text, &embedding))
            .await?;

        debug!(username, %role, record_id = id, "memory appended");
        Ok(id)
    }

    /// Return up to `limit` of `username`'s memories closest to `query`.
    pub async fn search(&self, username: &str, query: &str, limit: i64) -> Result<Vec<MemoryHit>> {
        if limit <= 0 {
            return Err(Error::InvalidArgument(format!(
                "search limit must be positive, got {limit}"
            )));
        }
        require_username(username)?;
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }

        self.ensure_schema().await?;

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| Error::EmbeddingFailed(Box::new(e)))?;

        let records = self.list(username).await?;
        let candidates = records.len();
        let (hits, skipped) = rank(&query_vector, records, limit as usize);

        if !skipped.is_empty() {
            warn!(
                username,
                skipped = skipped.len(),
                query_dimensions = query_vector.len(),
                "ignored memories whose embedding dimension differs from the query"
            );
        }

        debug!(username, limit, candidates, hits = hits.len(), "memory search");
        Ok(hits)
    }

    /// [`MemoryStore::search`] with the configured default limit.
    pub async fn search_default(&self, username: &str, query: &str) -> Result<Vec<MemoryHit>> {
        self.search(username, query, self.default_limit).await
    }

    /// All of `username`'s records in insertion order.
    pub async fn list(&self, username: &str) -> Result<Vec<MemoryRecord>> {
        self.ensure_schema().await?;
        let owner = username.to_string();
        self.with_conn(move |conn| load_records(conn, &owner)).await
    }

    /// Number of records held for `username`.
    pub async fn count(&self, username: &str) -> Result<u64> {
        self.ensure_schema().await?;
        let owner = username.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM user_memories WHERE username = ?1",
                [&owner],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.ensure_schema().await?;
        self.with_conn(|conn| {
            let (records, users): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT username) FROM user_memories",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(StoreStats {
                records: records as u64,
                users: users as u64,
                dimensions: schema::pinned_dimensions(conn)?,
            })
        })
        .await
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await?
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn require_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::InvalidArgument("username must not be empty".to_string()));
    }
    Ok(())
}

fn insert_record(
    conn: &mut Connection,
    username: &str,
    role: Role,
    content: &str,
    embedding: &[f32],
) -> Result<i64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    schema::check_embedding_dimensions(&tx, embedding.len())?;
    tx.execute(
        "INSERT INTO user_memories (username, role, content, embedding, dimensions)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            username,
            role.as_str(),
            content,
            encode_embedding(embedding),
            embedding.len() as i64
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(id)
}

fn load_records(conn: &Connection, username: &str) -> Result<Vec<MemoryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, embedding, ts
         FROM user_memories
         WHERE username = ?1
         ORDER BY id",
    )?;

    let rows = stmt
        .query_map([username], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, role, content, blob, ts)| {
            Ok(MemoryRecord {
                id,
                username: username.to_string(),
                role: role.parse().map_err(Error::persistence)?,
                content,
                embedding: decode_embedding(&blob)?,
                timestamp: parse_timestamp(&ts)?,
            })
        })
        .collect()
}

/// Serialize a vector as consecutive little-endian `f32`s.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::persistence(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::persistence(format!("invalid stored timestamp '{ts}': {e}")))
}
