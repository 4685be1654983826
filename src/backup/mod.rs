use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory::Role;
use crate::sessions::normalize_username;

// ============================================================================
// Snapshot
// ============================================================================

/// A user's whole conversation as kept in the cold backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub username: String,
    /// Set when the snapshot is first created and never changed.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<SnapshotMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub role: Role,
    pub content: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub ts: DateTime<Utc>,
}

/// Snapshot timestamps are written as RFC 3339. Older backups carry naive
/// ISO 8601 times (`2025-06-01T10:00:00.123456`) which are read as UTC.
mod timestamp {
    use super::*;
    use serde::{Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

    pub(super) fn parse(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("invalid timestamp '{raw}'"))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl ConversationSnapshot {
    /// An empty conversation for `username`, created now.
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(SnapshotMessage {
            role,
            content: content.into(),
            ts: Utc::now(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ============================================================================
// Cold backup
// ============================================================================

/// One pretty-printed JSON file per user under a single directory.
///
/// Writes go to a temporary file in the same directory which is synced and
/// then renamed over the old snapshot, so a reader sees either the previous
/// or the new conversation, never a torn one.
#[derive(Debug, Clone)]
pub struct ColdBackup {
    dir: PathBuf,
}

impl ColdBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backup_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of `username`'s snapshot. The name must already be normalized.
    pub fn path_for(&self, username: &str) -> Result<PathBuf> {
        if normalize_username(username)? != username {
            return Err(Error::InvalidArgument(format!(
                "username '{username}' is not normalized"
            )));
        }
        Ok(self.dir.join(format!("{username}.json")))
    }

    /// Replace `username`'s snapshot with `snapshot`.
    pub async fn save(&self, username: &str, snapshot: &ConversationSnapshot) -> Result<()> {
        if snapshot.username != username {
            return Err(Error::InvalidArgument(format!(
                "snapshot belongs to '{}', not '{username}'",
                snapshot.username
            )));
        }

        let path = self.path_for(username)?;
        let body = serde_json::to_vec_pretty(snapshot).map_err(Error::persistence)?;
        let dir = self.dir.clone();
        let messages = snapshot.messages.len();

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &body)).await??;

        debug!(username, messages, "cold backup saved");
        Ok(())
    }

    /// Read `username`'s snapshot; `None` when the user has never been saved.
    pub async fn load(&self, username: &str) -> Result<Option<ConversationSnapshot>> {
        let path = self.path_for(username)?;
        let owner = username.to_string();
        tokio::task::spawn_blocking(move || read_snapshot(&path, &owner)).await?
    }

    /// Move an unreadable snapshot aside so a fresh one can take its place.
    ///
    /// The file becomes `{username}.json.corrupt-{unix_ts}-{random}`; an
    /// earlier quarantined file is never overwritten. Returns the new
    /// location, or `None` if there was nothing to move.
    pub async fn quarantine(&self, username: &str) -> Result<Option<PathBuf>> {
        let path = self.path_for(username)?;
        let dir = self.dir.clone();
        let prefix = format!("{username}.json.corrupt-{}-", Utc::now().timestamp());

        let moved =
            tokio::task::spawn_blocking(move || move_aside(&dir, &path, &prefix)).await??;

        if let Some(ref target) = moved {
            warn!(username, moved_to = %target.display(), "corrupt cold backup quarantined");
        }
        Ok(moved)
    }
}

fn write_atomically(dir: &Path, path: &Path, body: &[u8]) -> Result<()> {
    let fail = |e: std::io::Error| Error::persistence(format!("{}: {e}", path.display()));

    std::fs::create_dir_all(dir).map_err(fail)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(body).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

fn move_aside(dir: &Path, path: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let fail = |e: std::io::Error| {
        Error::persistence(format!("cannot quarantine {}: {e}", path.display()))
    };

    if !path.exists() {
        return Ok(None);
    }

    // Reserve a unique name first, then rename over the empty placeholder.
    let placeholder = tempfile::Builder::new()
        .prefix(prefix)
        .rand_bytes(6)
        .tempfile_in(dir)
        .map_err(fail)?;
    let (_, target) = placeholder.keep().map_err(|e| fail(e.error))?;

    match std::fs::rename(path, &target) {
        Ok(()) => Ok(Some(target)),
        Err(e) => {
            let _ = std::fs::remove_file(&target);
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(fail(e))
            }
        }
    }
}

fn read_snapshot(path: &Path, username: &str) -> Result<Option<ConversationSnapshot>> {
    let corrupt = |message: String| Error::CorruptBackup {
        path: path.to_path_buf(),
        message,
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(corrupt(e.to_string())),
    };

    let snapshot: ConversationSnapshot =
        serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;

    if snapshot.username != username {
        return Err(corrupt(format!(
            "file belongs to '{}', expected '{username}'",
            snapshot.username
        )));
    }

    Ok(Some(snapshot))
}
