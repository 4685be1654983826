use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a stored utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// One utterance as persisted in the memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    /// Store-assigned, strictly increasing identifier.
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub content: String,
    pub embedding: Vec<f32>,
    /// Store-assigned creation instant.
    pub timestamp: DateTime<Utc>,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Cosine distance to the query; `0.0` is identical direction.
    pub distance: f64,
}
