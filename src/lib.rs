//! Cintessa: persistent, semantically searchable memory for a chat agent.
//!
//! Every utterance of a conversation is embedded and stored per user in a
//! SQLite-backed [`memory::MemoryStore`], and the whole conversation is
//! mirrored to a per-user JSON [`backup::ColdBackup`]. A
//! [`sessions::ConversationSession`] ties both to a completion service.

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod providers;
pub mod sessions;

pub use error::{Error, PersistenceStage, PersistenceWarning, Result};
