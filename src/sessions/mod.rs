mod normalize;

pub use normalize::normalize_username;

use crate::backup::{ColdBackup, ConversationSnapshot, SnapshotMessage};
use crate::config::Config;
use crate::error::{Error, PersistenceStage, PersistenceWarning, Result};
use crate::memory::{resolve_embedding_provider, MemoryHit, MemoryStore, Role};
use crate::providers::{resolve_completion_provider, ChatMessage, CompletionProvider};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Shared services
// ============================================================================

/// Everything a session needs to run a turn. Shared by all sessions.
#[derive(Clone)]
pub struct SessionServices {
    pub completion: Arc<dyn CompletionProvider>,
    pub memory: MemoryStore,
    pub backup: ColdBackup,
    pub system_prompt: String,
}

impl SessionServices {
    /// Resolve providers and open storage from configuration, creating the
    /// memory schema if needed.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = resolve_embedding_provider(&config.embedding)?;
        let memory = MemoryStore::from_config(config, embedder)?;
        memory.ensure_schema().await?;

        Ok(Self {
            completion: resolve_completion_provider(&config.completion)?,
            memory,
            backup: ColdBackup::from_config(config),
            system_prompt: config.completion.system_prompt.clone(),
        })
    }
}

// ============================================================================
// Turn outcome
// ============================================================================

/// Result of one successful turn.
///
/// `warnings` lists the durability steps that failed after the reply was
/// produced; the reply itself is always delivered.
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub warnings: Vec<PersistenceWarning>,
}

impl TurnOutcome {
    pub fn fully_persisted(&self) -> bool {
        self.warnings.is_empty()
    }
}

// ============================================================================
// Conversation session
// ============================================================================

/// A signed-in user's conversation.
///
/// Cheap to clone; clones share the same state. Turns are serialized by an
/// async mutex, so two concurrent `send` calls for one user run one after the
/// other and each sees the other's messages.
#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    username: String,
    /// `None` once signed out.
    state: Mutex<Option<ConversationSnapshot>>,
    services: Arc<SessionServices>,
}

impl ConversationSession {
    fn new(snapshot: ConversationSnapshot, services: Arc<SessionServices>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                username: snapshot.username.clone(),
                state: Mutex::new(Some(snapshot)),
                services,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.is_some()
    }

    /// Run one conversational turn.
    ///
    /// If the completion call fails the error is returned and nothing is
    /// changed. Otherwise both messages are added to the history, embedded
    /// into the memory store and the cold backup is rewritten; failures in
    /// those steps are reported as warnings on the outcome.
    pub async fn send(&self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(Error::InvalidArgument("message must not be empty".to_string()));
        }

        let services = &self.inner.services;
        let username = self.username();

        let mut state = self.inner.state.lock().await;
        let snapshot = state.as_mut().ok_or_else(|| self.signed_out())?;

        let context = build_context(&services.system_prompt, &snapshot.messages, text);
        let reply = services.completion.complete(&context).await?;

        snapshot.push(Role::User, text);
        snapshot.push(Role::Assistant, reply.as_str());

        let mut warnings = Vec::new();

        for (stage, role, content) in [
            (PersistenceStage::UserMemory, Role::User, text),
            (PersistenceStage::AssistantMemory, Role::Assistant, reply.as_str()),
        ] {
            if let Err(error) = services.memory.append(username, role, content).await {
                warn!(username, %stage, error = %error, "memory append failed");
                warnings.push(PersistenceWarning { stage, error });
            }
        }

        if let Err(error) = services.backup.save(username, snapshot).await {
            let stage = PersistenceStage::ColdBackup;
            warn!(username, %stage, error = %error, "cold backup failed");
            warnings.push(PersistenceWarning { stage, error });
        }

        debug!(
            username,
            session = %self.inner.id,
            messages = snapshot.messages.len(),
            warnings = warnings.len(),
            "turn complete"
        );

        Ok(TurnOutcome { reply, warnings })
    }

    /// The conversation so far, oldest first.
    pub async fn history(&self) -> Result<Vec<SnapshotMessage>> {
        let state = self.inner.state.lock().await;
        state
            .as_ref()
            .map(|s| s.messages.clone())
            .ok_or_else(|| self.signed_out())
    }

    pub async fn snapshot(&self) -> Result<ConversationSnapshot> {
        let state = self.inner.state.lock().await;
        state.clone().ok_or_else(|| self.signed_out())
    }

    /// Search this user's memories. `limit` defaults to the store's setting.
    pub async fn search(&self, query: &str, limit: Option<i64>) -> Result<Vec<MemoryHit>> {
        if !self.is_active().await {
            return Err(self.signed_out());
        }
        let memory = &self.inner.services.memory;
        match limit {
            Some(limit) => memory.search(self.username(), query, limit).await,
            None => memory.search_default(self.username(), query).await,
        }
    }

    /// Drop the in-memory history. Waits for an in-flight turn to finish.
    async fn close(&self) {
        self.inner.state.lock().await.take();
    }

    fn signed_out(&self) -> Error {
        Error::InvalidArgument(format!("session for '{}' is signed out", self.username()))
    }
}

/// System prompt, prior messages, then the new user message.
fn build_context(system_prompt: &str, history: &[SnapshotMessage], text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }
    messages.extend(history.iter().map(|m| match m.role {
        Role::User => ChatMessage::user(m.content.as_str()),
        Role::Assistant => ChatMessage::assistant(m.content.as_str()),
    }));
    messages.push(ChatMessage::user(text));
    messages
}

// ============================================================================
// Session store
// ============================================================================

/// Registry of signed-in users, at most one live session per username.
pub struct SessionStore {
    sessions: DashMap<String, ConversationSession>,
    services: Arc<SessionServices>,
}

impl SessionStore {
    pub fn new(services: SessionServices) -> Self {
        Self {
            sessions: DashMap::new(),
            services: Arc::new(services),
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(SessionServices::from_config(config).await?))
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Sign `username` in, resuming the stored conversation if there is one.
    ///
    /// Signing in an already active user returns the existing session. A
    /// corrupt backup is quarantined and the user starts over.
    pub async fn sign_in(&self, username: &str) -> Result<ConversationSession> {
        let username = normalize_username(username)?;

        if let Some(existing) = self.get(&username) {
            return Ok(existing);
        }

        let backup = &self.services.backup;
        let snapshot = match backup.load(&username).await {
            Ok(Some(snapshot)) => {
                info!(username, messages = snapshot.messages.len(), "conversation resumed");
                snapshot
            }
            Ok(None) => self.start_fresh(&username).await,
            Err(err @ Error::CorruptBackup { .. }) => {
                warn!(username, error = %err, "cold backup unreadable, starting over");
                if let Err(e) = backup.quarantine(&username).await {
                    warn!(username, error = %e, "could not quarantine cold backup");
                }
                self.start_fresh(&username).await
            }
            Err(err) => return Err(err),
        };

        let session = ConversationSession::new(snapshot, self.services.clone());
        // A concurrent sign-in may have won the race.
        let session = self
            .sessions
            .entry(username)
            .or_insert(session)
            .value()
            .clone();
        Ok(session)
    }

    async fn start_fresh(&self, username: &str) -> ConversationSnapshot {
        let snapshot = ConversationSnapshot::new(username);
        if let Err(err) = self.services.backup.save(username, &snapshot).await {
            warn!(username, error = %err, "could not create cold backup");
        }
        info!(username, "new conversation");
        snapshot
    }

    /// Sign `username` out and discard its in-memory history.
    ///
    /// Returns `false` if the user was not signed in.
    pub async fn sign_out(&self, username: &str) -> Result<bool> {
        let username = normalize_username(username)?;
        match self.sessions.remove(&username) {
            Some((_, session)) => {
                session.close().await;
                info!(username, "signed out");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, username: &str) -> Option<ConversationSession> {
        self.sessions.get(username).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
