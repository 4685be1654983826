use std::path::PathBuf;

/// Errors surfaced by the memory subsystem.
///
/// Every fallible library operation returns one of these; nothing in the
/// subsystem panics the host process on bad input or a failing dependency.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external service call failed, timed out or answered with a
    /// non-success status.
    #[error("{service} service unavailable: {message}")]
    ServiceUnavailable {
        service: &'static str,
        message: String,
    },

    /// An external service answered, but not with the expected shape.
    #[error("{service} service returned a malformed response: {message}")]
    MalformedResponse {
        service: &'static str,
        message: String,
    },

    /// Computing the embedding for a memory record failed.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(#[source] Box<Error>),

    /// The durable store rejected a read or write.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// A cold backup exists but cannot be read or parsed.
    #[error("corrupt backup at {}: {message}", path.display())]
    CorruptBackup { path: PathBuf, message: String },

    /// The caller violated an operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Error::ServiceUnavailable {
            service,
            message: message.into(),
        }
    }

    pub(crate) fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Error::MalformedResponse {
            service,
            message: message.into(),
        }
    }

    pub(crate) fn persistence(message: impl std::fmt::Display) -> Self {
        Error::PersistenceFailed(message.to_string())
    }

    /// Classify a transport-level `reqwest` failure.
    ///
    /// Body decoding problems mean the service spoke, just not in the shape we
    /// expected; everything else (timeouts, refused connections, bad status)
    /// means the service could not be reached in time.
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::malformed(service, err.to_string())
        } else if err.is_timeout() {
            Error::unavailable(service, format!("request timed out: {err}"))
        } else {
            Error::unavailable(service, err.to_string())
        }
    }

    /// True for the external-service failures that a turn downgrades to a
    /// warning once the reply already exists.
    pub fn is_service_failure(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } | Error::MalformedResponse { .. } => true,
            Error::EmbeddingFailed(inner) => inner.is_service_failure(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::persistence(err)
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::persistence(format!("connection pool: {err}"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::persistence(format!("storage task aborted: {err}"))
    }
}

/// Which persistence step lagged behind a successful completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStage {
    /// Writing the user's message to the memory store.
    UserMemory,
    /// Writing the assistant's reply to the memory store.
    AssistantMemory,
    /// Rewriting the cold backup.
    ColdBackup,
}

impl std::fmt::Display for PersistenceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceStage::UserMemory => write!(f, "user memory"),
            PersistenceStage::AssistantMemory => write!(f, "assistant memory"),
            PersistenceStage::ColdBackup => write!(f, "cold backup"),
        }
    }
}

/// Non-fatal `PartialPersistence` warning: the reply was produced but one of
/// the durability steps for the turn failed.
#[derive(Debug)]
pub struct PersistenceWarning {
    pub stage: PersistenceStage,
    pub error: Error,
}

impl std::fmt::Display for PersistenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partial persistence ({}): {}", self.stage, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_failure_keeps_service_classification() {
        let err = Error::EmbeddingFailed(Box::new(Error::unavailable("embedding", "refused")));
        assert!(err.is_service_failure());
        assert!(err.to_string().contains("embedding service unavailable"));

        let err = Error::persistence("disk full");
        assert!(!err.is_service_failure());
    }

    #[test]
    fn warning_display_names_stage() {
        let warning = PersistenceWarning {
            stage: PersistenceStage::ColdBackup,
            error: Error::persistence("permission denied"),
        };
        assert_eq!(
            warning.to_string(),
            "partial persistence (cold backup): persistence failed: permission denied"
        );
    }
}
