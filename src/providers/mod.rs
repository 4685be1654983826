mod ollama;
mod openai;

pub use ollama::OllamaCompletionProvider;
pub use openai::OpenAiCompletionProvider;

use crate::config::{CompletionConfig, ServiceProvider};
use crate::error::{Error, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Label used in errors raised by completion providers.
pub(crate) const COMPLETION_SERVICE: &str = "completion";

// ============================================================================
// Provider Types
// ============================================================================

/// Speaker of a message sent to a completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Turns an ordered conversation into a single reply.
///
/// Implementations perform exactly one non-streaming request per call and
/// never retry; the call is bounded by the client timeout.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

// ============================================================================
// Provider Resolution
// ============================================================================

/// Build the completion provider described by `config`.
pub fn resolve_completion_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    let client = http_client(COMPLETION_SERVICE, config.timeout_secs)?;
    let base_url = config.resolved_base_url();

    match config.provider {
        ServiceProvider::Ollama => Ok(Arc::new(OllamaCompletionProvider::new(
            client,
            base_url,
            config.model.clone(),
        ))),
        ServiceProvider::Openai => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                Error::InvalidArgument("no OpenAI API key configured for completions".to_string())
            })?;
            Ok(Arc::new(OpenAiCompletionProvider::new(
                client,
                base_url,
                config.model.clone(),
                api_key,
            )))
        }
    }
}

/// Build an HTTP client whose every request is bounded by `timeout_secs`.
pub(crate) fn http_client(service: &'static str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::unavailable(service, format!("cannot build HTTP client: {e}")))
}

/// Send a prepared request and return the body of a successful response.
///
/// Non-success statuses count as the service being unavailable; the caller
/// decodes the body so that shape problems surface as malformed responses.
pub(crate) async fn send_for_body(
    service: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<String> {
    let resp = request
        .send()
        .await
        .map_err(|e| Error::from_reqwest(service, e))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| Error::from_reqwest(service, e))?;

    if !status.is_success() {
        return Err(Error::unavailable(service, format!("HTTP {status}: {body}")));
    }

    Ok(body)
}

/// Strip trailing slashes so paths can be appended uniformly.
pub(crate) fn trim_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}
