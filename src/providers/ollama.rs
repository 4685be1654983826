use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct OllamaCompletionProvider {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaCompletionProvider {
    pub fn new(client: Client, base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client,
        }
    }

    /// Normalize the base URL: strip trailing `/v1` suffix since Ollama uses `/api/chat`.
    fn chat_url(&self) -> String {
        let base = trim_base_url(&self.base_url);
        let base = base.strip_suffix("/v1").unwrap_or(&base);
        format!("{}/api/chat", base)
    }
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    content: String,
}

// ============================================================================
// CompletionProvider Implementation
// ============================================================================

#[async_trait]
impl CompletionProvider for OllamaCompletionProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        if messages.is_empty() {
            return Err(Error::InvalidArgument(
                "completion requires at least one message".to_string(),
            ));
        }

        let body = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let request = self
            .client
            .post(self.chat_url())
            .header("Content-Type", "application/json")
            .json(&body);

        let text = send_for_body(COMPLETION_SERVICE, request).await?;

        let api_resp: OllamaChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::malformed(COMPLETION_SERVICE, format!("{e}: {text}")))?;

        debug!(
            model = %self.model,
            messages = messages.len(),
            eval_count = ?api_resp.eval_count,
            "ollama completion finished"
        );

        Ok(api_resp.message.content)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_url_strips_v1_suffix() {
        let provider = OllamaCompletionProvider::new(
            Client::new(),
            "http://ollama:11434/v1/".to_string(),
            "llama3:8b".to_string(),
        );
        assert_eq!(provider.chat_url(), "http://ollama:11434/api/chat");
    }

    #[test]
    fn request_is_non_streaming() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let body = OllamaChatRequest {
            model: "m",
            messages: &messages,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let provider = OllamaCompletionProvider::new(
            Client::new(),
            "http://127.0.0.1:9".to_string(),
            "m".to_string(),
        );
        let err = provider.complete(&[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
