use super::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct OpenAiCompletionProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenAiCompletionProvider {
    pub fn new(client: Client, base_url: String, model: String, api_key: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client,
        }
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

// ============================================================================
// CompletionProvider Implementation
// ============================================================================

#[async_trait]
impl CompletionProvider for OpenAiCompletionProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        if messages.is_empty() {
            return Err(Error::InvalidArgument(
                "completion requires at least one message".to_string(),
            ));
        }

        let body = OpenAiRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let request = self
            .client
            .post(format!("{}/chat/completions", trim_base_url(&self.base_url)))
            .bearer_auth(&self.api_key)
            .json(&body);

        let text = send_for_body(COMPLETION_SERVICE, request).await?;

        let api_resp: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| Error::malformed(COMPLETION_SERVICE, format!("{e}: {text}")))?;

        api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::malformed(COMPLETION_SERVICE, "response has no message content"))
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
