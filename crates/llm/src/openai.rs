//! OpenAI-compatible chat-completions client, used for DeepSeek.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::{parse_response, CompletionRequest, LlmProvider, ProviderError, ProviderErrorKind};

const PROVIDER: &str = "deepseek";

/// Client for a `POST {base}/v1/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiCompatProvider {
    /// Create a client.
    ///
    /// * `base_url` - Host with optional scheme, e.g. `api.deepseek.com`.
    ///   `https://` is assumed when no scheme is given.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        Ok(Self {
            client,
            endpoint: chat_completions_url(base_url),
            api_key,
            model,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `{base}/v1/chat/completions`, with a scheme and without duplicate slashes.
pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("https://{base}")
    };
    let base = base.strip_suffix("/v1").unwrap_or(&base);
    format!("{base}/v1/chat/completions")
}

fn first_content(response: ChatResponse) -> Result<String, ProviderError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::new(
            PROVIDER,
            ProviderErrorKind::EmptyResponse,
            "response contained no message content",
        ));
    }
    Ok(content)
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
        };

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "Sending chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let parsed: ChatResponse = parse_response(PROVIDER, response).await?;
        first_content(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_gets_scheme_and_path() {
        assert_eq!(
            chat_completions_url("api.deepseek.com"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://api.deepseek.com/"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://localhost:8080/v1"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn first_content_requires_text() {
        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert_eq!(first_content(empty).unwrap_err().kind, ProviderErrorKind::EmptyResponse);

        let null: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(first_content(null).is_err());

        let ok: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "hi"}}]}"#).unwrap();
        assert_eq!(first_content(ok).unwrap(), "hi");
    }
}
