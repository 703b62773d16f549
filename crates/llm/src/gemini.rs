//! Google Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::{parse_response, CompletionRequest, LlmProvider, ProviderError, ProviderErrorKind};

const PROVIDER: &str = "gemini";

/// Public Gemini API host.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Client for `POST {base}/v1beta/models/{model}:generateContent`.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
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
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Text of the first candidate, parts joined by newlines.
fn candidate_text(response: GenerateResponse) -> Result<String, ProviderError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();
    let text = parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::new(
            PROVIDER,
            ProviderErrorKind::EmptyResponse,
            "response contained no candidate text",
        ));
    }
    Ok(text.to_string())
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        // The system prompt leads the single user turn.
        let text = format!("{}\n{}", request.system_prompt, request.user_prompt);
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: &text }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
        };

        let endpoint = self.endpoint();
        tracing::debug!(endpoint = %endpoint, model = %self.model, "Sending generateContent");

        let response = self
            .client
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let parsed: GenerateResponse = parse_response(PROVIDER, response).await?;
        candidate_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_parts_of_first_candidate() {
        let resp: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [
                {"content": {"parts": [{"text": "a"}, {"text": "b"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(candidate_text(resp).unwrap(), "a\nb");
    }

    #[test]
    fn no_candidates_is_empty_response() {
        let resp: GenerateResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(candidate_text(resp).unwrap_err().kind, ProviderErrorKind::EmptyResponse);
    }

    #[test]
    fn request_uses_camel_case_generation_config() {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: "x" }],
            }],
            generation_config: GenerationConfig { temperature: 0.2 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("generationConfig").is_some());
        assert_eq!(json["contents"][0]["parts"][0]["text"], "x");
    }
}
