//! Provider selection and connection settings.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::gemini::{GeminiProvider, DEFAULT_GEMINI_BASE_URL};
use crate::openai::OpenAiCompatProvider;
use crate::provider::{LlmProvider, ProviderError, ProviderErrorKind};

pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Which provider backs generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    DeepSeek,
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(ProviderError::new(
                "llm",
                ProviderErrorKind::Configuration,
                format!("unknown provider '{other}', expected 'deepseek' or 'gemini'"),
            )),
        }
    }
}

/// Connection settings for every supported provider.
#[derive(Clone)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub deepseek_api_key: String,
    pub deepseek_base_url: String,
    pub deepseek_model: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub temperature: f32,
    /// HTTP timeout for a single provider request.
    pub request_timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::DeepSeek,
            deepseek_api_key: String::new(),
            deepseek_base_url: DEFAULT_DEEPSEEK_BASE_URL.to_string(),
            deepseek_model: DEFAULT_DEEPSEEK_MODEL.to_string(),
            gemini_api_key: String::new(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// API keys never reach logs.
impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &str| if key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("deepseek_api_key", &redact(&self.deepseek_api_key))
            .field("deepseek_base_url", &self.deepseek_base_url)
            .field("deepseek_model", &self.deepseek_model)
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("gemini_base_url", &self.gemini_base_url)
            .field("gemini_model", &self.gemini_model)
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Build the configured provider.
///
/// Fails with a `Configuration` error when the selected provider has no API
/// key.
pub fn build_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match settings.provider {
        ProviderKind::DeepSeek => {
            require_key("deepseek", &settings.deepseek_api_key, "DEEPSEEK_API_KEY")?;
            Ok(Arc::new(OpenAiCompatProvider::new(
                &settings.deepseek_base_url,
                settings.deepseek_api_key.clone(),
                settings.deepseek_model.clone(),
                settings.request_timeout,
            )?))
        }
        ProviderKind::Gemini => {
            require_key("gemini", &settings.gemini_api_key, "GEMINI_API_KEY")?;
            Ok(Arc::new(GeminiProvider::new(
                &settings.gemini_base_url,
                settings.gemini_api_key.clone(),
                settings.gemini_model.clone(),
                settings.request_timeout,
            )?))
        }
    }
}

fn require_key(provider: &'static str, key: &str, env_var: &str) -> Result<(), ProviderError> {
    if key.trim().is_empty() {
        return Err(ProviderError::new(
            provider,
            ProviderErrorKind::Configuration,
            format!("API key is not configured (set {env_var})"),
        ));
    }
    Ok(())
}
