//! Prompt-to-code generator.
//!
//! Builds one request from the workspace's cumulative context and the new
//! prompt, calls the provider under a timeout, and extracts the fenced code
//! block from the answer. No syntax checking happens here and nothing is
//! persisted: only a successful render commits code to the context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use manimai_core::context::CodeContext;
use manimai_core::error::CoreError;
use manimai_core::failure::{FailureKind, JobFailure};
use manimai_core::generation::GenerationResult;
use manimai_core::hashing::prompt_hash;
use manimai_core::scene::{extract_code_block, normalize_continuation, normalize_initial};
use manimai_llm::settings::DEFAULT_TEMPERATURE;
use manimai_llm::{CompletionRequest, LlmProvider, ProviderError};
use tokio_util::sync::CancellationToken;

use crate::prompt::{system_prompt, user_prompt};

/// Why generation produced no usable code.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Language model did not answer within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Response contained no fenced code block")]
    NoCodeBlock { response: String },

    #[error("Fenced code block contained no code")]
    EmptyCode { response: String },

    #[error("Workspace scene could not be composed: {0}")]
    Context(#[source] CoreError),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Raw model output, when the failure was about its content.
    pub fn diagnostics(&self) -> Option<String> {
        match self {
            GenerationError::NoCodeBlock { response } | GenerationError::EmptyCode { response } => {
                Some(response.clone())
            }
            _ => None,
        }
    }

    pub fn to_job_failure(&self) -> JobFailure {
        JobFailure::new(FailureKind::GenerationError, self.to_string())
            .with_diagnostics(self.diagnostics())
    }
}

/// Turns prompts into code increments through an [`LlmProvider`].
pub struct Generator {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
    temperature: f32,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Generator {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// The request that [`generate`](Self::generate) would send.
    pub fn build_request(
        &self,
        context: &CodeContext,
        prompt: &str,
    ) -> Result<CompletionRequest, GenerationError> {
        let current_scene = if context.is_empty() {
            String::new()
        } else {
            context.compose().map_err(GenerationError::Context)?
        };
        Ok(CompletionRequest {
            system_prompt: system_prompt(),
            user_prompt: user_prompt(prompt, &current_scene),
            temperature: self.temperature,
        })
    }

    /// Generate the next increment for `context`.
    ///
    /// The provider call is bounded by the configured timeout and abandoned
    /// as soon as `cancel` fires.
    pub async fn generate(
        &self,
        context: &CodeContext,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        let request = self.build_request(context, prompt)?;
        let hash = prompt_hash(&request.system_prompt, &request.user_prompt);
        let start = Instant::now();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.provider.complete(&request)) => {
                match result {
                    Ok(response) => response?,
                    Err(_elapsed) => return Err(GenerationError::Timeout(self.timeout)),
                }
            }
        };

        tracing::debug!(
            provider = self.provider.name(),
            model = self.provider.model(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_len = response.len(),
            "Language model answered",
        );

        let code = extract_increment(&response, context.is_empty())?;
        Ok(GenerationResult {
            code,
            model: self.provider.model().to_string(),
            prompt_hash: hash,
        })
    }
}

/// Extract and normalize the increment from a raw model response.
pub fn extract_increment(response: &str, first_turn: bool) -> Result<String, GenerationError> {
    let block = extract_code_block(response).ok_or_else(|| GenerationError::NoCodeBlock {
        response: response.to_string(),
    })?;
    let code = if first_turn {
        normalize_initial(&block)
    } else {
        normalize_continuation(&block)
    };
    if code.is_empty() {
        return Err(GenerationError::EmptyCode {
            response: response.to_string(),
        });
    }
    Ok(code)
}
