//! Language-model providers that turn a prompt into scene code.
//!
//! - [`LlmProvider`]: the provider capability used by the generator.
//! - [`openai::OpenAiCompatProvider`]: chat-completions API (DeepSeek).
//! - [`gemini::GeminiProvider`]: Google `generateContent` API.
//! - [`settings::LlmSettings`] and [`settings::build_provider`]: selection
//!   from configuration.

pub mod gemini;
pub mod openai;
pub mod provider;
pub mod settings;

pub use provider::{CompletionRequest, LlmProvider, ProviderError, ProviderErrorKind};
pub use settings::{build_provider, LlmSettings, ProviderKind};
