//! Transient output of the code generator.

use serde::{Deserialize, Serialize};

/// Normalized code increment plus provenance, handed from the generator to
/// the renderer. Persisted only as part of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub code: String,
    /// Model name reported by the provider.
    pub model: String,
    /// SHA-256 of the system and user prompt that produced `code`.
    pub prompt_hash: String,
}
