//! Terminal failure reasons recorded on a failed job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Why a job ended in the `Failed` state. Persisted as snake_case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider call failed, timed out, or returned no usable code block.
    GenerationError,
    /// The scene raised, or the render toolchain failed.
    RenderError,
    /// The render exceeded its wall-clock limit.
    RenderTimeout,
    /// A cancelled render process could not be confirmed dead in time.
    CancelTimeout,
    /// Storage failed while the job was in flight.
    PersistenceError,
    /// The job was running when the process stopped.
    Interrupted,
}

impl FailureKind {
    pub const ALL: [FailureKind; 6] = [
        FailureKind::GenerationError,
        FailureKind::RenderError,
        FailureKind::RenderTimeout,
        FailureKind::CancelTimeout,
        FailureKind::PersistenceError,
        FailureKind::Interrupted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::GenerationError => "generation_error",
            FailureKind::RenderError => "render_error",
            FailureKind::RenderTimeout => "render_timeout",
            FailureKind::CancelTimeout => "cancel_timeout",
            FailureKind::PersistenceError => "persistence_error",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown failure kind '{s}'")))
    }
}

/// A terminal failure: kind, human-readable reason, raw diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub diagnostics: Option<String>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Option<String>) -> Self {
        self.diagnostics = diagnostics.filter(|d| !d.trim().is_empty());
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
