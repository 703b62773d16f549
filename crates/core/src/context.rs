//! Cumulative code context of a workspace.

use serde::Serialize;

use crate::error::CoreError;
use crate::scene::compose_scene;

/// Ordered, append-only list of increments accepted into a workspace.
///
/// Only increments whose render succeeded are ever part of a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeContext {
    increments: Vec<String>,
}

impl CodeContext {
    pub fn new(increments: Vec<String>) -> Self {
        Self { increments }
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.increments.len()
    }

    pub fn increments(&self) -> &[String] {
        &self.increments
    }

    /// Ordered concatenation of every increment.
    pub fn text(&self) -> String {
        self.increments.concat()
    }

    /// The executable scene file for this context.
    pub fn compose(&self) -> Result<String, CoreError> {
        compose_scene(&self.increments)
    }

    /// A candidate context with `increment` appended. `self` is untouched.
    pub fn with_increment(&self, increment: &str) -> CodeContext {
        let mut increments = self.increments.clone();
        increments.push(increment.to_string());
        CodeContext { increments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_has_no_text() {
        let ctx = CodeContext::default();
        assert!(ctx.is_empty());
        assert_eq!(ctx.text(), "");
        assert!(ctx.compose().is_err());
    }

    #[test]
    fn text_is_ordered_concatenation() {
        let ctx = CodeContext::new(vec!["a\n".into(), "b\n".into(), "c\n".into()]);
        assert_eq!(ctx.text(), "a\nb\nc\n");
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn with_increment_leaves_original_unchanged() {
        let ctx = CodeContext::new(vec!["a\n".into()]);
        let candidate = ctx.with_increment("b\n");
        assert_eq!(ctx.len(), 1);
        assert_eq!(candidate.text(), "a\nb\n");
    }
}
