//! Workspace naming constants and validation.

use crate::error::CoreError;

/// Maximum length of a workspace name, in characters.
pub const MAX_WORKSPACE_NAME_LEN: usize = 100;

/// Maximum length of a single user prompt, in characters.
pub const MAX_PROMPT_LEN: usize = 4000;

/// Validate a workspace name: non-blank, bounded, no control characters.
pub fn validate_workspace_name(name: &str) -> Result<(), CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Workspace name must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_WORKSPACE_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Workspace name must be at most {MAX_WORKSPACE_NAME_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(CoreError::Validation(
            "Workspace name must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt must be at most {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_accepted() {
        assert!(validate_workspace_name("intro").is_ok());
        assert!(validate_workspace_name("Pythagoras proof, take 2").is_ok());
    }

    #[test]
    fn blank_or_oversized_names_rejected() {
        assert!(validate_workspace_name("").is_err());
        assert!(validate_workspace_name("   ").is_err());
        assert!(validate_workspace_name(&"a".repeat(MAX_WORKSPACE_NAME_LEN + 1)).is_err());
        assert!(validate_workspace_name("tab\there").is_err());
    }

    #[test]
    fn prompt_must_have_content() {
        assert!(validate_prompt("draw a blue circle").is_ok());
        assert!(validate_prompt(" \n ").is_err());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_LEN + 1)).is_err());
    }
}
