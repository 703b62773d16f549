//! SHA-256 digests used for generation provenance.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Digest identifying the exact prompt pair sent to a language model.
///
/// The two parts are separated by a NUL byte so that moving text between the
/// system and user prompt changes the hash.
pub fn prompt_hash(system_prompt: &str, user_prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system_prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(user_prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}
