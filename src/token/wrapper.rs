//! Token Wrappers
//!
//! A wrapper turns a transformed payload into the text that replaces the
//! original envelope.

/// Wraps a transformed payload into a new envelope
///
/// `original_payload` and `original_envelope` are the text the token had
/// before transformation. Simple wrappers ignore them.
pub trait TokenWrapper: Send + Sync {
    fn wrap_token(&self, token: &str, original_payload: &str, original_envelope: &str) -> String;
}

/// Surrounds the token with fixed delimiters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringWrapper {
    pub before: String,
    pub after: String,
}

impl StringWrapper {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }
}

impl TokenWrapper for StringWrapper {
    fn wrap_token(&self, token: &str, _original_payload: &str, _original_envelope: &str) -> String {
        format!("{}{}{}", self.before, token, self.after)
    }
}

/// Keeps the original Vault reference in front of the transformed token
///
/// Unwrapping `vault:path#key` to `hunter2` yields
/// `vault-secret:path#key#hunter2`, which the redact direction understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultWrapper {
    pub before: String,
    pub after: String,
}

impl VaultWrapper {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }
}

impl TokenWrapper for VaultWrapper {
    fn wrap_token(&self, token: &str, original_payload: &str, _original_envelope: &str) -> String {
        format!("{}{}#{}{}", self.before, original_payload, token, self.after)
    }
}
