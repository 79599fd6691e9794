//! Vault Envelope Patterns
//!
//! Both patterns start at a word boundary, and no part of a declaration may
//! contain `#` or whitespace. A reference also ends at a word boundary. A
//! stored value runs to the next whitespace or `#`, so values ending in
//! punctuation (`abc==`, `hunter2!`) are captured whole.

/// A resolvable reference: `vault:<path>#<key>`
pub const LOOKUP_PATTERN: &str = r"\bvault:([^#\s]+#[^#\s]+)\b";

/// A value awaiting storage: `vault-secret:<path>#<key>#<value>`
pub const SECRET_PATTERN: &str = r"\bvault-secret:([^#\s]+#[^#\s]+#[^#\s]+)";

pub const LOOKUP_PREFIX: &str = "vault:";
pub const SECRET_PREFIX: &str = "vault-secret:";
