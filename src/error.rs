//! Error Types
//!
//! Errors are split by layer:
//!
//! - [`TokenError`]: locating, transforming and splicing tokens
//! - [`VaultError`]: talking to the Vault logical API
//! - [`ExecError`]: launching and supervising a child process

use std::ops::Range;
use std::process::ExitStatus;
use std::time::Duration;

/// Error types for token operations
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// A token was found but the family has no key configured
    #[error("missing key")]
    MissingKey,

    /// Key material could not be parsed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Ciphertext is shorter than the nonce
    #[error("malformed ciphertext: {0} bytes is shorter than the nonce")]
    MalformedCiphertext(usize),

    /// Payload is not valid base64
    #[error("failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// AEAD tag did not authenticate
    #[error("failed to decrypt: message authentication failed")]
    Decryption,

    /// Encryption failed inside the cipher
    #[error("failed to encrypt")]
    Encryption,

    /// Decrypted bytes were not UTF-8
    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,

    /// A Vault secret declaration had the wrong number of parts
    #[error("expected secret declaration with {expected} parts, got {got}")]
    MalformedDeclaration { expected: usize, got: usize },

    /// The secret or the key inside it does not exist
    #[error("secret not found: {path}#{key}")]
    NotFound { path: String, key: String },

    /// Vault could not be reached or rejected the request
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// A value read from Vault could not be rendered as text
    #[error("failed to serialize secret value: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The locator returned offsets that cannot be spliced
    #[error("failed to locate tokens: {0}")]
    Locate(String),

    /// Encoding one token failed; the plaintext is not repeated here
    #[error("{family}: failed to encode token at bytes {}..{}: {source}", .span.start, .span.end)]
    Encode {
        family: String,
        span: Range<usize>,
        #[source]
        source: Box<TokenError>,
    },

    /// Decoding one token failed
    #[error("{family}: failed to decode payload \"{payload}\": {source}")]
    Decode {
        family: String,
        payload: String,
        #[source]
        source: Box<TokenError>,
    },
}

impl TokenError {
    /// The innermost error, with family/payload context peeled off
    pub fn root(&self) -> &TokenError {
        match self {
            TokenError::Encode { source, .. } | TokenError::Decode { source, .. } => source.root(),
            other => other,
        }
    }

    /// Configuration errors are surfaced immediately and never retried
    pub fn is_config_error(&self) -> bool {
        matches!(
            self.root(),
            TokenError::MissingKey
                | TokenError::InvalidKey(_)
                | TokenError::MalformedDeclaration { .. }
                | TokenError::Vault(VaultError::Config(_))
        )
    }

    /// True when a secret (or its key) is absent, as opposed to unreachable
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), TokenError::NotFound { .. })
    }
}

/// Error types for the Vault logical API
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Connection, TLS or timeout failure
    #[error("vault request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Vault answered with a non-success status
    #[error("vault returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Vault answered with a body we could not interpret
    #[error("unexpected vault response: {0}")]
    Response(String),

    /// Client configuration is unusable
    #[error("invalid vault configuration: {0}")]
    Config(String),
}

/// Error types for process execution and supervision
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Rendering the command's inputs failed
    #[error("failed to render command inputs: {0}")]
    Render(String),

    /// The command could not be started
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command exited unsuccessfully on its own
    #[error("error running command: {status}")]
    Exited { status: ExitStatus },

    /// Waiting on the command failed
    #[error("failed to wait for command: {0}")]
    Wait(#[from] std::io::Error),

    /// A cancelled command did not exit within the grace period
    #[error("timed out after {0:?} waiting for command to cancel")]
    CancelTimeout(Duration),

    /// A cancelled command reported a failure other than our kill
    #[error("error from cancelled command: {status}")]
    CancelledExit { status: ExitStatus },

    /// Re-evaluating the configuration failed
    #[error("failed to determine if configuration has changed: {0}")]
    Reevaluation(String),

    /// Any other runner failure
    #[error("{0}")]
    Other(String),
}
