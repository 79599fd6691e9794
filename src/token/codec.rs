use crate::error::TokenError;
use async_trait::async_trait;

/// Encodes a token payload from one form to another
///
/// Typically plaintext to ciphertext, or a secret to a reference.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, payload: &str) -> Result<String, TokenError>;
}

/// Decodes a token payload back into its usable form
///
/// Typically ciphertext to plaintext, or a reference to the secret it names.
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, payload: &str) -> Result<String, TokenError>;
}
