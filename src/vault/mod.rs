//! Vault References
//!
//! Secrets kept in HashiCorp Vault and referenced from text:
//!
//! - `vault:<path>#<key>` resolves to the value stored under `key` at `path`
//! - `vault-secret:<path>#<key>#<value>` stores `value` and becomes
//!   `vault:<path>#<key>`
//!
//! Resolving with wrapping enabled yields `vault-secret:<path>#<key>#<value>`,
//! so a resolved file can be edited and stored again.

pub mod client;
pub mod codec;
pub mod patterns;

pub use client::{HttpLogicalClient, LogicalClient, SecretData};
pub use codec::{KvVersion, VaultCodec};

use crate::error::TokenError;
use crate::token::{RegexTokenLocator, StringWrapper, TokenDecoder, TokenEncoder, VaultWrapper};
use std::sync::Arc;

/// Family name used in logs and errors
pub const FAMILY: &str = "vault";

pub type VaultEncoder<C> = TokenEncoder<RegexTokenLocator, VaultCodec<Arc<C>>, StringWrapper>;
pub type VaultDecoder<C> = TokenDecoder<RegexTokenLocator, VaultCodec<Arc<C>>, VaultWrapper>;

/// Engine storing `vault-secret:` declarations and leaving `vault:` references
pub fn encoder<C: LogicalClient>(
    client: Arc<C>,
    kv_version: KvVersion,
) -> Result<VaultEncoder<C>, TokenError> {
    Ok(TokenEncoder::new(
        FAMILY,
        RegexTokenLocator::from_pattern(patterns::SECRET_PATTERN)?,
        VaultCodec::new(client).with_kv_version(kv_version),
        StringWrapper::new(patterns::LOOKUP_PREFIX, ""),
    ))
}

/// Engine resolving `vault:` references
pub fn decoder<C: LogicalClient>(
    client: Arc<C>,
    kv_version: KvVersion,
) -> Result<VaultDecoder<C>, TokenError> {
    Ok(TokenDecoder::new(
        FAMILY,
        RegexTokenLocator::from_pattern(patterns::LOOKUP_PATTERN)?,
        VaultCodec::new(client).with_kv_version(kv_version),
        Some(VaultWrapper::new(patterns::SECRET_PREFIX, "")),
    ))
}
