//! Inline AES Secrets
//!
//! Secrets embedded directly in text, sealed with AES-256-GCM:
//!
//! - plaintext form: `secret:<plaintext>:secret`
//! - encoded form: `secret-aes-256-gcm:<base64(nonce || ciphertext || tag)>:secret-aes-256-gcm`
//!
//! Every encode draws a fresh random nonce, so encoding the same plaintext
//! twice yields different ciphertexts.

use crate::error::TokenError;
use crate::token::{
    Decoder, Encoder, RegexTokenLocator, StringWrapper, TokenDecoder, TokenEncoder,
};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore as _;
use std::fmt;

/// Family name used in logs and errors
pub const FAMILY: &str = "aes";

/// Length of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Length of a GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Locates plaintext secrets
pub const ENCODE_PATTERN: &str = r"(?U)secret:(.+):secret";

/// Locates sealed secrets
pub const DECODE_PATTERN: &str = r"(?U)secret-aes-256-gcm:(.+):secret-aes-256-gcm";

pub const PLAINTEXT_PREFIX: &str = "secret:";
pub const PLAINTEXT_SUFFIX: &str = ":secret";
pub const SEALED_PREFIX: &str = "secret-aes-256-gcm:";
pub const SEALED_SUFFIX: &str = ":secret-aes-256-gcm";

/// Key types accepted by `keygen`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    ThirtyTwoByte,
}

impl std::str::FromStr for KeyType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "32byte" => Ok(KeyType::ThirtyTwoByte),
            other => Err(TokenError::InvalidKey(format!(
                "unsupported key type {other:?}, expected \"32byte\""
            ))),
        }
    }
}

/// A 32-byte AES-256 key
///
/// Read-only after construction, so a single key can serve concurrent
/// transformations.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey([u8; KEY_SIZE]);

impl AesKey {
    /// Generate a key from the thread-local CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Generate a key of the given type
    pub fn generate_typed(key_type: KeyType) -> Self {
        match key_type {
            KeyType::ThirtyTwoByte => Self::generate(),
        }
    }

    /// Parse base64 key material; anything but 32 decoded bytes is rejected
    pub fn from_base64(encoded: &str) -> Result<Self, TokenError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| TokenError::InvalidKey(format!("key is not valid base64: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TokenError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            TokenError::InvalidKey(format!(
                "key must be exactly {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Seal `plaintext`, returning nonce || ciphertext || tag
pub fn seal(key: &AesKey, plaintext: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| TokenError::Encryption)?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open the output of [`seal`]
pub fn open(key: &AesKey, sealed: &[u8]) -> Result<Vec<u8>, TokenError> {
    if sealed.len() < NONCE_SIZE {
        return Err(TokenError::MalformedCiphertext(sealed.len()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| TokenError::Decryption)
}

/// AES-GCM transformer over base64 text
///
/// The key is optional so the family can be assembled before a key is
/// known; any attempt to transform a token without one fails with
/// [`TokenError::MissingKey`].
#[derive(Debug, Clone, Default)]
pub struct AesCodec {
    key: Option<AesKey>,
}

impl AesCodec {
    pub fn new(key: Option<AesKey>) -> Self {
        Self { key }
    }

    fn key(&self) -> Result<&AesKey, TokenError> {
        self.key.as_ref().ok_or(TokenError::MissingKey)
    }
}

#[async_trait]
impl Encoder for AesCodec {
    async fn encode(&self, payload: &str) -> Result<String, TokenError> {
        let sealed = seal(self.key()?, payload.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }
}

#[async_trait]
impl Decoder for AesCodec {
    async fn decode(&self, payload: &str) -> Result<String, TokenError> {
        let key = self.key()?;
        let sealed = STANDARD.decode(payload)?;
        let plaintext = open(key, &sealed)?;
        String::from_utf8(plaintext).map_err(|_| TokenError::NotUtf8)
    }
}

pub type AesEncoder = TokenEncoder<RegexTokenLocator, AesCodec, StringWrapper>;
pub type AesDecoder = TokenDecoder<RegexTokenLocator, AesCodec, StringWrapper>;

/// Engine turning `secret:..:secret` into sealed envelopes
pub fn encoder(key: Option<AesKey>) -> Result<AesEncoder, TokenError> {
    Ok(TokenEncoder::new(
        FAMILY,
        RegexTokenLocator::from_pattern(ENCODE_PATTERN)?,
        AesCodec::new(key),
        StringWrapper::new(SEALED_PREFIX, SEALED_SUFFIX),
    ))
}

/// Engine opening sealed envelopes, re-wrapping as `secret:..:secret` on request
pub fn decoder(key: Option<AesKey>) -> Result<AesDecoder, TokenError> {
    Ok(TokenDecoder::new(
        FAMILY,
        RegexTokenLocator::from_pattern(DECODE_PATTERN)?,
        AesCodec::new(key),
        Some(StringWrapper::new(PLAINTEXT_PREFIX, PLAINTEXT_SUFFIX)),
    ))
}
