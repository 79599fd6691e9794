//! Token Engine
//!
//! Orchestrates locator → transformer → wrapper across every token in one
//! piece of text.
//!
//! # Splicing
//!
//! Locations are processed from last to first. Replacing a token changes the
//! length of the string, but only at or after that token's offset, so the
//! offsets of tokens not yet processed stay valid. A failure on any token
//! aborts the call and the partially spliced string is discarded.

use crate::error::TokenError;
use crate::token::codec::{Decoder, Encoder};
use crate::token::locator::{TokenLocation, TokenLocator};
use crate::token::wrapper::TokenWrapper;
use tracing::debug;

/// Options for a decode call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Re-wrap decoded values in the plaintext envelope instead of inserting
    /// them bare
    ///
    /// Decoding `secret-aes-256-gcm:zzz:secret-aes-256-gcm` normally yields
    /// `hunter2`; with this set it yields `secret:hunter2:secret`, which can be
    /// edited and encoded again.
    pub wrap_tokens: bool,
}

impl DecodeOptions {
    pub fn wrapped() -> Self {
        Self { wrap_tokens: true }
    }
}

/// Finds plaintext tokens within text and encodes them
pub struct TokenEncoder<L, E, W> {
    family: String,
    locator: L,
    encoder: E,
    wrapper: W,
}

impl<L, E, W> TokenEncoder<L, E, W>
where
    L: TokenLocator,
    E: Encoder,
    W: TokenWrapper,
{
    pub fn new(family: impl Into<String>, locator: L, encoder: E, wrapper: W) -> Self {
        Self {
            family: family.into(),
            locator,
            encoder,
            wrapper,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Encode every token in `text`
    pub async fn encode_tokens(&self, text: &str) -> Result<String, TokenError> {
        let locations = self.locator.locate_tokens(text)?;
        if locations.is_empty() {
            return Ok(text.to_string());
        }
        check_locations(text, &locations)?;
        debug!(family = %self.family, tokens = locations.len(), "encoding tokens");

        let mut out = text.to_string();
        for location in locations.iter().rev() {
            let payload = &text[location.payload_start..location.payload_end];
            let envelope = &text[location.envelope_start..location.envelope_end];

            let encoded =
                self.encoder
                    .encode(payload)
                    .await
                    .map_err(|e| TokenError::Encode {
                        family: self.family.clone(),
                        span: location.envelope_start..location.envelope_end,
                        source: Box::new(e),
                    })?;

            let wrapped = self.wrapper.wrap_token(&encoded, payload, envelope);
            out.replace_range(location.envelope_start..location.envelope_end, &wrapped);
        }

        Ok(out)
    }
}

/// Finds encoded tokens within text and decodes them
pub struct TokenDecoder<L, D, W> {
    family: String,
    locator: L,
    decoder: D,
    wrapper: Option<W>,
}

impl<L, D, W> TokenDecoder<L, D, W>
where
    L: TokenLocator,
    D: Decoder,
    W: TokenWrapper,
{
    /// `wrapper` is only used when [`DecodeOptions::wrap_tokens`] is set
    pub fn new(family: impl Into<String>, locator: L, decoder: D, wrapper: Option<W>) -> Self {
        Self {
            family: family.into(),
            locator,
            decoder,
            wrapper,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Decode every token in `text`
    pub async fn decode_tokens(
        &self,
        text: &str,
        opts: DecodeOptions,
    ) -> Result<String, TokenError> {
        let locations = self.locator.locate_tokens(text)?;
        if locations.is_empty() {
            return Ok(text.to_string());
        }
        check_locations(text, &locations)?;
        debug!(family = %self.family, tokens = locations.len(), wrap = opts.wrap_tokens, "decoding tokens");

        let mut out = text.to_string();
        for location in locations.iter().rev() {
            let payload = &text[location.payload_start..location.payload_end];
            let envelope = &text[location.envelope_start..location.envelope_end];

            let decoded =
                self.decoder
                    .decode(payload)
                    .await
                    .map_err(|e| TokenError::Decode {
                        family: self.family.clone(),
                        payload: payload.to_string(),
                        source: Box::new(e),
                    })?;

            let insert = match (&self.wrapper, opts.wrap_tokens) {
                (Some(wrapper), true) => wrapper.wrap_token(&decoded, payload, envelope),
                _ => decoded,
            };
            out.replace_range(location.envelope_start..location.envelope_end, &insert);
        }

        Ok(out)
    }
}

/// Reject locations that would panic or corrupt the text when spliced
fn check_locations(text: &str, locations: &[TokenLocation]) -> Result<(), TokenError> {
    let mut previous_end = 0;
    for location in locations {
        if !location.is_well_formed(text.len()) {
            return Err(TokenError::Locate(format!(
                "location {location:?} is out of order or out of bounds for {} bytes",
                text.len()
            )));
        }
        if location.envelope_start < previous_end {
            return Err(TokenError::Locate(format!(
                "location {location:?} overlaps the previous token"
            )));
        }
        let boundaries = [
            location.envelope_start,
            location.payload_start,
            location.payload_end,
            location.envelope_end,
        ];
        if boundaries.iter().any(|&i| !text.is_char_boundary(i)) {
            return Err(TokenError::Locate(format!(
                "location {location:?} splits a UTF-8 character"
            )));
        }
        previous_end = location.envelope_end;
    }
    Ok(())
}
