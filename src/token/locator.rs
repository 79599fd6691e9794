//! Token Location
//!
//! A locator scans text and reports where each token's envelope and payload
//! sit, as byte offsets into the scanned string.

use crate::error::TokenError;
use regex::Regex;

/// Byte offsets of one token inside a subject string
///
/// `envelope_start <= payload_start <= payload_end <= envelope_end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLocation {
    pub envelope_start: usize,
    pub payload_start: usize,
    pub payload_end: usize,
    pub envelope_end: usize,
}

impl TokenLocation {
    /// Check the offset ordering and bounds against a subject of `len` bytes
    pub fn is_well_formed(&self, len: usize) -> bool {
        self.envelope_start <= self.payload_start
            && self.payload_start <= self.payload_end
            && self.payload_end <= self.envelope_end
            && self.envelope_end <= len
    }
}

/// Locates tokens within text
///
/// Implementations must return locations sorted by `envelope_start` with
/// disjoint envelopes.
pub trait TokenLocator: Send + Sync {
    fn locate_tokens(&self, text: &str) -> Result<Vec<TokenLocation>, TokenError>;
}

/// Regex-backed locator
///
/// The whole match is the envelope and the first capturing group is the
/// payload. When the payload is the envelope, wrap the entire pattern in a
/// group.
#[derive(Debug, Clone)]
pub struct RegexTokenLocator {
    re: Regex,
}

impl RegexTokenLocator {
    /// Compile `pattern` into a locator
    pub fn from_pattern(pattern: &str) -> Result<Self, TokenError> {
        let re = Regex::new(pattern)
            .map_err(|e| TokenError::Locate(format!("invalid pattern {pattern:?}: {e}")))?;
        if re.captures_len() < 2 {
            return Err(TokenError::Locate(format!(
                "pattern {pattern:?} has no capturing group for the payload"
            )));
        }
        Ok(Self { re })
    }
}

impl TokenLocator for RegexTokenLocator {
    fn locate_tokens(&self, text: &str) -> Result<Vec<TokenLocation>, TokenError> {
        let mut locations = Vec::new();
        for caps in self.re.captures_iter(text) {
            let envelope = caps
                .get(0)
                .ok_or_else(|| TokenError::Locate("match without envelope".to_string()))?;
            // A group that did not participate means the pattern allows an
            // empty payload; treat the envelope as the payload then.
            let payload = caps.get(1).unwrap_or(envelope);
            locations.push(TokenLocation {
                envelope_start: envelope.start(),
                payload_start: payload.start(),
                payload_end: payload.end(),
                envelope_end: envelope.end(),
            });
        }
        Ok(locations)
    }
}
