//! Token Engine Module
//!
//! Generic machinery for finding tokens in text and transforming them:
//!
//! - [`locator`]: where tokens are
//! - [`codec`]: what a payload becomes
//! - [`wrapper`]: how the result is re-enveloped
//! - [`engine`]: applies the three to every token in a string

pub mod codec;
pub mod engine;
pub mod locator;
pub mod wrapper;

pub use codec::{Decoder, Encoder};
pub use engine::{DecodeOptions, TokenDecoder, TokenEncoder};
pub use locator::{RegexTokenLocator, TokenLocation, TokenLocator};
pub use wrapper::{StringWrapper, TokenWrapper, VaultWrapper};
