//! Envseal Library
//!
//! Finds secret tokens embedded in text and transforms them in place:
//!
//! - inline secrets sealed with AES-256-GCM (`secret:..:secret`)
//! - references to values kept in HashiCorp Vault (`vault:path#key`)
//!
//! and runs commands whose environment carries such tokens, restarting or
//! stopping them when the secrets they resolve to change.

pub mod aes;
pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod token;
pub mod tool;
pub mod vault;

pub use error::{ExecError, TokenError, VaultError};
pub use token::DecodeOptions;
pub use tool::{Tool, ToolOptions, VaultOptions};
