//! Tool
//!
//! Composes the token families into a single pipeline. Families run in a
//! fixed order, inline AES secrets first and Vault references second, each
//! stage working on the previous stage's output. A family that was not
//! configured is simply absent from the pipeline.

use crate::aes::{self, AesDecoder, AesEncoder, AesKey};
use crate::config::Config;
use crate::error::TokenError;
use crate::exec::Replacer;
use crate::token::DecodeOptions;
use crate::vault::{self, HttpLogicalClient, KvVersion, LogicalClient, VaultDecoder, VaultEncoder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Vault connection handed to the Vault family
pub struct VaultOptions<C> {
    pub client: Arc<C>,
    pub kv_version: KvVersion,
}

/// Which families to assemble
pub struct ToolOptions<C = HttpLogicalClient> {
    /// Enables the AES family
    pub aes_key: Option<AesKey>,

    /// Enables the Vault family
    pub vault: Option<VaultOptions<C>>,
}

impl<C> Default for ToolOptions<C> {
    fn default() -> Self {
        Self {
            aes_key: None,
            vault: None,
        }
    }
}

/// One configured token family
pub enum Family<C: LogicalClient> {
    Aes {
        encoder: AesEncoder,
        decoder: AesDecoder,
    },
    Vault {
        encoder: VaultEncoder<C>,
        decoder: VaultDecoder<C>,
    },
}

impl<C: LogicalClient> Family<C> {
    pub fn name(&self) -> &str {
        match self {
            Family::Aes { encoder, .. } => encoder.family(),
            Family::Vault { encoder, .. } => encoder.family(),
        }
    }

    async fn encode_tokens(&self, text: &str) -> Result<String, TokenError> {
        match self {
            Family::Aes { encoder, .. } => encoder.encode_tokens(text).await,
            Family::Vault { encoder, .. } => encoder.encode_tokens(text).await,
        }
    }

    async fn decode_tokens(&self, text: &str, opts: DecodeOptions) -> Result<String, TokenError> {
        match self {
            Family::Aes { decoder, .. } => decoder.decode_tokens(text, opts).await,
            Family::Vault { decoder, .. } => decoder.decode_tokens(text, opts).await,
        }
    }
}

/// Encodes and decodes every configured token family in text
pub struct Tool<C: LogicalClient = HttpLogicalClient> {
    families: Vec<Family<C>>,
}

impl<C: LogicalClient> Tool<C> {
    /// Assemble the families enabled in `options`
    pub fn new(options: ToolOptions<C>) -> Result<Self, TokenError> {
        let mut families = Vec::new();

        if let Some(key) = options.aes_key {
            families.push(Family::Aes {
                encoder: aes::encoder(Some(key.clone()))?,
                decoder: aes::decoder(Some(key))?,
            });
        }

        if let Some(VaultOptions { client, kv_version }) = options.vault {
            families.push(Family::Vault {
                encoder: vault::encoder(Arc::clone(&client), kv_version)?,
                decoder: vault::decoder(client, kv_version)?,
            });
        }

        debug!(
            families = ?families.iter().map(Family::name).collect::<Vec<_>>(),
            "assembled token pipeline"
        );
        Ok(Self { families })
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(Family::name)
    }

    /// Encode every token of every family
    ///
    /// Plaintext AES secrets are sealed, and `vault-secret:` declarations are
    /// stored in Vault and replaced by `vault:` references.
    pub async fn encode_tokens(&self, text: &str) -> Result<String, TokenError> {
        let mut text = text.to_string();
        for family in &self.families {
            text = family.encode_tokens(&text).await?;
        }
        Ok(text)
    }

    /// Decode every token of every family
    pub async fn decode_tokens(&self, text: &str, opts: DecodeOptions) -> Result<String, TokenError> {
        let mut text = text.to_string();
        for family in &self.families {
            text = family.decode_tokens(&text, opts).await?;
        }
        Ok(text)
    }
}

impl Tool<HttpLogicalClient> {
    /// Assemble families from configuration
    ///
    /// AES is enabled by `[aes] key` / `AES_KEY`, Vault by `[vault] address` /
    /// `VAULT_ADDR`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let aes_key = config.aes_key()?;

        let vault = match config.vault.address {
            Some(_) => {
                let client = HttpLogicalClient::from_config(&config.vault)
                    .context("Failed to create Vault client")?;
                Some(VaultOptions {
                    client: Arc::new(client),
                    kv_version: config.vault.kv_version,
                })
            }
            None => None,
        };

        Ok(Self::new(ToolOptions { aes_key, vault })?)
    }
}

#[async_trait]
impl<C: LogicalClient> Replacer for Tool<C> {
    async fn replace(&self, s: &str) -> Result<String, TokenError> {
        self.decode_tokens(s, DecodeOptions::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use crate::vault::SecretData;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryClient {
        secrets: Mutex<HashMap<String, SecretData>>,
        reads: AtomicUsize,
    }

    impl MemoryClient {
        fn with_secret(self, path: &str, data: serde_json::Value) -> Self {
            if let Some(map) = data.as_object() {
                self.secrets
                    .lock()
                    .unwrap()
                    .insert(path.to_string(), map.clone());
            }
            self
        }
    }

    #[async_trait]
    impl LogicalClient for MemoryClient {
        async fn read(&self, path: &str) -> Result<Option<SecretData>, VaultError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.secrets.lock().unwrap().get(path).cloned())
        }

        async fn write(&self, path: &str, data: SecretData) -> Result<(), VaultError> {
            self.secrets.lock().unwrap().insert(path.to_string(), data);
            Ok(())
        }
    }

    fn key() -> AesKey {
        AesKey::from_slice(&[42u8; aes::KEY_SIZE]).unwrap()
    }

    fn tool(aes_key: Option<AesKey>, client: Option<Arc<MemoryClient>>) -> Tool<MemoryClient> {
        Tool::new(ToolOptions {
            aes_key,
            vault: client.map(|client| VaultOptions {
                client,
                kv_version: KvVersion::V1,
            }),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_families_in_order() {
        let tool = tool(Some(key()), Some(Arc::new(MemoryClient::default())));
        assert_eq!(tool.families().collect::<Vec<_>>(), vec!["aes", "vault"]);

        let tool = tool_without_families();
        assert_eq!(tool.families().count(), 0);
    }

    fn tool_without_families() -> Tool<MemoryClient> {
        Tool::new(ToolOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_no_families_is_identity() {
        let tool = tool_without_families();
        let text = "pw=secret:hunter2:secret ref=vault:a#b";
        assert_eq!(tool.encode_tokens(text).await.unwrap(), text);
        assert_eq!(
            tool.decode_tokens(text, DecodeOptions::default()).await.unwrap(),
            text
        );
    }

    #[tokio::test]
    async fn test_round_trip_both_families() {
        let client = Arc::new(MemoryClient::default());
        let tool = tool(Some(key()), Some(Arc::clone(&client)));
        let input = "A=secret:one:secret\nB=vault-secret:secret/app#b#two\nC=plain\n";

        let encoded = tool.encode_tokens(input).await.unwrap();
        assert!(!encoded.contains("secret:one:secret"));
        assert!(encoded.contains("B=vault:secret/app#b\n"));
        assert!(encoded.ends_with("C=plain\n"));
        assert_eq!(
            client.secrets.lock().unwrap()["secret/app"],
            *json!({"b": "two"}).as_object().unwrap()
        );

        let decoded = tool
            .decode_tokens(&encoded, DecodeOptions::default())
            .await
            .unwrap();
        assert_eq!(decoded, "A=one\nB=two\nC=plain\n");

        let wrapped = tool
            .decode_tokens(&encoded, DecodeOptions::wrapped())
            .await
            .unwrap();
        assert_eq!(wrapped, input);
    }

    #[tokio::test]
    async fn test_missing_aes_key_skips_family() {
        let client = Arc::new(MemoryClient::default().with_secret("secret/db", json!({"pw": "x"})));
        let tool = tool(None, Some(client));

        let text = "sealed=secret-aes-256-gcm:AAAA:secret-aes-256-gcm pw=vault:secret/db#pw";
        let decoded = tool
            .decode_tokens(text, DecodeOptions::default())
            .await
            .unwrap();
        assert_eq!(
            decoded,
            "sealed=secret-aes-256-gcm:AAAA:secret-aes-256-gcm pw=x"
        );
    }

    #[tokio::test]
    async fn test_missing_vault_skips_family() {
        let tool = tool(Some(key()), None);
        let encoded = tool.encode_tokens("a=secret:x:secret b=vault:p#k").await.unwrap();
        let decoded = tool
            .decode_tokens(&encoded, DecodeOptions::default())
            .await
            .unwrap();
        assert_eq!(decoded, "a=x b=vault:p#k");
    }

    #[tokio::test]
    async fn test_aes_output_feeds_vault_stage() {
        // a sealed value that decrypts into a vault reference is resolved too
        let client = Arc::new(MemoryClient::default().with_secret("kv/db", json!({"pw": "deep"})));
        let tool = tool(Some(key()), Some(client));
        let encoded = tool
            .encode_tokens("x=secret:vault:kv/db#pw:secret")
            .await
            .unwrap();
        assert!(!encoded.contains("vault:"));

        let decoded = tool
            .decode_tokens(&encoded, DecodeOptions::default())
            .await
            .unwrap();
        assert_eq!(decoded, "x=deep");
    }

    #[tokio::test]
    async fn test_failure_aborts_pipeline() {
        let client = Arc::new(MemoryClient::default());
        let tool = tool(Some(key()), Some(Arc::clone(&client)));
        let err = tool
            .decode_tokens("missing=vault:secret/none#k", DecodeOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replacer_decodes() {
        let client = Arc::new(MemoryClient::default().with_secret("secret/db", json!({"pw": 1234})));
        let tool = tool(None, Some(client));
        assert_eq!(
            tool.replace("DB_PW=vault:secret/db#pw").await.unwrap(),
            "DB_PW=1234"
        );
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        let tool = Tool::from_config(&config).unwrap();
        assert_eq!(tool.families().count(), 0);

        config.aes.key = Some(key().to_base64());
        config.vault.address = Some("http://127.0.0.1:8200".to_string());
        let tool = Tool::from_config(&config).unwrap();
        assert_eq!(tool.families().collect::<Vec<_>>(), vec!["aes", "vault"]);

        config.aes.key = Some("bm90IDMyIGJ5dGVz".to_string());
        assert!(Tool::from_config(&config).is_err());
    }
}
