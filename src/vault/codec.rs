//! Vault Transformer
//!
//! Resolves `path#key` references against Vault and stores `path#key#value`
//! declarations into it.
//!
//! # KV engine versions
//!
//! A KV v1 secret keeps its values at the top of the data map. A KV v2 read
//! returns the values under `data` next to a `metadata` object; a secret is
//! treated as v2 only when `metadata.version` is present and `data` is an
//! object.

use crate::error::TokenError;
use crate::token::codec::{Decoder, Encoder};
use crate::vault::client::{LogicalClient, SecretData};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// KV secrets engine version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum KvVersion {
    V1,
    #[default]
    V2,
}

impl TryFrom<u8> for KvVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(KvVersion::V1),
            2 => Ok(KvVersion::V2),
            other => Err(format!("unsupported KV version {other}, expected 1 or 2")),
        }
    }
}

impl From<KvVersion> for u8 {
    fn from(version: KvVersion) -> Self {
        match version {
            KvVersion::V1 => 1,
            KvVersion::V2 => 2,
        }
    }
}

/// Whether a read response has the KV v2 layout
pub fn is_kv_v2(data: &SecretData) -> bool {
    let has_version = data
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(|metadata| metadata.get("version"))
        .is_some_and(|version| !version.is_null());
    has_version && data.get("data").is_some_and(Value::is_object)
}

/// Find `key` in a secret of either KV layout
pub fn extract_value<'a>(data: &'a SecretData, key: &str) -> Option<&'a Value> {
    if is_kv_v2(data) {
        data.get("data")
            .and_then(Value::as_object)
            .and_then(|inner| inner.get(key))
    } else {
        data.get(key)
    }
}

/// Render a secret value as text
///
/// Strings are returned as-is, integers in decimal, and anything else as JSON.
pub fn render_value(value: &Value) -> Result<String, TokenError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Merge `key = value` into an existing secret, producing the write body
///
/// v2-shaped secrets are written back as `{"data": {...}}`; an absent secret
/// is shaped by `version`.
pub fn merged_write_body(
    existing: Option<SecretData>,
    key: &str,
    value: &str,
    version: KvVersion,
) -> SecretData {
    let (mut values, v2) = match existing {
        Some(mut data) if is_kv_v2(&data) => match data.remove("data") {
            Some(Value::Object(inner)) => (inner, true),
            _ => (Map::new(), true),
        },
        Some(data) => (data, false),
        None => (Map::new(), version == KvVersion::V2),
    };
    values.insert(key.to_string(), Value::String(value.to_string()));

    if v2 {
        let mut body = Map::new();
        body.insert("data".to_string(), Value::Object(values));
        body
    } else {
        values
    }
}

fn split_declaration(payload: &str, expected: usize) -> Result<Vec<&str>, TokenError> {
    let parts: Vec<&str> = payload.split('#').collect();
    if parts.len() != expected {
        return Err(TokenError::MalformedDeclaration {
            expected,
            got: parts.len(),
        });
    }
    Ok(parts)
}

/// Vault-backed transformer
///
/// Decoding reads `path#key`; encoding writes `path#key#value` and yields
/// `path#key`.
pub struct VaultCodec<C> {
    client: C,
    kv_version: KvVersion,
}

impl<C: LogicalClient> VaultCodec<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            kv_version: KvVersion::default(),
        }
    }

    /// KV version used to shape writes to paths that hold no secret yet
    pub fn with_kv_version(mut self, kv_version: KvVersion) -> Self {
        self.kv_version = kv_version;
        self
    }
}

#[async_trait]
impl<C: LogicalClient> Decoder for VaultCodec<C> {
    async fn decode(&self, payload: &str) -> Result<String, TokenError> {
        let parts = split_declaration(payload, 2)?;
        let (path, key) = (parts[0], parts[1]);

        let not_found = || TokenError::NotFound {
            path: path.to_string(),
            key: key.to_string(),
        };

        let data = self.client.read(path).await?.ok_or_else(not_found)?;
        let value = extract_value(&data, key).ok_or_else(not_found)?;
        if value.is_null() {
            return Err(not_found());
        }
        render_value(value)
    }
}

#[async_trait]
impl<C: LogicalClient> Encoder for VaultCodec<C> {
    async fn encode(&self, payload: &str) -> Result<String, TokenError> {
        let parts = split_declaration(payload, 3)?;
        let (path, key, value) = (parts[0], parts[1], parts[2]);

        let existing = self.client.read(path).await?;
        if existing.is_none() {
            debug!(path, "creating vault secret");
        }
        let body = merged_write_body(existing, key, value, self.kv_version);
        self.client.write(path, body).await?;

        Ok(format!("{path}#{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory logical client
    #[derive(Clone, Default)]
    struct MockLogicalClient {
        secrets: Arc<Mutex<HashMap<String, SecretData>>>,
        writes: Arc<AtomicUsize>,
        unreachable: bool,
    }

    impl MockLogicalClient {
        fn with_secret(self, path: &str, data: Value) -> Self {
            if let Value::Object(map) = data {
                self.secrets.lock().unwrap().insert(path.to_string(), map);
            }
            self
        }

        fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Self::default()
            }
        }

        fn stored(&self, path: &str) -> Option<Value> {
            self.secrets
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .map(Value::Object)
        }
    }

    #[async_trait]
    impl LogicalClient for MockLogicalClient {
        async fn read(&self, path: &str) -> Result<Option<SecretData>, VaultError> {
            if self.unreachable {
                return Err(VaultError::Response("connection refused".to_string()));
            }
            Ok(self.secrets.lock().unwrap().get(path).cloned())
        }

        async fn write(&self, path: &str, data: SecretData) -> Result<(), VaultError> {
            if self.unreachable {
                return Err(VaultError::Response("connection refused".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.secrets.lock().unwrap().insert(path.to_string(), data);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_decode_kv_v2() {
        let client = MockLogicalClient::default().with_secret(
            "secret/data/db",
            json!({"metadata": {"version": 2}, "data": {"key": "v"}}),
        );
        let codec = VaultCodec::new(client);
        assert_eq!(codec.decode("secret/data/db#key").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_decode_kv_v1() {
        let client = MockLogicalClient::default().with_secret("secret/db", json!({"key": "v"}));
        let codec = VaultCodec::new(client);
        assert_eq!(codec.decode("secret/db#key").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_decode_v1_with_data_key_but_no_version() {
        let client = MockLogicalClient::default().with_secret(
            "secret/db",
            json!({"metadata": {"owner": "ops"}, "data": {"key": "inner"}, "key": "outer"}),
        );
        let codec = VaultCodec::new(client);
        assert_eq!(codec.decode("secret/db#key").await.unwrap(), "outer");
    }

    #[tokio::test]
    async fn test_decode_renders_non_strings() {
        let client = MockLogicalClient::default().with_secret(
            "secret/app",
            json!({"port": 5432, "ratio": 0.5, "enabled": true, "hosts": ["a", "b"]}),
        );
        let codec = VaultCodec::new(client);
        assert_eq!(codec.decode("secret/app#port").await.unwrap(), "5432");
        assert_eq!(codec.decode("secret/app#ratio").await.unwrap(), "0.5");
        assert_eq!(codec.decode("secret/app#enabled").await.unwrap(), "true");
        assert_eq!(codec.decode("secret/app#hosts").await.unwrap(), r#"["a","b"]"#);
    }

    #[tokio::test]
    async fn test_decode_not_found() {
        let client = MockLogicalClient::default().with_secret("secret/db", json!({"key": "v"}));
        let codec = VaultCodec::new(client);

        let err = codec.decode("secret/missing#key").await.unwrap_err();
        assert!(err.is_not_found());

        let err = codec.decode("secret/db#other").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "secret not found: secret/db#other");
    }

    #[tokio::test]
    async fn test_decode_unreachable_is_not_not_found() {
        let codec = VaultCodec::new(MockLogicalClient::unreachable());
        let err = codec.decode("secret/db#key").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, TokenError::Vault(_)));
    }

    #[tokio::test]
    async fn test_decode_rejects_wrong_part_count() {
        let codec = VaultCodec::new(MockLogicalClient::default());
        let err = codec.decode("secret/db#key#extra").await.unwrap_err();
        assert!(matches!(
            err,
            TokenError::MalformedDeclaration {
                expected: 2,
                got: 3
            }
        ));
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_encode_merges_into_v1_secret() {
        let client =
            MockLogicalClient::default().with_secret("secret/db", json!({"user": "admin"}));
        let codec = VaultCodec::new(client.clone());

        let reference = codec.encode("secret/db#password#hunter2").await.unwrap();
        assert_eq!(reference, "secret/db#password");
        assert_eq!(
            client.stored("secret/db").unwrap(),
            json!({"user": "admin", "password": "hunter2"})
        );
    }

    #[tokio::test]
    async fn test_encode_merges_into_v2_secret() {
        let client = MockLogicalClient::default().with_secret(
            "secret/data/db",
            json!({"metadata": {"version": 3}, "data": {"user": "admin"}}),
        );
        let codec = VaultCodec::new(client.clone()).with_kv_version(KvVersion::V1);

        codec.encode("secret/data/db#password#hunter2").await.unwrap();
        assert_eq!(
            client.stored("secret/data/db").unwrap(),
            json!({"data": {"user": "admin", "password": "hunter2"}})
        );
    }

    #[tokio::test]
    async fn test_encode_creates_absent_secret() {
        let client = MockLogicalClient::default();
        let codec = VaultCodec::new(client.clone());
        codec.encode("secret/data/new#key#v").await.unwrap();
        assert_eq!(
            client.stored("secret/data/new").unwrap(),
            json!({"data": {"key": "v"}})
        );

        let client = MockLogicalClient::default();
        let codec = VaultCodec::new(client.clone()).with_kv_version(KvVersion::V1);
        codec.encode("secret/new#key#v").await.unwrap();
        assert_eq!(client.stored("secret/new").unwrap(), json!({"key": "v"}));
        assert_eq!(client.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_encode_rejects_wrong_part_count() {
        let client = MockLogicalClient::default();
        let codec = VaultCodec::new(client.clone());
        let err = codec.encode("secret/db#password").await.unwrap_err();
        assert!(matches!(
            err,
            TokenError::MalformedDeclaration {
                expected: 3,
                got: 2
            }
        ));
        assert_eq!(client.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_kv_version_from_u8() {
        assert_eq!(KvVersion::try_from(1).unwrap(), KvVersion::V1);
        assert_eq!(KvVersion::try_from(2).unwrap(), KvVersion::V2);
        assert!(KvVersion::try_from(3).is_err());
    }
}
