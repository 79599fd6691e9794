//! Vault Logical Client
//!
//! Minimal access to Vault's logical API: read the data map stored at a path
//! and write a data map back. Interpreting KV engine layouts is left to
//! [`VaultCodec`](super::codec::VaultCodec).

use crate::config::VaultConfig;
use crate::error::VaultError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Data stored at a Vault path
pub type SecretData = Map<String, Value>;

/// Read/write access to Vault's logical API
#[async_trait]
pub trait LogicalClient: Send + Sync {
    /// Read the `data` object at `path`, or `None` when nothing is stored there
    async fn read(&self, path: &str) -> Result<Option<SecretData>, VaultError>;

    /// Replace the data at `path`
    async fn write(&self, path: &str, data: SecretData) -> Result<(), VaultError>;
}

#[async_trait]
impl<C: LogicalClient + ?Sized> LogicalClient for Arc<C> {
    async fn read(&self, path: &str) -> Result<Option<SecretData>, VaultError> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<(), VaultError> {
        (**self).write(path, data).await
    }
}

/// Logical client over Vault's HTTP API
///
/// Requests go to `{address}/v1/{path}` carrying `X-Vault-Token` and, when
/// set, `X-Vault-Namespace`.
pub struct HttpLogicalClient {
    /// Reqwest HTTP client
    client: reqwest::Client,

    /// Vault server address, without a trailing slash
    address: String,

    token: Option<String>,

    namespace: Option<String>,
}

impl std::fmt::Debug for HttpLogicalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLogicalClient")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl HttpLogicalClient {
    /// Create a client for the Vault server at `address`
    ///
    /// # Arguments
    ///
    /// * `address` - Base URL, e.g. `https://vault.example.com:8200`
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Config`] if the address is not an http(s) URL.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, VaultError> {
        let address = address.trim().trim_end_matches('/');
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(VaultError::Config(format!(
                "vault address must start with http:// or https://, got {address:?}"
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            address: address.to_string(),
            token: None,
            namespace: None,
        })
    }

    /// Build a client from the `[vault]` configuration section
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Config`] if no address is configured.
    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        let address = config
            .address
            .as_deref()
            .ok_or_else(|| VaultError::Config("no vault address configured".to_string()))?;

        let mut client = Self::new(address, Duration::from_secs(config.timeout_secs))?;
        if let Some(token) = &config.token {
            client = client.with_token(token.clone());
        }
        if let Some(namespace) = &config.namespace {
            client = client.with_namespace(namespace.clone());
        }
        Ok(client)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if let Some(token) = &self.token {
            builder = builder.header("X-Vault-Token", token);
        }
        if let Some(namespace) = &self.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        builder
    }
}

#[async_trait]
impl LogicalClient for HttpLogicalClient {
    async fn read(&self, path: &str) -> Result<Option<SecretData>, VaultError> {
        debug!(path, "reading vault secret");
        let response = self.request(reqwest::Method::GET, path).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| VaultError::Response(format!("invalid JSON from {path}: {e}")))?;
        parse_read_response(body)
    }

    async fn write(&self, path: &str, data: SecretData) -> Result<(), VaultError> {
        debug!(path, keys = data.len(), "writing vault secret");
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&data)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Pull the `data` object out of a logical read response
fn parse_read_response(body: Value) -> Result<Option<SecretData>, VaultError> {
    match body {
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Object(data)) => Ok(Some(data)),
            Some(Value::Null) | None => Ok(None),
            Some(other) => Err(VaultError::Response(format!(
                "expected \"data\" to be an object, got {other}"
            ))),
        },
        other => Err(VaultError::Response(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}
