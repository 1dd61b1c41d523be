//! Network seam between stores and the REST endpoint
//!
//! Stores only need "GET a path" and "POST a JSON body to a path", both
//! answering parsed JSON. [`HttpTransport`] does this with reqwest; tests use
//! [`MockTransport`](crate::testing::MockTransport).

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::config::RestConfig;
use crate::error::{Error, Result};

/// Header WordPress expects the REST nonce in.
pub const NONCE_HEADER: &str = "X-WP-Nonce";

/// Performs requests for a store.
///
/// Paths are absolute API paths such as `/zukit/v1/option/?key=foo`.
/// Implementations resolve with the parsed JSON body, or fail on transport
/// and HTTP errors.
pub trait Transport: Send + Sync + 'static {
    fn get(&self, path: &str) -> BoxFuture<'static, Result<Value>>;
    fn post(&self, path: &str, body: Value) -> BoxFuture<'static, Result<Value>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get(&self, path: &str) -> BoxFuture<'static, Result<Value>> {
        (**self).get(path)
    }

    fn post(&self, path: &str, body: Value) -> BoxFuture<'static, Result<Value>> {
        (**self).post(path, body)
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a client from `config`: base URL, nonce header and timeout.
    pub fn new(config: &RestConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("rest base_url is not set".to_string()))?;
        // fail early on a malformed base
        url::Url::parse(&base_url)?;

        let mut headers = HeaderMap::new();
        if let Some(nonce) = &config.nonce {
            let value = HeaderValue::from_str(nonce)
                .map_err(|e| Error::Config(format!("invalid nonce: {e}")))?;
            headers.insert(NONCE_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("zukit-store/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self::from_reqwest(&base_url, client))
    }

    /// Wrap an existing client.
    pub fn from_reqwest(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read(path: String, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                path,
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl Transport for HttpTransport {
    fn get(&self, path: &str) -> BoxFuture<'static, Result<Value>> {
        let request = self.client.get(self.url(path));
        let path = path.to_string();
        Box::pin(async move {
            tracing::debug!(%path, "GET");
            let response = request.send().await?;
            Self::read(path, response).await
        })
    }

    fn post(&self, path: &str, body: Value) -> BoxFuture<'static, Result<Value>> {
        let request = self.client.post(self.url(path)).json(&body);
        let path = path.to_string();
        Box::pin(async move {
            tracing::debug!(%path, "POST");
            let response = request.send().await?;
            Self::read(path, response).await
        })
    }
}
