//! HTTP transport for chunk batches.
//!
//! The engine only needs two things from a transport: a request built from a
//! batch descriptor, and a way to execute it into the raw payload. Non-2xx
//! responses surface as [`Error::HttpStatus`] so that 401 can be told apart
//! from everything else.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use url::Url;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::types::ChunkBatch;

/// A prepared request for one batch payload
#[derive(Clone, Debug)]
pub struct ChunkRequest {
    /// Payload location
    pub url: Url,
    /// Extra headers sent with the request
    pub headers: HeaderMap,
}

/// Fetches batch payloads
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Prepare the request for `batch`
    fn build_request(&self, batch: &ChunkBatch) -> Result<ChunkRequest>;

    /// Execute `request`, returning the response body of a 2xx response
    async fn execute(&self, request: &ChunkRequest) -> Result<Bytes>;
}

/// reqwest-backed [`ChunkTransport`]
#[derive(Clone, Debug)]
pub struct HttpChunkTransport {
    client: reqwest::Client,
    auth: Option<HeaderValue>,
}

impl HttpChunkTransport {
    /// Build a transport from configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        let auth = match &config.auth_token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| Error::config("transport.auth_token", e.to_string()))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self { client, auth })
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    fn build_request(&self, batch: &ChunkBatch) -> Result<ChunkRequest> {
        let mut headers = HeaderMap::new();
        if let Some(auth) = &self.auth {
            headers.insert(AUTHORIZATION, auth.clone());
        }
        Ok(ChunkRequest {
            url: batch.url.clone(),
            headers,
        })
    }

    async fn execute(&self, request: &ChunkRequest) -> Result<Bytes> {
        let response = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: request.url.to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}
