//! Transport to the external service: POST a JSON body, get the response bytes.
//!
//! The core treats this as an injected capability. No retry happens here.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("external service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` (already-encoded JSON) to `url` and return the 2xx response body.
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// reqwest-backed transport.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let res = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.bytes().await?.to_vec())
    }
}
