//! Plain HTTP transport built on reqwest.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use http::header::HOST;
use tracing::debug;

use super::transport::{Route, Target, Transport, TransportError};

/// Issues a `GET` and returns the full body of a 2xx response.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `connect_timeout` bounds the TCP connect; the response read is
    /// bounded by the caller.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mapprobe/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Fatal(format!("building HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, target: &Target) -> Result<Vec<u8>, TransportError> {
        let request = match target.route {
            Route::Resolve => self.client.get(format!("http://{}{}", target.authority(), target.path)),
            Route::Ingress(addr) => self
                .client
                .get(format!("http://{}{}", addr, target.path))
                .header(HOST, target.authority()),
        };

        let response = request.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?
            .to_vec();

        debug!(url = %target.url(), status = status.as_u16(), bytes = body.len(), "HTTP response");

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_builder() {
        return TransportError::Fatal(err.to_string());
    }
    if err.is_connect() {
        if chain_mentions(err, "dns error") {
            return TransportError::Resolve(error_chain(err));
        }
        return TransportError::Connect(error_chain(err));
    }
    if err.is_timeout() {
        return TransportError::Connect(error_chain(err));
    }
    TransportError::Read(error_chain(err))
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn chain_mentions(err: &(dyn StdError + 'static), needle: &str) -> bool {
    error_chain(err).to_ascii_lowercase().contains(needle)
}
