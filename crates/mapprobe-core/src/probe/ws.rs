//! WebSocket transport: upgrade, then take the first data message as the body.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{client_async, WebSocketStream};
use tracing::debug;

use super::transport::{Route, Target, Transport, TransportError};
use super::DEFAULT_CONNECT_TIMEOUT;

/// Dials TCP itself so the upgrade request can name the logical host while
/// the socket points at an ingress address.
pub struct WsTransport {
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsTransport {
    /// `connect_timeout` applies to each TCP connect; the upgrade and the
    /// first message are bounded by the caller.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn dial(&self, target: &Target) -> Result<TcpStream, TransportError> {
        let addrs: Vec<SocketAddr> = match target.route {
            Route::Ingress(addr) => vec![addr],
            Route::Resolve => lookup_host(target.socket_authority())
                .await
                .map_err(|e| TransportError::Resolve(format!("{}: {}", target.host, e)))?
                .collect(),
        };
        if addrs.is_empty() {
            return Err(TransportError::Resolve(format!(
                "{}: no addresses",
                target.host
            )));
        }

        let mut last_error = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => {
                    debug!(addr = %addr, error = %e, "WebSocket dial failed");
                    last_error = Some(format!("{}: {}", addr, e));
                }
                Err(_) => {
                    debug!(addr = %addr, "WebSocket dial timed out");
                    last_error = Some(format!(
                        "{}: connect timed out after {:?}",
                        addr, self.connect_timeout
                    ));
                }
            }
        }
        Err(TransportError::Connect(last_error.unwrap_or_default()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn fetch(&self, target: &Target) -> Result<Vec<u8>, TransportError> {
        let request = target
            .url()
            .into_client_request()
            .map_err(|e| TransportError::Fatal(format!("invalid WebSocket request: {}", e)))?;

        let stream = self.dial(target).await?;
        let (ws, response) = client_async(request, stream).await.map_err(classify)?;
        debug!(url = %target.url(), status = response.status().as_u16(), "WebSocket upgraded");

        first_message(ws).await
    }
}

async fn first_message<S>(mut ws: WebSocketStream<S>) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => break text.into_bytes(),
            Some(Ok(Message::Binary(data))) => break data,
            Some(Ok(Message::Close(frame))) => {
                return Err(TransportError::Read(format!(
                    "closed before first message: {:?}",
                    frame
                )))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
            None => {
                return Err(TransportError::Read(
                    "stream ended before first message".to_string(),
                ))
            }
        }
    };

    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "WebSocket close failed");
    }
    Ok(body)
}

fn classify(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let body = response.into_body().unwrap_or_default();
            // Route not programmed yet or backend still starting.
            if status.is_server_error() || status.as_u16() == 404 {
                TransportError::Status {
                    status: status.as_u16(),
                    body,
                }
            } else {
                TransportError::Fatal(format!("WebSocket upgrade rejected with {}", status))
            }
        }
        WsError::Io(e) => TransportError::Connect(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Read(err.to_string())
        }
        other => TransportError::Fatal(other.to_string()),
    }
}
