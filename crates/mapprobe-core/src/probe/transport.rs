//! Transport seam between the probe loop and the wire.

use std::net::SocketAddr;

use async_trait::async_trait;

use super::{Scheme, DEFAULT_PORT};

/// How a connection reaches the logical host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Resolve the logical host through DNS.
    Resolve,
    /// Dial a known ingress address and present the logical host in the request.
    Ingress(SocketAddr),
}

/// Everything a transport needs for one connect+read cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub route: Route,
}

impl Target {
    /// `host[:port]` as sent in the `Host` header.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `host:port` with the scheme's default port filled in, for dialing.
    pub fn socket_authority(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(DEFAULT_PORT))
    }

    /// Logical URL, independent of the route.
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority(), self.path)
    }
}

/// Transport failures, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, reset or timed out. Retried.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The logical host did not resolve. Retried only for resolvable hosts.
    #[error("name resolution failed: {0}")]
    Resolve(String),

    /// The request can never succeed as issued (bad URI, rejected upgrade).
    #[error("{0}")]
    Fatal(String),

    /// Connected, but the response could not be read. Retried.
    #[error("read failed: {0}")]
    Read(String),

    /// Connected, but the server answered with a non-success status. Retried.
    #[error("unexpected status {status}")]
    Status { status: u16, body: Vec<u8> },
}

/// Failure classes driving the retry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    TransientDial,
    NameResolution,
    FatalDial,
    ReadFailure,
}

impl TransportError {
    pub fn class(&self) -> FailureClass {
        match self {
            TransportError::Connect(_) => FailureClass::TransientDial,
            TransportError::Resolve(_) => FailureClass::NameResolution,
            TransportError::Fatal(_) => FailureClass::FatalDial,
            TransportError::Read(_) | TransportError::Status { .. } => FailureClass::ReadFailure,
        }
    }
}

/// One connect+read cycle against a target, returning the response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, target: &Target) -> Result<Vec<u8>, TransportError>;
}
