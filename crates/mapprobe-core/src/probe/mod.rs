//! Endpoint probing over HTTP or WebSocket.
//!
//! A probe repeats a connect+read cycle against a logical host until the
//! response body satisfies a [`Matcher`], backing off between attempts.
//! Hosts that are not publicly resolvable are routed through a configured
//! ingress address, with the logical host presented in the request.
//!
//! Retry policy per failure class:
//!
//! | failure | retried |
//! |---|---|
//! | connection refused/reset, connect timeout | always |
//! | DNS failure of the logical host | only if `allow_dial_failure_retry` |
//! | rejected upgrade, invalid request | never |
//! | read failure or silence after connect, non-2xx status, unmatched body | always |

pub mod http;
pub mod transport;
pub mod ws;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{body_preview, Error, Result};
use crate::matcher::Matcher;
use crate::obs;
use crate::retry::RetryConfig;

pub use self::http::HttpTransport;
pub use self::transport::{FailureClass, Route, Target, Transport, TransportError};
pub use self::ws::WsTransport;

/// Wire protocol of a probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Ws,
}

/// Port dialed when a probe URL names none; both schemes are plain-text.
pub const DEFAULT_PORT: u16 = 80;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Ws => write!(f, "ws"),
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Scheme::Http),
            "ws" => Ok(Scheme::Ws),
            other => Err(Error::InvalidConfig(format!(
                "unsupported scheme {:?} (expected http or ws)",
                other
            ))),
        }
    }
}

/// What to probe and how to judge the answer.
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub matcher: Matcher,
    /// Name of the check, used in logs.
    pub label: String,
    /// `true` when `host` resolves on its own. `false` routes the probe
    /// through the configured ingress address instead of DNS.
    pub allow_dial_failure_retry: bool,
}

impl ProbeRequest {
    pub fn new(scheme: Scheme, host: impl Into<String>, matcher: Matcher) -> Self {
        let host = host.into();
        Self {
            scheme,
            label: host.clone(),
            host,
            port: None,
            path: "/".to_string(),
            matcher,
            allow_dial_failure_retry: true,
        }
    }

    /// Build a request from an `http://` or `ws://` URL.
    pub fn from_url(url: &str, matcher: Matcher) -> Result<Self> {
        let uri: ::http::Uri = url
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("invalid URL {:?}: {}", url, e)))?;
        let scheme: Scheme = uri
            .scheme_str()
            .ok_or_else(|| Error::InvalidConfig(format!("URL {:?} has no scheme", url)))?
            .parse()?;
        let host = uri
            .host()
            .ok_or_else(|| Error::InvalidConfig(format!("URL {:?} has no host", url)))?;

        let mut request = Self::new(scheme, host, matcher);
        request.port = uri.port_u16();
        if let Some(pq) = uri.path_and_query() {
            request.path = pq.as_str().to_string();
        }
        Ok(request)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Mark whether `host` is independently resolvable.
    pub fn resolvable(mut self, resolvable: bool) -> Self {
        self.allow_dial_failure_retry = resolvable;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfig("probe host must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "probe path {:?} must start with '/'",
                self.path
            )));
        }
        Ok(())
    }
}

/// Retry budget and routing for probes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub retry: RetryConfig,
    /// Overall deadline for one probe call.
    pub timeout: Duration,
    /// Deadline for a single connect+read cycle.
    pub attempt_timeout: Duration,
    /// Deadline for establishing the connection, enforced by the transports.
    /// Must be shorter than `attempt_timeout`; whatever remains bounds the
    /// wait for a response.
    pub connect_timeout: Duration,
    /// Address used for hosts that are not independently resolvable.
    pub ingress: Option<SocketAddr>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(120),
            attempt_timeout: Duration::from_secs(30),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ingress: None,
        }
    }
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.timeout.is_zero() || self.attempt_timeout.is_zero() || self.connect_timeout.is_zero()
        {
            return Err(Error::InvalidConfig(
                "probe timeouts must be > 0".to_string(),
            ));
        }
        if self.connect_timeout >= self.attempt_timeout {
            return Err(Error::InvalidConfig(format!(
                "connect timeout {:?} must be shorter than attempt timeout {:?}",
                self.connect_timeout, self.attempt_timeout
            )));
        }
        Ok(())
    }
}

/// Outcome of a successful probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub success: bool,
    pub last_body: Vec<u8>,
    /// Attempts made after the first one.
    pub retries: u32,
    pub elapsed: Duration,
}

enum Failure {
    Dial(String),
    Read(String),
    Unmatched,
}

impl Failure {
    fn reason(&self, matcher: &Matcher) -> String {
        match self {
            Failure::Dial(reason) | Failure::Read(reason) => reason.clone(),
            Failure::Unmatched => format!("expected {}", matcher.description()),
        }
    }
}

/// Verifies that an endpoint answers with a matching body.
#[derive(Clone)]
pub struct EndpointProbe {
    config: ProbeConfig,
    cancel: CancellationToken,
    http: Arc<dyn Transport>,
    ws: Arc<dyn Transport>,
}

impl EndpointProbe {
    /// Probe with the real HTTP and WebSocket transports.
    pub fn new(config: ProbeConfig, cancel: CancellationToken) -> Result<Self> {
        let http = HttpTransport::new(config.connect_timeout)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let ws = WsTransport::new(config.connect_timeout);
        Self::with_transports(config, cancel, Arc::new(http), Arc::new(ws))
    }

    pub fn with_transports(
        config: ProbeConfig,
        cancel: CancellationToken,
        http: Arc<dyn Transport>,
        ws: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel,
            http,
            ws,
        })
    }

    /// Use one transport for both schemes.
    pub fn with_transport(
        config: ProbeConfig,
        cancel: CancellationToken,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Self::with_transports(config, cancel, transport.clone(), transport)
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn target_for(&self, request: &ProbeRequest) -> Result<Target> {
        let route = if request.allow_dial_failure_retry {
            Route::Resolve
        } else {
            let addr = self.config.ingress.ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "{} is not resolvable and no ingress address is configured",
                    request.host
                ))
            })?;
            Route::Ingress(addr)
        };
        Ok(Target {
            scheme: request.scheme,
            host: request.host.clone(),
            port: request.port,
            path: request.path.clone(),
            route,
        })
    }

    /// Run the probe until the body matches, the budget runs out, or the
    /// call is cancelled.
    pub async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResult> {
        request.validate()?;
        let target = self.target_for(request)?;
        let url = target.url();
        let transport = match request.scheme {
            Scheme::Http => &self.http,
            Scheme::Ws => &self.ws,
        };

        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut backoff = self.config.retry.backoff();
        let mut attempt = 0u32;
        let mut last_body: Vec<u8> = Vec::new();
        // Set once any attempt got past the connect phase.
        let mut connected = false;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(Error::Cancelled { target: url, elapsed: start.elapsed() });
                }
                outcome = timeout(self.config.attempt_timeout, transport.fetch(&target)) => outcome,
                _ = sleep_until(deadline) => {
                    let reason = "overall probe timeout reached".to_string();
                    let failure = if connected {
                        Failure::Read(reason)
                    } else {
                        Failure::Dial(reason)
                    };
                    return Err(self.exhausted(request, &url, attempt, start, failure, &last_body));
                }
            };

            let failure = match outcome {
                Ok(Ok(body)) if request.matcher.matches(&body) => {
                    let elapsed = start.elapsed();
                    obs::emit_probe_finished(&request.label, &url, attempt, elapsed, true);
                    return Ok(ProbeResult {
                        success: true,
                        last_body: body,
                        retries: attempt - 1,
                        elapsed,
                    });
                }
                Ok(Ok(body)) => {
                    connected = true;
                    last_body = body;
                    Failure::Unmatched
                }
                Ok(Err(err)) => match err.class() {
                    FailureClass::FatalDial => {
                        return Err(self.dial_error(request, &url, attempt, start, err.to_string()));
                    }
                    FailureClass::NameResolution if !request.allow_dial_failure_retry => {
                        return Err(self.dial_error(request, &url, attempt, start, err.to_string()));
                    }
                    FailureClass::TransientDial | FailureClass::NameResolution => {
                        Failure::Dial(err.to_string())
                    }
                    FailureClass::ReadFailure => {
                        connected = true;
                        let reason = err.to_string();
                        if let TransportError::Status { body, .. } = err {
                            last_body = body;
                        }
                        Failure::Read(reason)
                    }
                },
                // Transports give up on connecting after `connect_timeout`,
                // so an attempt that outlives it is waiting on a response.
                Err(_) => {
                    connected = true;
                    Failure::Read(format!(
                        "no response within {:?}",
                        self.config.attempt_timeout
                    ))
                }
            };

            if attempt >= self.config.retry.max_attempts {
                return Err(self.exhausted(request, &url, attempt, start, failure, &last_body));
            }

            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                return Err(self.exhausted(request, &url, attempt, start, failure, &last_body));
            }

            obs::emit_probe_retry(
                &request.label,
                &url,
                attempt,
                &failure.reason(&request.matcher),
                delay,
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(Error::Cancelled { target: url, elapsed: start.elapsed() });
                }
                _ = sleep(delay) => {}
            }
        }
    }

    fn dial_error(
        &self,
        request: &ProbeRequest,
        url: &str,
        attempts: u32,
        start: Instant,
        reason: String,
    ) -> Error {
        let elapsed = start.elapsed();
        obs::emit_probe_finished(&request.label, url, attempts, elapsed, false);
        Error::Dial {
            target: url.to_string(),
            attempts,
            elapsed,
            reason,
        }
    }

    fn exhausted(
        &self,
        request: &ProbeRequest,
        url: &str,
        attempts: u32,
        start: Instant,
        failure: Failure,
        last_body: &[u8],
    ) -> Error {
        match failure {
            Failure::Dial(reason) => self.dial_error(request, url, attempts, start, reason),
            other => {
                let elapsed = start.elapsed();
                obs::emit_probe_finished(&request.label, url, attempts, elapsed, false);
                Error::EndpointUnavailable {
                    target: url.to_string(),
                    attempts,
                    elapsed,
                    last_error: other.reason(&request.matcher),
                    last_body: body_preview(last_body),
                }
            }
        }
    }
}
