//! mapprobe core library
//!
//! Two independent building blocks for verifying a freshly provisioned
//! route end to end:
//!
//! - [`ConditionPoller`]: wait until a remote resource reports a condition,
//!   with an interval, a deadline and cancellation.
//! - [`EndpointProbe`]: reach an endpoint over HTTP or WebSocket (directly
//!   or through an ingress address) and check the body with a [`Matcher`].

pub mod error;
pub mod matcher;
pub mod obs;
pub mod poll;
pub mod probe;
pub mod retry;
pub mod telemetry;

pub use error::{body_preview, BoxError, Error, Result};
pub use matcher::Matcher;
pub use obs::check_span;
pub use poll::{ConditionPoller, PollSpec, ResourceAccessor};
pub use probe::{
    EndpointProbe, FailureClass, HttpTransport, ProbeConfig, ProbeRequest, ProbeResult, Route,
    Scheme, Target, Transport, TransportError, WsTransport,
};
pub use retry::{Backoff, RetryConfig};
pub use telemetry::init_tracing;

pub use tokio_util::sync::CancellationToken;

/// mapprobe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
