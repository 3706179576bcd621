//! Error types for mapprobe-kube

use thiserror::Error;

/// Errors raised while talking to the cluster or running a check.
#[derive(Error, Debug)]
pub enum KubeError {
    /// Kubernetes API call failed
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Resource body could not be (de)serialised
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API version is not of the form `group/version` or `version`
    #[error("invalid API version: {0:?}")]
    InvalidApiVersion(String),

    /// Ingress service exposes no load balancer address yet
    #[error("ingress service {namespace}/{name} has no load balancer address")]
    NoIngressAddress { namespace: String, name: String },

    /// Ingress hostname did not resolve
    #[error("could not resolve ingress host {host}: {reason}")]
    IngressResolve { host: String, reason: String },

    /// Polling or probing failed
    #[error(transparent)]
    Check(#[from] mapprobe_core::Error),
}

/// Result type for mapprobe-kube operations.
pub type Result<T> = std::result::Result<T, KubeError>;
