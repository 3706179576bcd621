//! Kubernetes adapter for mapprobe
//!
//! Wires the core poller and probe to a cluster:
//! - DomainMapping create/get/delete over the dynamic API
//! - readiness from Knative-style status conditions
//! - ingress gateway address discovery
//! - the end-to-end [`DomainMappingCheck`]

pub mod accessor;
pub mod check;
pub mod conditions;
pub mod domain_mapping;
pub mod error;
pub mod ingress;

pub use accessor::{api_resource, KubeAccessor};
pub use check::{CheckConfig, CheckReport, DomainMappingCheck, ServiceRef};
pub use conditions::{describe_readiness, is_ready, Condition};
pub use domain_mapping::{DomainMapping, DomainMappingClient, TargetRef};
pub use error::{KubeError, Result};
pub use ingress::{endpoint_from_service, ingress_address};
