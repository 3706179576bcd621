//! End-to-end DomainMapping check.
//!
//! Creates a DomainMapping for a Knative Service, waits for it to become
//! ready, probes the mapped host and always deletes the mapping afterwards.

use std::time::Duration;

use kube::Client;
use mapprobe_core::{
    check_span, CancellationToken, ConditionPoller, EndpointProbe, Matcher, PollSpec, ProbeConfig,
    ProbeRequest, ProbeResult, Scheme,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use crate::domain_mapping::{DomainMapping, DomainMappingClient, TargetRef, DEFAULT_API_VERSION};
use crate::error::Result;
use crate::ingress::{ingress_address, DEFAULT_INGRESS_NAMESPACE, DEFAULT_INGRESS_SERVICE};

/// Domain used for hosts that are not publicly resolvable.
pub const FALLBACK_DOMAIN: &str = "example.org";

/// Namespace and name of the ingress gateway Service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl Default for ServiceRef {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_INGRESS_NAMESPACE.to_string(),
            name: DEFAULT_INGRESS_SERVICE.to_string(),
        }
    }
}

/// Everything a DomainMapping check needs; no process-wide state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Knative Service the mapping points at.
    pub service: String,
    pub namespace: String,
    /// Publicly resolvable domain; `None` maps under `example.org` and
    /// routes the probe through the ingress.
    pub custom_domain: Option<String>,
    pub scheme: Scheme,
    /// Substring the response body must contain.
    pub expected_body: String,
    pub api_version: String,
    pub disable_http2: bool,
    pub label: String,
    pub ingress_service: ServiceRef,
    pub poll: PollSpec,
    pub probe: ProbeConfig,
}

impl CheckConfig {
    pub fn new(service: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            namespace: namespace.into(),
            custom_domain: None,
            scheme: Scheme::Ws,
            expected_body: "wsserver".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            disable_http2: true,
            label: "DomainMappingWithWebsocket".to_string(),
            ingress_service: ServiceRef::default(),
            poll: PollSpec::default(),
            probe: ProbeConfig::default(),
        }
    }

    /// Mapped host and whether it resolves on its own.
    pub fn host(&self) -> (String, bool) {
        match self.custom_domain.as_deref().filter(|d| !d.is_empty()) {
            Some(domain) => (format!("{}.{}", self.service, domain), true),
            None => (format!("{}.{}", self.service, FALLBACK_DOMAIN), false),
        }
    }

    pub fn mapping(&self) -> DomainMapping {
        let (host, _) = self.host();
        let mapping = DomainMapping::new(host, TargetRef::service(&self.service, &self.namespace));
        if self.disable_http2 {
            mapping.with_http2_disabled()
        } else {
            mapping
        }
    }
}

/// Summary of a passed check.
#[derive(Clone, Debug)]
pub struct CheckReport {
    pub host: String,
    pub ready_after: Duration,
    pub probe: ProbeResult,
}

pub struct DomainMappingCheck {
    client: Client,
    config: CheckConfig,
    cancel: CancellationToken,
}

impl DomainMappingCheck {
    pub fn new(client: Client, config: CheckConfig, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<CheckReport> {
        self.run_inner()
            .instrument(check_span(&self.config.label))
            .await
    }

    async fn run_inner(&self) -> Result<CheckReport> {
        let mapping = self.config.mapping();
        let dm_client = DomainMappingClient::new(
            self.client.clone(),
            &self.config.namespace,
            &self.config.api_version,
        )?;

        dm_client.create(&mapping).await?;
        let outcome = self.verify(&dm_client, &mapping.host).await;

        if let Err(e) = dm_client.delete(&mapping.host).await {
            warn!(host = %mapping.host, error = %e, "Failed to delete DomainMapping");
        }
        outcome
    }

    async fn verify(&self, dm_client: &DomainMappingClient, host: &str) -> Result<CheckReport> {
        let started = tokio::time::Instant::now();
        let poller = ConditionPoller::new(self.config.poll.clone(), self.cancel.clone())?;
        poller.wait_for_ready(&dm_client.accessor(), host).await?;
        let ready_after = started.elapsed();
        info!(host = %host, ready_after_ms = ready_after.as_millis() as u64, "DomainMapping is ready");

        let (_, resolvable) = self.config.host();
        let mut probe_config = self.config.probe.clone();
        if !resolvable && probe_config.ingress.is_none() {
            let ingress = &self.config.ingress_service;
            probe_config.ingress =
                Some(ingress_address(self.client.clone(), &ingress.namespace, &ingress.name).await?);
        }

        let probe = EndpointProbe::new(probe_config, self.cancel.clone())?;
        let request = ProbeRequest::new(
            self.config.scheme,
            host,
            Matcher::contains(self.config.expected_body.as_bytes()),
        )
        .with_label(&self.config.label)
        .resolvable(resolvable);
        let result = probe.probe(&request).await?;

        Ok(CheckReport {
            host: host.to_string(),
            ready_after,
            probe: result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_without_custom_domain_uses_ingress() {
        let config = CheckConfig::new("hello", "serving-tests");
        assert_eq!(config.host(), ("hello.example.org".to_string(), false));
    }

    #[test]
    fn test_host_with_custom_domain_is_resolvable() {
        let mut config = CheckConfig::new("hello", "serving-tests");
        config.custom_domain = Some("apps.example.net".to_string());
        assert_eq!(config.host(), ("hello.apps.example.net".to_string(), true));

        config.custom_domain = Some(String::new());
        assert!(!config.host().1);
    }

    #[test]
    fn test_mapping_targets_service() {
        let config = CheckConfig::new("hello", "serving-tests");
        let mapping = config.mapping();
        assert_eq!(mapping.host, "hello.example.org");
        assert_eq!(mapping.namespace, "serving-tests");
        assert_eq!(mapping.target, TargetRef::service("hello", "serving-tests"));
        assert_eq!(
            mapping.annotations.get(crate::domain_mapping::DISABLE_HTTP2_ANNOTATION),
            Some(&"true".to_string())
        );

        let mut plain = config.clone();
        plain.disable_http2 = false;
        assert!(plain.mapping().annotations.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = CheckConfig::new("hello", "ns");
        assert_eq!(config.scheme, Scheme::Ws);
        assert_eq!(config.expected_body, "wsserver");
        assert_eq!(config.ingress_service, ServiceRef::default());
        config.poll.validate().expect("poll defaults");
        config.probe.validate().expect("probe defaults");
    }
}
