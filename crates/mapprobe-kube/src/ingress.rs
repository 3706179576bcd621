//! Discovery of the cluster ingress address.
//!
//! Hosts that are not publicly resolvable are probed by dialing the
//! ingress gateway's LoadBalancer address directly.

use std::net::{IpAddr, SocketAddr};

use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::Client;
use tokio::net::lookup_host;
use tracing::info;

use crate::error::{KubeError, Result};

pub const DEFAULT_INGRESS_NAMESPACE: &str = "kourier-system";
pub const DEFAULT_INGRESS_SERVICE: &str = "kourier";

/// Port names tried in order before falling back to 80.
const PORT_NAMES: [&str; 2] = ["http2", "http"];
const DEFAULT_PORT: u16 = 80;

/// LoadBalancer host (IP or hostname) and plain-text port of a Service.
pub fn endpoint_from_service(service: &Service) -> Option<(String, u16)> {
    let host = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .find_map(|ingress| {
            ingress
                .ip
                .clone()
                .filter(|ip| !ip.is_empty())
                .or_else(|| ingress.hostname.clone().filter(|h| !h.is_empty()))
        })?;

    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let port = PORT_NAMES
        .iter()
        .find_map(|name| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some(*name))
                .and_then(|p| u16::try_from(p.port).ok())
        })
        .unwrap_or(DEFAULT_PORT);

    Some((host, port))
}

/// Look up the ingress Service and resolve its address.
pub async fn ingress_address(client: Client, namespace: &str, name: &str) -> Result<SocketAddr> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    let service = api.get(name).await?;

    let (host, port) =
        endpoint_from_service(&service).ok_or_else(|| KubeError::NoIngressAddress {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    let addr = resolve(&host, port).await?;
    info!(
        service = %format!("{}/{}", namespace, name),
        address = %addr,
        "Resolved ingress address"
    );
    Ok(addr)
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|e| KubeError::IngressResolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| KubeError::IngressResolve {
        host: host.to_string(),
        reason: "no addresses".to_string(),
    })
}
