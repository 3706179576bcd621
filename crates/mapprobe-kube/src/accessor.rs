//! [`ResourceAccessor`] over any resource reachable through the dynamic API.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::Client;
use mapprobe_core::{BoxError, ResourceAccessor};

use crate::conditions;
use crate::error::{KubeError, Result};

/// Build an [`ApiResource`] from `group/version` (or a core `version`),
/// kind and plural.
pub fn api_resource(api_version: &str, kind: &str, plural: &str) -> Result<ApiResource> {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) if !group.is_empty() && !version.is_empty() => (group, version),
        None if !api_version.is_empty() => ("", api_version),
        _ => return Err(KubeError::InvalidApiVersion(api_version.to_string())),
    };
    Ok(ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    })
}

/// Reads objects by name and judges them by their `Ready` condition.
#[derive(Clone)]
pub struct KubeAccessor {
    api: Api<DynamicObject>,
}

impl KubeAccessor {
    /// Namespaced when `namespace` is set, cluster-scoped otherwise.
    pub fn new(client: Client, resource: &ApiResource, namespace: Option<&str>) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced_with(client, ns, resource),
            None => Api::all_with(client, resource),
        };
        Self { api }
    }

    pub fn from_api(api: Api<DynamicObject>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ResourceAccessor for KubeAccessor {
    type State = DynamicObject;

    async fn get(&self, id: &str) -> std::result::Result<DynamicObject, BoxError> {
        Ok(self.api.get(id).await?)
    }

    fn is_ready(&self, state: &DynamicObject) -> bool {
        conditions::is_ready(state)
    }

    fn describe(&self, state: &DynamicObject) -> String {
        conditions::describe_readiness(state)
    }
}
