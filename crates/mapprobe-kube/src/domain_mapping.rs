//! Knative DomainMapping model and client.

use std::collections::BTreeMap;

use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use crate::accessor::{api_resource, KubeAccessor};
use crate::error::Result;

pub const DEFAULT_API_VERSION: &str = "serving.knative.dev/v1beta1";
pub const KIND: &str = "DomainMapping";
pub const PLURAL: &str = "domainmappings";

/// Kourier annotation forcing HTTP/1.1 towards the backend; WebSocket
/// upgrades need it.
pub const DISABLE_HTTP2_ANNOTATION: &str = "kourier.knative.dev/disable-http2";

/// Reference from a DomainMapping to the object receiving its traffic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl TargetRef {
    /// A Knative Service.
    pub fn service(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_version: "serving.knative.dev/v1".to_string(),
            kind: "Service".to_string(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// A DomainMapping to be created. Its name is the mapped host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainMapping {
    pub host: String,
    pub namespace: String,
    pub target: TargetRef,
    pub annotations: BTreeMap<String, String>,
}

impl DomainMapping {
    pub fn new(host: impl Into<String>, target: TargetRef) -> Self {
        Self {
            host: host.into(),
            namespace: target.namespace.clone(),
            target,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_http2_disabled(self) -> Self {
        self.with_annotation(DISABLE_HTTP2_ANNOTATION, "true")
    }

    /// Render as a dynamic object of the given resource type.
    pub fn to_object(&self, resource: &ApiResource) -> DynamicObject {
        let mut obj = DynamicObject::new(&self.host, resource)
            .within(&self.namespace)
            .data(json!({
                "spec": {
                    "ref": {
                        "apiVersion": self.target.api_version,
                        "kind": self.target.kind,
                        "name": self.target.name,
                        "namespace": self.target.namespace,
                    }
                }
            }));
        if !self.annotations.is_empty() {
            obj.metadata.annotations = Some(self.annotations.clone());
        }
        obj
    }
}

/// Create, read and delete DomainMappings in one namespace.
#[derive(Clone)]
pub struct DomainMappingClient {
    api: Api<DynamicObject>,
    resource: ApiResource,
}

impl DomainMappingClient {
    pub fn new(client: Client, namespace: &str, api_version: &str) -> Result<Self> {
        let resource = api_resource(api_version, KIND, PLURAL)?;
        let api = Api::namespaced_with(client, namespace, &resource);
        Ok(Self { api, resource })
    }

    pub fn resource(&self) -> &ApiResource {
        &self.resource
    }

    pub async fn create(&self, mapping: &DomainMapping) -> Result<DynamicObject> {
        let obj = mapping.to_object(&self.resource);
        let created = self.api.create(&PostParams::default(), &obj).await?;
        info!(
            host = %mapping.host,
            namespace = %mapping.namespace,
            target = %mapping.target.name,
            "Created DomainMapping"
        );
        Ok(created)
    }

    pub async fn get(&self, host: &str) -> Result<DynamicObject> {
        Ok(self.api.get(host).await?)
    }

    pub async fn delete(&self, host: &str) -> Result<()> {
        self.api.delete(host, &DeleteParams::default()).await?;
        debug!(host = %host, "Deleted DomainMapping");
        Ok(())
    }

    /// Readiness accessor over the same API handle.
    pub fn accessor(&self) -> KubeAccessor {
        KubeAccessor::from_api(self.api.clone())
    }
}
