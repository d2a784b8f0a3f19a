//! ResourceStore backed by the Kubernetes API server

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::crd::{GreetingService, GreetingServiceStatus, CRD_NAME};
use crate::error::StoreError;
use crate::store::{ensure_same_controller, ObjectKey, ResourceStore};
use crate::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "greeting-operator";

/// Store talking to the API server through a shared client
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn greetings(&self, namespace: &str) -> Api<GreetingService> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Force-apply an owned object unless another controller owns it
    async fn apply_owned<K>(&self, obj: &K) -> std::result::Result<K, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Serialize,
        K::DynamicType: Default,
    {
        let namespace = namespace_of(obj)?;
        let name = obj.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        if let Some(existing) = api.get_opt(&name).await? {
            ensure_same_controller(existing.meta(), obj.meta())?;
        }

        let applied = api.patch(&name, &apply_params(), &Patch::Apply(obj)).await?;
        debug!("Applied {} {}/{}", K::kind(&K::DynamicType::default()), namespace, name);
        Ok(applied)
    }
}

/// Server-side apply taking over fields last written by other managers,
/// so hand edits such as `kubectl scale` are reverted
fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

fn namespace_of<K: Resource>(obj: &K) -> std::result::Result<String, StoreError> {
    obj.namespace()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no namespace", obj.name_any())))
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn ensure_kind_registered(&self) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        match crds.get_opt(CRD_NAME).await.map_err(StoreError::from)? {
            Some(_) => {
                info!("CustomResourceDefinition {} is registered", CRD_NAME);
                Ok(())
            }
            None => Err(Error::KindNotRegistered(format!(
                "CustomResourceDefinition {} not found; install it with `crdgen | kubectl apply -f -` before starting the operator",
                CRD_NAME
            ))),
        }
    }

    async fn get_greeting(
        &self,
        key: &ObjectKey,
    ) -> std::result::Result<Option<GreetingService>, StoreError> {
        Ok(self.greetings(&key.namespace).get_opt(&key.name).await?)
    }

    async fn apply_deployment(
        &self,
        deployment: &Deployment,
    ) -> std::result::Result<Deployment, StoreError> {
        self.apply_owned(deployment).await
    }

    async fn apply_service(&self, service: &Service) -> std::result::Result<Service, StoreError> {
        self.apply_owned(service).await
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &GreetingServiceStatus,
        resource_version: Option<&str>,
    ) -> std::result::Result<(), StoreError> {
        // resourceVersion in a merge patch acts as a precondition
        let patch = match resource_version {
            Some(rv) => serde_json::json!({
                "metadata": { "resourceVersion": rv },
                "status": status
            }),
            None => serde_json::json!({ "status": status }),
        };

        self.greetings(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}
