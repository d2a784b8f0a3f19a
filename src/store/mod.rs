//! Access to the object store holding GreetingServices and their owned objects
//!
//! The reconcile core talks to the cluster only through [`ResourceStore`].
//! [`KubeStore`] is the production implementation backed by a kube `Client`;
//! [`MemoryStore`] keeps objects in process and garbage-collects owned objects
//! the way the API server does, which makes controller behaviour testable
//! without a cluster.

mod kube_store;
mod memory;

pub use kube_store::{KubeStore, FIELD_MANAGER};
pub use memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::{GreetingService, GreetingServiceStatus};
use crate::error::StoreError;

/// Namespace and name identifying an object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Operations the controller needs from the object store.
///
/// Writes are declarative: `apply_*` sends the full desired body and the
/// store decides between create and update. Fields the body sets win over
/// hand edits. An object controlled by a different owner is reported as
/// [`StoreError::Conflict`] and left untouched.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Check that the GreetingService kind is registered
    async fn ensure_kind_registered(&self) -> crate::Result<()>;

    /// Fetch a GreetingService, `None` when it does not exist
    async fn get_greeting(&self, key: &ObjectKey) -> Result<Option<GreetingService>, StoreError>;

    /// Whether a GreetingService exists
    async fn greeting_exists(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        Ok(self.get_greeting(key).await?.is_some())
    }

    /// Create or update a Deployment, returning the stored object
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;

    /// Create or update a Service, returning the stored object
    async fn apply_service(&self, service: &Service) -> Result<Service, StoreError>;

    /// Replace the status subresource of a GreetingService.
    ///
    /// When `resource_version` is set the write only succeeds if the object
    /// has not changed since that version was read.
    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &GreetingServiceStatus,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// UID of the controlling owner recorded in `meta`
pub(crate) fn controller_uid(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|o| o.controller == Some(true))
        .map(|o| o.uid.as_str())
}

/// Refuse to apply `desired` over an object controlled by someone else
pub(crate) fn ensure_same_controller(
    existing: &ObjectMeta,
    desired: &ObjectMeta,
) -> Result<(), StoreError> {
    let theirs = controller_uid(existing);
    if theirs.is_some() && theirs != controller_uid(desired) {
        return Err(StoreError::Conflict(format!(
            "{} is controlled by another owner",
            existing.name.as_deref().unwrap_or_default()
        )));
    }
    Ok(())
}
