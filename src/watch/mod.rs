//! Change events and their translation into reconcile requests

mod kube_source;

pub use kube_source::kube_events;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

use crate::crd::{GreetingService, KIND};
use crate::store::{ObjectKey, ResourceStore};

/// Kinds the controller watches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    GreetingService,
    Deployment,
    Service,
}

/// Whether the object was created/updated or removed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Applied,
    Deleted,
}

/// Back-reference from an owned object to its controlling owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerLink {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// A change notification from the watch source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub owner: Option<OwnerLink>,
    pub change: ChangeType,
}

/// Objects the controller knows how to turn into events
pub trait Watched: Resource {
    const WATCH_KIND: ResourceKind;
}

impl Watched for GreetingService {
    const WATCH_KIND: ResourceKind = ResourceKind::GreetingService;
}

impl Watched for Deployment {
    const WATCH_KIND: ResourceKind = ResourceKind::Deployment;
}

impl Watched for Service {
    const WATCH_KIND: ResourceKind = ResourceKind::Service;
}

impl ChangeEvent {
    /// Build an event for an object, capturing its controller owner
    pub fn for_object<K: Watched>(obj: &K, change: ChangeType) -> Self {
        let owner = obj
            .owner_references()
            .iter()
            .find(|o| o.controller == Some(true))
            .map(|o| OwnerLink {
                kind: o.kind.clone(),
                name: o.name.clone(),
                uid: o.uid.clone(),
            });

        Self {
            kind: K::WATCH_KIND,
            key: ObjectKey::from_resource(obj),
            owner,
            change,
        }
    }
}

/// Key of the GreetingService an event concerns, without checking that it
/// still exists
pub fn owner_key(event: &ChangeEvent) -> Option<ObjectKey> {
    match event.kind {
        ResourceKind::GreetingService => Some(event.key.clone()),
        ResourceKind::Deployment | ResourceKind::Service => event
            .owner
            .as_ref()
            .filter(|o| o.kind == KIND)
            .map(|o| ObjectKey::new(event.key.namespace.clone(), o.name.clone())),
    }
}

/// Map an event to the key of the GreetingService that must be reconciled.
///
/// Events for owned objects are routed to their owner. Objects without a
/// GreetingService owner, or whose owner is already gone, yield `None`.
pub async fn request_for(event: &ChangeEvent, store: &dyn ResourceStore) -> Option<ObjectKey> {
    let key = owner_key(event)?;
    if event.kind == ResourceKind::GreetingService {
        return Some(key);
    }

    match store.greeting_exists(&key).await {
        Ok(true) => Some(key),
        Ok(false) => {
            debug!(
                "Dropping {:?} event for {}: owner {} no longer exists",
                event.kind, event.key, key
            );
            None
        }
        Err(e) => {
            // Reconcile copes with a missing owner, so enqueue anyway
            warn!("Could not check owner {} of {}: {}", key, event.key, e);
            Some(key)
        }
    }
}

/// Name of the object kind for log fields
pub fn kind_name(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::GreetingService => KIND,
        ResourceKind::Deployment => "Deployment",
        ResourceKind::Service => "Service",
    }
}

/// Generation of an object, used to drop status-only updates
pub(crate) fn generation<K: Resource>(obj: &K) -> Option<i64> {
    obj.meta().generation
}
