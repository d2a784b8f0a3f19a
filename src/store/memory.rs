//! In-process ResourceStore
//!
//! Mirrors the parts of API server behaviour the controller relies on:
//! resource versions and generations, declarative apply that leaves
//! unchanged objects untouched, conditional status writes, and
//! owner-reference garbage collection when a GreetingService is deleted.
//! Deployments report every requested replica as ready as soon as they are
//! applied unless [`MemoryStore::set_auto_ready`] turns that off.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, Stream};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tokio::sync::broadcast;

use crate::crd::{GreetingService, GreetingServiceSpec, GreetingServiceStatus, KIND};
use crate::error::StoreError;
use crate::store::{ensure_same_controller, ObjectKey, ResourceStore};
use crate::watch::{ChangeEvent, ChangeType};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 1024;

/// Object database kept in memory
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ChangeEvent>,
}

struct Inner {
    greetings: BTreeMap<ObjectKey, GreetingService>,
    deployments: BTreeMap<ObjectKey, Deployment>,
    services: BTreeMap<ObjectKey, Service>,
    next_version: u64,
    next_uid: u64,
    writes: usize,
    injected: VecDeque<StoreError>,
    injected_status: VecDeque<StoreError>,
    registered: bool,
    auto_ready: bool,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Fail the current write if an error was injected for it
    fn take_injected(&mut self, status_write: bool) -> std::result::Result<(), StoreError> {
        let injected = if status_write {
            self.injected_status
                .pop_front()
                .or_else(|| self.injected.pop_front())
        } else {
            self.injected.pop_front()
        };
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the GreetingService kind registered
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                greetings: BTreeMap::new(),
                deployments: BTreeMap::new(),
                services: BTreeMap::new(),
                next_version: 0,
                next_uid: 0,
                writes: 0,
                injected: VecDeque::new(),
                injected_status: VecDeque::new(),
                registered: true,
                auto_ready: true,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ChangeEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Subscribe to change events from this point on
    pub fn events(&self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        let rx = self.events.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Toggle registration of the GreetingService kind
    pub fn set_registered(&self, registered: bool) {
        self.lock().registered = registered;
    }

    /// Whether applied Deployments immediately report all replicas ready
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.lock().auto_ready = auto_ready;
    }

    /// Fail the next write (apply or status) with `err`
    pub fn fail_next_write(&self, err: StoreError) {
        self.lock().injected.push_back(err);
    }

    /// Fail the next status write with `err`, letting applies through
    pub fn fail_next_status_write(&self, err: StoreError) {
        self.lock().injected_status.push_back(err);
    }

    /// Number of writes that changed a stored object
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Create a GreetingService as an external actor would
    pub fn create_greeting(
        &self,
        namespace: &str,
        name: &str,
        spec: GreetingServiceSpec,
    ) -> GreetingService {
        let greeting = {
            let mut inner = self.lock();
            inner.next_uid += 1;
            let uid = format!("uid-{}", inner.next_uid);
            let resource_version = inner.bump();

            let mut greeting = GreetingService::new(name, spec);
            greeting.metadata.namespace = Some(namespace.to_string());
            greeting.metadata.uid = Some(uid);
            greeting.metadata.generation = Some(1);
            greeting.metadata.resource_version = Some(resource_version);

            inner
                .greetings
                .insert(ObjectKey::new(namespace, name), greeting.clone());
            greeting
        };

        self.emit(ChangeEvent::for_object(&greeting, ChangeType::Applied));
        greeting
    }

    /// Edit the spec of a GreetingService, bumping its generation
    pub fn update_spec(
        &self,
        key: &ObjectKey,
        edit: impl FnOnce(&mut GreetingServiceSpec),
    ) -> Option<GreetingService> {
        let updated = {
            let mut inner = self.lock();
            let resource_version = inner.bump();
            let greeting = inner.greetings.get_mut(key)?;
            edit(&mut greeting.spec);
            greeting.metadata.generation = Some(greeting.metadata.generation.unwrap_or(0) + 1);
            greeting.metadata.resource_version = Some(resource_version);
            greeting.clone()
        };

        self.emit(ChangeEvent::for_object(&updated, ChangeType::Applied));
        Some(updated)
    }

    /// Delete a GreetingService and garbage-collect everything it controls
    pub fn delete_greeting(&self, key: &ObjectKey) -> bool {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            let Some(greeting) = inner.greetings.remove(key) else {
                return false;
            };
            events.push(ChangeEvent::for_object(&greeting, ChangeType::Deleted));

            let uid = greeting.metadata.uid.unwrap_or_default();
            let owned_by = |meta: &ObjectMeta| {
                meta.owner_references
                    .iter()
                    .flatten()
                    .any(|o| is_owner(o, &uid))
            };

            let orphans: Vec<ObjectKey> = inner
                .deployments
                .iter()
                .filter(|(_, d)| owned_by(&d.metadata))
                .map(|(k, _)| k.clone())
                .collect();
            for k in orphans {
                if let Some(d) = inner.deployments.remove(&k) {
                    events.push(ChangeEvent::for_object(&d, ChangeType::Deleted));
                }
            }

            let orphans: Vec<ObjectKey> = inner
                .services
                .iter()
                .filter(|(_, s)| owned_by(&s.metadata))
                .map(|(k, _)| k.clone())
                .collect();
            for k in orphans {
                if let Some(s) = inner.services.remove(&k) {
                    events.push(ChangeEvent::for_object(&s, ChangeType::Deleted));
                }
            }
        }

        for event in events {
            self.emit(event);
        }
        true
    }

    /// Delete a Deployment out of band
    pub fn delete_deployment(&self, key: &ObjectKey) -> bool {
        let removed = self.lock().deployments.remove(key);
        match removed {
            Some(d) => {
                self.emit(ChangeEvent::for_object(&d, ChangeType::Deleted));
                true
            }
            None => false,
        }
    }

    /// Delete a Service out of band
    pub fn delete_service(&self, key: &ObjectKey) -> bool {
        let removed = self.lock().services.remove(key);
        match removed {
            Some(s) => {
                self.emit(ChangeEvent::for_object(&s, ChangeType::Deleted));
                true
            }
            None => false,
        }
    }

    /// Insert a Deployment as-is, as a user hand-editing the cluster would
    pub fn put_deployment(&self, deployment: Deployment) {
        let stored = {
            let mut inner = self.lock();
            let mut deployment = deployment;
            deployment.metadata.resource_version = Some(inner.bump());
            inner
                .deployments
                .insert(ObjectKey::from_resource(&deployment), deployment.clone());
            deployment
        };
        self.emit(ChangeEvent::for_object(&stored, ChangeType::Applied));
    }

    /// Current GreetingService
    pub fn greeting(&self, key: &ObjectKey) -> Option<GreetingService> {
        self.lock().greetings.get(key).cloned()
    }

    /// Current Deployment
    pub fn deployment(&self, key: &ObjectKey) -> Option<Deployment> {
        self.lock().deployments.get(key).cloned()
    }

    /// Current Service
    pub fn service(&self, key: &ObjectKey) -> Option<Service> {
        self.lock().services.get(key).cloned()
    }

    /// Number of Deployments in a namespace
    pub fn deployment_count(&self, namespace: &str) -> usize {
        self.lock()
            .deployments
            .keys()
            .filter(|k| k.namespace == namespace)
            .count()
    }

    /// Number of Services in a namespace
    pub fn service_count(&self, namespace: &str) -> usize {
        self.lock()
            .services
            .keys()
            .filter(|k| k.namespace == namespace)
            .count()
    }
}

fn is_owner(owner: &OwnerReference, uid: &str) -> bool {
    owner.kind == KIND && owner.uid == uid
}

fn key_of<K: Resource>(obj: &K) -> std::result::Result<ObjectKey, StoreError> {
    if obj.namespace().is_none() || obj.meta().name.is_none() {
        return Err(StoreError::Invalid(
            "object must have a name and namespace".to_string(),
        ));
    }
    Ok(ObjectKey::from_resource(obj))
}

/// Apply `desired` over `existing` the way a forced server-side apply does:
/// fields set by anyone else are overwritten. Returns `None` when nothing
/// would change.
fn apply_object<K>(existing: Option<&K>, desired: &K) -> std::result::Result<Option<K>, StoreError>
where
    K: Resource + Clone + PartialEq,
{
    let Some(existing) = existing else {
        return Ok(Some(desired.clone()));
    };

    ensure_same_controller(existing.meta(), desired.meta())?;

    let mut merged = desired.clone();
    merged.meta_mut().uid = existing.meta().uid.clone();
    merged.meta_mut().resource_version = existing.meta().resource_version.clone();

    if &merged == existing {
        Ok(None)
    } else {
        Ok(Some(merged))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn ensure_kind_registered(&self) -> Result<()> {
        if self.lock().registered {
            Ok(())
        } else {
            Err(Error::KindNotRegistered(format!(
                "{} is not registered",
                crate::crd::CRD_NAME
            )))
        }
    }

    async fn get_greeting(
        &self,
        key: &ObjectKey,
    ) -> std::result::Result<Option<GreetingService>, StoreError> {
        Ok(self.lock().greetings.get(key).cloned())
    }

    async fn apply_deployment(
        &self,
        deployment: &Deployment,
    ) -> std::result::Result<Deployment, StoreError> {
        let key = key_of(deployment)?;
        let stored = {
            let mut inner = self.lock();
            inner.take_injected(false)?;

            let existing = inner.deployments.get(&key).cloned();
            let mut desired = deployment.clone();
            desired.status = if inner.auto_ready {
                let replicas = desired.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                Some(DeploymentStatus {
                    replicas: Some(replicas),
                    ready_replicas: Some(replicas),
                    available_replicas: Some(replicas),
                    updated_replicas: Some(replicas),
                    ..Default::default()
                })
            } else {
                existing.as_ref().and_then(|d| d.status.clone())
            };

            match apply_object(existing.as_ref(), &desired)? {
                None => return Ok(existing.unwrap_or(desired)),
                Some(mut merged) => {
                    if merged.metadata.uid.is_none() {
                        inner.next_uid += 1;
                        merged.metadata.uid = Some(format!("uid-{}", inner.next_uid));
                    }
                    merged.metadata.resource_version = Some(inner.bump());
                    inner.writes += 1;
                    inner.deployments.insert(key, merged.clone());
                    merged
                }
            }
        };

        self.emit(ChangeEvent::for_object(&stored, ChangeType::Applied));
        Ok(stored)
    }

    async fn apply_service(&self, service: &Service) -> std::result::Result<Service, StoreError> {
        let key = key_of(service)?;
        let stored = {
            let mut inner = self.lock();
            inner.take_injected(false)?;

            let existing = inner.services.get(&key).cloned();
            let mut desired = service.clone();
            desired.status = existing.as_ref().and_then(|s| s.status.clone());

            match apply_object(existing.as_ref(), &desired)? {
                None => return Ok(existing.unwrap_or(desired)),
                Some(mut merged) => {
                    if merged.metadata.uid.is_none() {
                        inner.next_uid += 1;
                        merged.metadata.uid = Some(format!("uid-{}", inner.next_uid));
                    }
                    merged.metadata.resource_version = Some(inner.bump());
                    inner.writes += 1;
                    inner.services.insert(key, merged.clone());
                    merged
                }
            }
        };

        self.emit(ChangeEvent::for_object(&stored, ChangeType::Applied));
        Ok(stored)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        status: &GreetingServiceStatus,
        resource_version: Option<&str>,
    ) -> std::result::Result<(), StoreError> {
        let mut inner = self.lock();
        inner.take_injected(true)?;

        let current = inner
            .greetings
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(rv) = resource_version {
            if current.metadata.resource_version.as_deref() != Some(rv) {
                return Err(StoreError::Conflict(format!(
                    "{} was modified since resource version {}",
                    key, rv
                )));
            }
        }

        let next = inner.bump();
        inner.writes += 1;
        if let Some(greeting) = inner.greetings.get_mut(key) {
            greeting.status = Some(status.clone());
            greeting.metadata.resource_version = Some(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{build_deployment, build_service};

    #[tokio::test]
    async fn applying_identical_body_is_a_no_op() {
        let store = MemoryStore::new();
        let gs = store.create_greeting("demo", "hello", GreetingServiceSpec::new("app:v1", 2));

        let first = store.apply_deployment(&build_deployment(&gs)).await.unwrap();
        let second = store.apply_deployment(&build_deployment(&gs)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn deleting_owner_collects_owned_objects() {
        let store = MemoryStore::new();
        let gs = store.create_greeting("demo", "hello", GreetingServiceSpec::new("app:v1", 2));
        store.apply_deployment(&build_deployment(&gs)).await.unwrap();
        store.apply_service(&build_service(&gs)).await.unwrap();

        let key = ObjectKey::new("demo", "hello");
        assert!(store.delete_greeting(&key));
        assert!(store.deployment(&key).is_none());
        assert!(store.service(&key).is_none());
    }

    #[tokio::test]
    async fn stale_status_write_conflicts() {
        let store = MemoryStore::new();
        let gs = store.create_greeting("demo", "hello", GreetingServiceSpec::new("app:v1", 2));
        let key = ObjectKey::from_resource(&gs);
        let stale = gs.metadata.resource_version.clone();

        store.update_spec(&key, |spec| spec.replicas = 3).unwrap();

        let err = store
            .patch_status(&key, &GreetingServiceStatus::default(), stale.as_deref())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn foreign_controller_conflicts() {
        let store = MemoryStore::new();
        let gs = store.create_greeting("demo", "hello", GreetingServiceSpec::new("app:v1", 2));

        let mut foreign = build_deployment(&gs);
        if let Some(owners) = foreign.metadata.owner_references.as_mut() {
            owners[0].uid = "someone-else".to_string();
        }
        store.put_deployment(foreign);

        let err = store.apply_deployment(&build_deployment(&gs)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        let gs = store.create_greeting("demo", "hello", GreetingServiceSpec::new("app:v1", 1));
        store.fail_next_write(StoreError::Unavailable("eof".to_string()));

        assert!(store.apply_service(&build_service(&gs)).await.is_err());
        assert!(store.apply_service(&build_service(&gs)).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn status_failures_skip_applies() {
        let store = MemoryStore::new();
        let gs = store.create_greeting("demo", "hello", GreetingServiceSpec::new("app:v1", 1));
        let key = ObjectKey::from_resource(&gs);
        store.fail_next_status_write(StoreError::Unavailable("eof".to_string()));

        assert!(store.apply_deployment(&build_deployment(&gs)).await.is_ok());
        let err = store
            .patch_status(&key, &GreetingServiceStatus::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store
            .patch_status(&key, &GreetingServiceStatus::default(), None)
            .await
            .is_ok());
        assert_eq!(store.write_count(), 2);
    }
}
