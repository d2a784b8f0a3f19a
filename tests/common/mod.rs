//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use greeting_operator::config::ControllerSettings;
use greeting_operator::controllers::Context;
use greeting_operator::store::{MemoryStore, ObjectKey};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;

pub const NAMESPACE: &str = "demo";

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

pub fn settings() -> ControllerSettings {
    ControllerSettings {
        max_concurrent_reconciles: 4,
        requeue_interval: Duration::from_secs(300),
        retry_base_delay: Duration::from_millis(20),
        retry_max_delay: Duration::from_secs(1),
        invalid_spec_retry: Duration::from_secs(300),
        reconcile_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(1),
    }
}

pub fn context(store: &Arc<MemoryStore>) -> Arc<Context> {
    Context::new(store.clone(), settings())
}

pub fn replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

pub fn container(deployment: &Deployment) -> Container {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers[0].clone())
        .expect("deployment has a container")
}

/// Poll `check` until it holds, advancing (possibly paused) time between polls
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
