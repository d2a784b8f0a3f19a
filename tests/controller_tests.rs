//! End-to-end tests for the GreetingService controller
//!
//! The controller runs against the in-memory store and is driven only by
//! that store's change events, the same way it is driven by watches in a
//! cluster.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{context, eventually, key, replicas, NAMESPACE};
use greeting_operator::controllers::greeting_controller;
use greeting_operator::crd::{GreetingServiceSpec, Phase};
use greeting_operator::error::StoreError;
use greeting_operator::store::MemoryStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    store: Arc<MemoryStore>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(greeting_controller::run(
            store.events(),
            context(&store),
            shutdown.clone(),
        ));
        Self {
            store,
            shutdown,
            handle,
        }
    }

    fn phase(&self, name: &str) -> Option<Phase> {
        self.store
            .greeting(&key(name))
            .and_then(|g| g.status)
            .and_then(|s| s.phase)
    }

    fn deployment_replicas(&self, name: &str) -> Option<i32> {
        self.store.deployment(&key(name)).as_ref().and_then(replicas)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("controller stops within the grace period")
            .expect("controller task does not panic");
    }
}

#[tokio::test(start_paused = true)]
async fn created_resource_becomes_ready() {
    let h = Harness::start();
    h.store
        .create_greeting(NAMESPACE, "hello", GreetingServiceSpec::new("app:v1", 2));

    eventually("phase Ready", || h.phase("hello") == Some(Phase::Ready)).await;

    assert_eq!(h.deployment_replicas("hello"), Some(2));
    assert!(h.store.service(&key("hello")).is_some());
    let status = h.store.greeting(&key("hello")).unwrap().status.unwrap();
    assert_eq!(status.ready_replicas, Some(2));
    assert_eq!(status.deployment_name.as_deref(), Some("hello"));
    assert_eq!(status.service_name.as_deref(), Some("hello"));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn spec_update_is_picked_up() {
    let h = Harness::start();
    h.store
        .create_greeting(NAMESPACE, "hello", GreetingServiceSpec::new("app:v1", 2));
    eventually("initial rollout", || h.deployment_replicas("hello") == Some(2)).await;

    h.store.update_spec(&key("hello"), |s| s.replicas = 5);

    eventually("scale to 5", || h.deployment_replicas("hello") == Some(5)).await;
    eventually("status reports 5", || {
        h.store
            .greeting(&key("hello"))
            .and_then(|g| g.status)
            .and_then(|s| s.ready_replicas)
            == Some(5)
    })
    .await;

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn out_of_band_delete_is_repaired() {
    let h = Harness::start();
    h.store
        .create_greeting(NAMESPACE, "hello", GreetingServiceSpec::new("app:v1", 3));
    eventually("initial rollout", || h.phase("hello") == Some(Phase::Ready)).await;

    assert!(h.store.delete_deployment(&key("hello")));

    // Well inside the 300s safety-net requeue
    eventually("deployment recreated", || {
        h.deployment_replicas("hello") == Some(3)
    })
    .await;

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn conflict_is_retried_until_ready() {
    let h = Harness::start();
    h.store
        .fail_next_write(StoreError::Conflict("object was modified".to_string()));
    h.store
        .create_greeting(NAMESPACE, "hello", GreetingServiceSpec::new("app:v1", 2));

    eventually("phase Ready after retry", || {
        h.phase("hello") == Some(Phase::Ready)
    })
    .await;

    let status = h.store.greeting(&key("hello")).unwrap().status.unwrap();
    assert_eq!(status.ready_replicas, Some(2));
    assert_eq!(h.store.deployment_count(NAMESPACE), 1);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_status_write_is_retried() {
    let h = Harness::start();
    h.store
        .fail_next_status_write(StoreError::Unavailable("etcd leader changed".to_string()));
    h.store
        .create_greeting(NAMESPACE, "hello", GreetingServiceSpec::new("app:v1", 2));

    // Well inside the 300s safety-net requeue, so this is the retry path
    eventually("phase Ready after retry", || {
        h.phase("hello") == Some(Phase::Ready)
    })
    .await;

    let status = h.store.greeting(&key("hello")).unwrap().status.unwrap();
    assert_eq!(status.ready_replicas, Some(2));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn deleted_resource_is_not_resurrected() {
    let h = Harness::start();
    h.store
        .create_greeting(NAMESPACE, "hello", GreetingServiceSpec::new("app:v1", 2));
    eventually("initial rollout", || h.phase("hello") == Some(Phase::Ready)).await;

    assert!(h.store.delete_greeting(&key("hello")));
    let writes = h.store.write_count();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.store.deployment_count(NAMESPACE), 0);
    assert_eq!(h.store.service_count(NAMESPACE), 0);
    assert_eq!(h.store.write_count(), writes);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn independent_resources_all_converge() {
    let h = Harness::start();
    for (i, name) in ["alpha", "beta", "gamma", "delta", "epsilon"].iter().enumerate() {
        h.store.create_greeting(
            NAMESPACE,
            name,
            GreetingServiceSpec::new(format!("{}:v1", name), i as i32 + 1),
        );
    }

    eventually("all five ready", || {
        ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .all(|n| h.phase(n) == Some(Phase::Ready))
    })
    .await;

    assert_eq!(h.deployment_replicas("alpha"), Some(1));
    assert_eq!(h.deployment_replicas("epsilon"), Some(5));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_nothing_queued_returns() {
    let h = Harness::start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.stop().await;
}
