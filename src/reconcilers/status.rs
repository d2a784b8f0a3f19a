//! Status reporting for GreetingService resources

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::adapters::service_endpoint;
use crate::crd::{Condition, GreetingService, GreetingServiceStatus, Phase};
use crate::metrics::prometheus::READY_REPLICAS;
use crate::store::{ObjectKey, ResourceStore};
use crate::Result;

/// Status after owned objects were applied successfully
pub fn ready_status(
    greeting: &GreetingService,
    deployment: &Deployment,
    service: &Service,
) -> GreetingServiceStatus {
    let name = greeting.name_any();
    let namespace = greeting.namespace().unwrap_or_default();
    let spec = &greeting.spec;

    let ready_replicas = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let desired = desired_replicas(greeting);
    let endpoint = service_endpoint(&name, &namespace);

    let phase = if spec.suspend {
        Phase::Suspended
    } else if ready_replicas >= desired {
        Phase::Ready
    } else {
        Phase::Reconciling
    };

    let message = match phase {
        Phase::Suspended => format!("Suspended, Service still available at {}", endpoint),
        Phase::Ready => format!(
            "{}/{} replicas ready, serving at {}",
            ready_replicas, desired, endpoint
        ),
        _ => format!("Waiting for replicas: {}/{} ready", ready_replicas, desired),
    };

    let now = Utc::now();
    let conditions = vec![
        Condition {
            type_: "WorkloadAvailable".to_string(),
            status: if ready_replicas > 0 { "True" } else { "False" }.to_string(),
            last_transition_time: now,
            reason: Some(
                if ready_replicas > 0 {
                    "ReplicasAvailable"
                } else {
                    "NoReplicasAvailable"
                }
                .to_string(),
            ),
            message: Some(format!("{}/{} replicas ready", ready_replicas, desired)),
        },
        Condition {
            type_: "Ready".to_string(),
            status: if phase == Phase::Ready { "True" } else { "False" }.to_string(),
            last_transition_time: now,
            reason: Some(phase.to_string()),
            message: Some(message.clone()),
        },
    ];

    GreetingServiceStatus {
        phase: Some(phase),
        message: Some(message),
        ready_replicas: Some(ready_replicas),
        replicas: Some(desired),
        deployment_name: deployment.metadata.name.clone(),
        service_name: service.metadata.name.clone(),
        observed_generation: greeting.metadata.generation,
        last_update_time: Some(now),
        conditions,
    }
}

/// Replica count the Deployment is asked for
fn desired_replicas(greeting: &GreetingService) -> i32 {
    if greeting.spec.suspend {
        0
    } else {
        greeting.spec.replicas
    }
}

/// Status for an attempt that could not be carried out
pub fn failed_status(greeting: &GreetingService, reason: &str, message: &str) -> GreetingServiceStatus {
    let previous = greeting.status.clone().unwrap_or_default();
    let now = Utc::now();

    GreetingServiceStatus {
        phase: Some(Phase::Failed),
        message: Some(message.to_string()),
        ready_replicas: previous.ready_replicas,
        replicas: Some(desired_replicas(greeting)),
        deployment_name: previous.deployment_name,
        service_name: previous.service_name,
        observed_generation: greeting.metadata.generation,
        last_update_time: Some(now),
        conditions: vec![Condition {
            type_: "Ready".to_string(),
            status: "False".to_string(),
            last_transition_time: now,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }],
    }
}

/// Carry timestamps over from `previous` wherever nothing actually changed,
/// so an unchanged outcome produces an identical status.
pub fn stabilize(
    previous: Option<&GreetingServiceStatus>,
    mut next: GreetingServiceStatus,
) -> GreetingServiceStatus {
    let Some(previous) = previous else {
        return next;
    };

    for condition in &mut next.conditions {
        let unchanged = previous.conditions.iter().find(|c| {
            c.type_ == condition.type_ && c.status == condition.status && c.reason == condition.reason
        });
        if let Some(old) = unchanged {
            condition.last_transition_time = old.last_transition_time;
        }
    }

    let mut candidate = next.clone();
    candidate.last_update_time = previous.last_update_time;
    if &candidate == previous {
        candidate
    } else {
        next
    }
}

/// Write `status` unless it matches what is already stored.
///
/// The write is conditional on the resource version the GreetingService was
/// read at, so a spec edit racing with this reconcile surfaces as a conflict.
/// Returns whether a write was issued.
pub async fn write(
    store: &dyn ResourceStore,
    greeting: &GreetingService,
    status: GreetingServiceStatus,
) -> Result<bool> {
    let key = ObjectKey::from_resource(greeting);
    let status = stabilize(greeting.status.as_ref(), status);

    if let Some(ready) = status.ready_replicas {
        READY_REPLICAS
            .with_label_values(&[key.namespace.as_str(), key.name.as_str()])
            .set(ready as f64);
    }

    if greeting.status.as_ref() == Some(&status) {
        debug!("Status of {} unchanged", key);
        return Ok(false);
    }

    store
        .patch_status(&key, &status, greeting.resource_version().as_deref())
        .await?;

    info!(
        "Updated status for {}: phase={}, ready={}/{}",
        key,
        status.phase.unwrap_or_default(),
        status.ready_replicas.unwrap_or(0),
        status.replicas.unwrap_or(0)
    );
    Ok(true)
}

/// Forget per-resource metrics for a GreetingService that no longer exists
pub fn forget(key: &ObjectKey) {
    let _ = READY_REPLICAS.remove_label_values(&[key.namespace.as_str(), key.name.as_str()]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{build_deployment, build_service};
    use crate::crd::GreetingServiceSpec;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn greeting(spec: GreetingServiceSpec) -> GreetingService {
        let mut gs = GreetingService::new("hello", spec);
        gs.metadata.namespace = Some("demo".to_string());
        gs.metadata.generation = Some(4);
        gs
    }

    fn deployment_with_ready(gs: &GreetingService, ready: i32) -> Deployment {
        let mut d = build_deployment(gs);
        d.status = Some(DeploymentStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        });
        d
    }

    #[test]
    fn all_replicas_ready_is_ready() {
        let gs = greeting(GreetingServiceSpec::new("app:v1", 2));
        let status = ready_status(&gs, &deployment_with_ready(&gs, 2), &build_service(&gs));

        assert_eq!(status.phase, Some(Phase::Ready));
        assert_eq!(status.ready_replicas, Some(2));
        assert_eq!(status.replicas, Some(2));
        assert_eq!(status.observed_generation, Some(4));
        assert_eq!(
            status.message.as_deref(),
            Some("2/2 replicas ready, serving at hello.demo.svc.cluster.local:80")
        );
    }

    #[test]
    fn partial_rollout_is_reconciling() {
        let gs = greeting(GreetingServiceSpec::new("app:v1", 5));
        let status = ready_status(&gs, &deployment_with_ready(&gs, 2), &build_service(&gs));

        assert_eq!(status.phase, Some(Phase::Reconciling));
        let ready = status.conditions.iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(ready.status, "False");
    }

    #[test]
    fn suspended_reports_zero_desired() {
        let mut spec = GreetingServiceSpec::new("app:v1", 3);
        spec.suspend = true;
        let gs = greeting(spec);
        let status = ready_status(&gs, &deployment_with_ready(&gs, 0), &build_service(&gs));

        assert_eq!(status.phase, Some(Phase::Suspended));
        assert_eq!(status.replicas, Some(0));
    }

    #[test]
    fn failed_status_keeps_previous_counts() {
        let mut gs = greeting(GreetingServiceSpec::new("", 1));
        gs.status = Some(GreetingServiceStatus {
            ready_replicas: Some(1),
            ..Default::default()
        });

        let status = failed_status(&gs, "InvalidSpec", "image cannot be empty");
        assert_eq!(status.phase, Some(Phase::Failed));
        assert_eq!(status.ready_replicas, Some(1));
        assert_eq!(status.message.as_deref(), Some("image cannot be empty"));
    }

    #[test]
    fn failed_status_agrees_with_ready_status_on_suspend() {
        let mut spec = GreetingServiceSpec::new("app:v1", 3);
        spec.suspend = true;
        let gs = greeting(spec);

        let failed = failed_status(&gs, "ReconcileError", "apiserver unavailable");
        let ready = ready_status(&gs, &deployment_with_ready(&gs, 0), &build_service(&gs));
        assert_eq!(failed.replicas, Some(0));
        assert_eq!(failed.replicas, ready.replicas);
    }

    #[test]
    fn stabilize_keeps_identical_status_identical() {
        let gs = greeting(GreetingServiceSpec::new("app:v1", 2));
        let d = deployment_with_ready(&gs, 2);
        let s = build_service(&gs);

        let first = ready_status(&gs, &d, &s);
        let second = stabilize(Some(&first), ready_status(&gs, &d, &s));
        assert_eq!(first, second);
    }

    #[test]
    fn stabilize_moves_timestamp_on_change() {
        let gs = greeting(GreetingServiceSpec::new("app:v1", 2));
        let s = build_service(&gs);

        let mut first = ready_status(&gs, &deployment_with_ready(&gs, 1), &s);
        first.last_update_time = Some(Utc::now() - chrono::Duration::minutes(5));
        let second = stabilize(Some(&first), ready_status(&gs, &deployment_with_ready(&gs, 2), &s));

        assert_ne!(first.phase, second.phase);
        assert_ne!(first.last_update_time, second.last_update_time);
    }
}
