//! Kubernetes Deployment builder for greeting pods

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::adapters::labels::{build_labels, build_owner_reference};
use crate::crd::{GreetingService, GreetingServiceSpec};

/// Name of the single container in the pod template
pub const CONTAINER_NAME: &str = "greeting";

/// Name of the container port the Service targets
pub const PORT_NAME: &str = "http";

/// Build the Deployment for a GreetingService
pub fn build_deployment(greeting: &GreetingService) -> Deployment {
    let name = greeting.metadata.name.clone().unwrap_or_default();
    let namespace = greeting.metadata.namespace.clone().unwrap_or_default();
    let spec = &greeting.spec;

    let labels = build_labels(&name);
    let replicas = if spec.suspend { 0 } else { spec.replicas };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![build_owner_reference(greeting)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(spec)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_pod_spec(spec: &GreetingServiceSpec) -> PodSpec {
    let mut env = vec![EnvVar {
        name: "PORT".to_string(),
        value: Some(spec.port.to_string()),
        ..Default::default()
    }];
    if let Some(ref message) = spec.message {
        env.push(EnvVar {
            name: "GREETING_MESSAGE".to_string(),
            value: Some(message.clone()),
            ..Default::default()
        });
    }

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: spec.port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env),
        liveness_probe: Some(tcp_probe(10, 10)),
        readiness_probe: Some(tcp_probe(5, 5)),
        ..Default::default()
    };

    PodSpec {
        containers: vec![container],
        ..Default::default()
    }
}

fn tcp_probe(initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::String(PORT_NAME.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(3),
        failure_threshold: Some(3),
        ..Default::default()
    }
}
