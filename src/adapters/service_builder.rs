//! Kubernetes Service builder for greeting access

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::adapters::deployment_builder::PORT_NAME;
use crate::adapters::labels::{build_labels, build_owner_reference};
use crate::crd::{GreetingService, GreetingServiceSpec};

/// Port the Service exposes inside the cluster
pub const SERVICE_PORT: i32 = 80;

/// Build the Service for a GreetingService
pub fn build_service(greeting: &GreetingService) -> Service {
    let name = greeting.metadata.name.clone().unwrap_or_default();
    let namespace = greeting.metadata.namespace.clone().unwrap_or_default();

    let labels = build_labels(&name);

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![build_owner_reference(greeting)]),
            ..Default::default()
        },
        spec: Some(build_service_spec(&greeting.spec, &labels)),
        ..Default::default()
    }
}

fn build_service_spec(spec: &GreetingServiceSpec, selector: &BTreeMap<String, String>) -> ServiceSpec {
    ServiceSpec {
        type_: Some("ClusterIP".to_string()),
        selector: Some(selector.clone()),
        ports: Some(vec![ServicePort {
            name: Some(PORT_NAME.to_string()),
            port: SERVICE_PORT,
            target_port: Some(IntOrString::Int(spec.port)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// In-cluster DNS endpoint for the Service
pub fn service_endpoint(name: &str, namespace: &str) -> String {
    format!("{}.{}.svc.cluster.local:{}", name, namespace, SERVICE_PORT)
}
