//! Custom Resource Definitions for the Greeting Operator

mod greeting_service;

pub use greeting_service::*;

use kube::CustomResourceExt;

use crate::{Error, Result};

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Result<Vec<String>> {
    let crd = serde_yaml::to_string(&GreetingService::crd())
        .map_err(|e| Error::Config(format!("Failed to render CRD: {}", e)))?;
    Ok(vec![crd])
}
