//! GreetingService Custom Resource Definition

use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// API group of the GreetingService kind
pub const API_GROUP: &str = "greeting.example.com";

/// API version of the GreetingService kind
pub const API_VERSION: &str = "v1";

/// Kind name
pub const KIND: &str = "GreetingService";

/// Name of the CustomResourceDefinition object (`<plural>.<group>`)
pub const CRD_NAME: &str = "greetingservices.greeting.example.com";

/// Container port used when the spec leaves `port` unset
pub const DEFAULT_PORT: i32 = 3000;

/// GreetingService resource specification
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "greeting.example.com",
    version = "v1",
    kind = "GreetingService",
    plural = "greetingservices",
    singular = "greetingservice",
    shortname = "gs",
    namespaced,
    status = "GreetingServiceStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas"}"#,
    printcolumn = r#"{"name": "Ready", "type": "integer", "jsonPath": ".status.readyReplicas"}"#,
    printcolumn = r#"{"name": "Image", "type": "string", "jsonPath": ".spec.image"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GreetingServiceSpec {
    /// Container image reference
    pub image: String,

    /// Number of workload replicas
    pub replicas: i32,

    /// Port the container listens on
    #[serde(default = "default_port")]
    pub port: i32,

    /// Greeting text passed to the container as GREETING_MESSAGE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Scale the workload to zero while keeping the Service
    #[serde(default)]
    pub suspend: bool,
}

fn default_port() -> i32 {
    DEFAULT_PORT
}

impl GreetingServiceSpec {
    /// Spec with the required fields set and everything else defaulted
    pub fn new(image: impl Into<String>, replicas: i32) -> Self {
        Self {
            image: image.into(),
            replicas,
            port: DEFAULT_PORT,
            message: None,
            suspend: false,
        }
    }
}

/// Check a spec against the schema contract.
///
/// The API server's admission layer is expected to enforce the same rules,
/// but specs stored before a schema change can still reach the reconciler.
pub fn validate(spec: &GreetingServiceSpec) -> Result<()> {
    if spec.image.trim().is_empty() {
        return Err(Error::Validation("image cannot be empty".to_string()));
    }

    if spec.image.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "image '{}' must not contain whitespace",
            spec.image
        )));
    }

    if spec.replicas < 1 {
        return Err(Error::Validation(format!(
            "replicas must be >= 1, got {} (set suspend: true to scale to zero)",
            spec.replicas
        )));
    }

    if !(1..=65535).contains(&spec.port) {
        return Err(Error::Validation(format!(
            "port must be between 1 and 65535, got {}",
            spec.port
        )));
    }

    Ok(())
}

/// Lifecycle phase reported in the status subresource
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    /// Not yet seen by the controller
    #[default]
    Unknown,
    /// Owned objects applied, waiting for replicas to become ready
    Reconciling,
    /// All requested replicas are ready
    Ready,
    /// The last attempt failed
    Failed,
    /// Workload scaled to zero on request
    Suspended,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unknown => "Unknown",
            Phase::Reconciling => "Reconciling",
            Phase::Ready => "Ready",
            Phase::Failed => "Failed",
            Phase::Suspended => "Suspended",
        };
        f.write_str(s)
    }
}

/// GreetingService status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GreetingServiceStatus {
    /// Current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Ready replicas observed on the owned Deployment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    /// Requested replicas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Deployment name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Service name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Generation of the spec this status describes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status condition
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (Ready, WorkloadAvailable)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_defaults_when_unset() {
        let spec: GreetingServiceSpec =
            serde_json::from_value(serde_json::json!({"image": "app:v1", "replicas": 2}))
                .unwrap();
        assert_eq!(spec.port, 3000);
        assert_eq!(spec.message, None);
        assert!(!spec.suspend);
    }

    #[test]
    fn valid_spec_passes() {
        let mut spec = GreetingServiceSpec::new("app:v1", 2);
        spec.message = Some("hello".to_string());
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn empty_image_is_rejected() {
        let spec = GreetingServiceSpec::new("  ", 1);
        let err = validate(&spec).unwrap_err();
        assert!(err.to_string().contains("image"));
    }

    #[test]
    fn zero_replicas_is_rejected() {
        let spec = GreetingServiceSpec::new("app:v1", 0);
        let err = validate(&spec).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("suspend"));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let mut spec = GreetingServiceSpec::new("app:v1", 1);
        spec.port = 70000;
        assert!(validate(&spec).is_err());
        spec.port = 0;
        assert!(validate(&spec).is_err());
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = GreetingServiceStatus {
            phase: Some(Phase::Ready),
            ready_replicas: Some(2),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["phase"], "Ready");
        assert_eq!(value["readyReplicas"], 2);
        assert!(value.get("conditions").is_none());
    }
}
