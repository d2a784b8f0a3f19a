//! Canonical labels and owner references shared by every owned object

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::{GreetingService, API_GROUP, API_VERSION, KIND};

/// Value of `app.kubernetes.io/name` on owned objects
pub const APP_NAME: &str = "greeting-service";

/// Value of `app.kubernetes.io/managed-by` on owned objects
pub const MANAGED_BY: &str = "greeting-operator";

/// Label key identifying the managing controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Build the label set for a GreetingService.
///
/// The Deployment metadata, its selector, the pod template and the Service
/// selector all take this exact map, so routing cannot drift from the pods.
pub fn build_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), APP_NAME.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), name.to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Controller owner reference pointing back at the GreetingService
pub fn build_owner_reference(greeting: &GreetingService) -> OwnerReference {
    OwnerReference {
        api_version: format!("{}/{}", API_GROUP, API_VERSION),
        kind: KIND.to_string(),
        name: greeting.name_any(),
        uid: greeting.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Label selector string matching every object this operator manages
pub fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GreetingServiceSpec;

    #[test]
    fn labels_derive_only_from_name() {
        let a = build_labels("hello");
        let b = build_labels("hello");
        assert_eq!(a, b);
        assert_eq!(a.get("app.kubernetes.io/instance").unwrap(), "hello");
        assert_ne!(a, build_labels("other"));
    }

    #[test]
    fn owner_reference_is_controller() {
        let mut greeting = GreetingService::new("hello", GreetingServiceSpec::new("app:v1", 1));
        greeting.metadata.uid = Some("uid-1".to_string());

        let owner = build_owner_reference(&greeting);
        assert_eq!(owner.api_version, "greeting.example.com/v1");
        assert_eq!(owner.kind, "GreetingService");
        assert_eq!(owner.name, "hello");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn selector_matches_managed_label() {
        let labels = build_labels("x");
        let (key, value) = managed_selector()
            .split_once('=')
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .unwrap();
        assert_eq!(labels.get(&key), Some(&value));
    }
}
