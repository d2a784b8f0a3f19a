//! Pure builders translating a GreetingService into its owned objects

pub mod deployment_builder;
pub mod labels;
pub mod service_builder;

pub use deployment_builder::build_deployment;
pub use labels::{build_labels, build_owner_reference};
pub use service_builder::{build_service, service_endpoint};
