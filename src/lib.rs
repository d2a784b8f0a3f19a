//! Greeting Operator
//!
//! Reconciles `GreetingService` custom resources into a Deployment and a
//! Service per resource, keeping them in line with the declared spec.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod store;
pub mod watch;

pub use error::{Error, Result};
