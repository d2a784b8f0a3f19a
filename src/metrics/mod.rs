//! Prometheus metrics for the Greeting Operator
//!
//! This module exposes metrics for monitoring reconcile throughput and workload readiness.

pub mod prometheus;

pub use prometheus::*;
