//! Reconcilers for GreetingService resources

pub mod greeting;
pub mod status;
