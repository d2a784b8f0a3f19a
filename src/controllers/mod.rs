//! Controller implementations for watching and reconciling resources

pub mod dispatcher;
pub mod greeting_controller;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ControllerSettings;
use crate::store::ResourceStore;

/// Shared context for controllers
pub struct Context {
    /// Object store client, shared read-only by all workers
    pub store: Arc<dyn ResourceStore>,
    /// Timing and concurrency settings
    pub settings: ControllerSettings,
}

impl Context {
    /// Create a new context
    pub fn new(store: Arc<dyn ResourceStore>, settings: ControllerSettings) -> Arc<Self> {
        Arc::new(Self { store, settings })
    }
}

/// What the dispatcher should do after a successful reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the given delay
    Requeue(Duration),
    /// Wait for the next change event
    AwaitChange,
}

impl Action {
    /// Reconcile again after `delay`
    pub fn requeue(delay: Duration) -> Self {
        Action::Requeue(delay)
    }

    /// Only reconcile again on a new event
    pub fn await_change() -> Self {
        Action::AwaitChange
    }
}
