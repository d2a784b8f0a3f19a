//! Controller for GreetingService resources

use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::controllers::{dispatcher, Action, Context};
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS};
use crate::reconcilers::greeting;
use crate::store::ObjectKey;
use crate::watch::ChangeEvent;
use crate::Result;

/// Run the GreetingService controller until `shutdown` is cancelled
pub async fn run<E>(events: E, ctx: Arc<Context>, shutdown: CancellationToken)
where
    E: Stream<Item = ChangeEvent> + Send,
{
    info!("Starting GreetingService controller");

    dispatcher::run(events, ctx, shutdown, reconcile).await;

    info!("GreetingService controller stopped");
}

/// Reconcile a GreetingService resource
#[instrument(skip(ctx), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<Action> {
    let start = std::time::Instant::now();

    RECONCILIATIONS.with_label_values(&["GreetingService"]).inc();

    let result = greeting::reconcile(&key, &ctx).await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["GreetingService"])
        .observe(duration);

    match &result {
        Ok(action) => info!("Reconciled {} in {:.2}s: {:?}", key, duration, action),
        Err(e) => error!("Failed to reconcile {}: {}", key, e),
    }

    result
}
