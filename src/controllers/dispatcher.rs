//! Event dispatcher and bounded worker pool
//!
//! Change events are mapped to the key of the owning GreetingService and fed
//! into a [`WorkQueue`]. Owner lookups run alongside the loop, so a slow
//! store never holds up workers or shutdown. Keys are handed to workers one at a time per key,
//! with at most `max_concurrent_reconciles` reconciles running overall.
//! Every outcome is turned into a scheduling decision here; reconcile errors
//! never propagate past this module.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ControllerSettings;
use crate::controllers::queue::WorkQueue;
use crate::controllers::{Action, Context};
use crate::error::RetryClass;
use crate::metrics::prometheus::{
    OPERATOR_HEALTH, QUEUE_DEPTH, RECONCILES_IN_FLIGHT, RECONCILIATION_ERRORS,
};
use crate::store::ObjectKey;
use crate::watch::{kind_name, owner_key, request_for, ChangeEvent};
use crate::{Error, Result};

/// Kind label for metrics
const KIND_LABEL: &str = "GreetingService";

/// Longest wait for an owner existence check before enqueueing anyway
const OWNER_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before retrying `key` after its `attempts`-th consecutive failure
pub fn retry_delay(err: &Error, attempts: u32, settings: &ControllerSettings) -> Duration {
    match err.retry_class() {
        RetryClass::Slow => settings.invalid_spec_retry,
        RetryClass::Backoff => {
            let exponent = attempts.saturating_sub(1).min(16);
            settings
                .retry_base_delay
                .saturating_mul(1u32 << exponent)
                .min(settings.retry_max_delay)
        }
    }
}

/// Run the dispatcher until `shutdown` is cancelled.
///
/// On shutdown no further events are read, pending requests are dropped and
/// in-flight reconciles get `shutdown_grace` to finish before being aborted.
pub async fn run<E, F, Fut>(events: E, ctx: Arc<Context>, shutdown: CancellationToken, reconcile: F)
where
    E: Stream<Item = ChangeEvent> + Send,
    F: Fn(ObjectKey, Arc<Context>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Action>> + Send + 'static,
{
    let settings = ctx.settings.clone();
    let queue = WorkQueue::new();
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_reconciles));
    let mut workers: JoinSet<(ObjectKey, Result<Action>)> = JoinSet::new();
    let mut failures: HashMap<ObjectKey, u32> = HashMap::new();
    let mut lookups: FuturesUnordered<BoxFuture<'static, Option<ObjectKey>>> =
        FuturesUnordered::new();

    let events = events.fuse();
    tokio::pin!(events);
    let mut events_open = true;

    OPERATOR_HEALTH.set(1.0);
    info!(
        "Dispatcher started with {} workers",
        settings.max_concurrent_reconciles
    );

    loop {
        QUEUE_DEPTH.set(queue.len() as f64);
        RECONCILES_IN_FLIGHT.set(workers.len() as f64);

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                Ok((key, result)) => {
                    schedule(&queue, &mut failures, &settings, &key, result);
                    queue.done(&key);
                }
                Err(e) => error!("Reconcile task failed to join: {}", e),
            },

            Some(resolved) = lookups.next(), if !lookups.is_empty() => {
                if let Some(key) = resolved {
                    queue.add(key);
                }
            }

            event = events.next(), if events_open => match event {
                Some(event) => lookups.push(resolve(event, ctx.clone())),
                None => {
                    warn!("Watch stream ended; continuing with queued work only");
                    events_open = false;
                }
            },

            work = next_work(&queue, &semaphore) => {
                let Some((permit, key)) = work else { break };
                let fut = reconcile(key.clone(), ctx.clone());
                workers.spawn(run_one(key, fut, permit, settings.reconcile_timeout));
            }
        }
    }

    OPERATOR_HEALTH.set(0.0);
    queue.shut_down();
    QUEUE_DEPTH.set(0.0);

    if !workers.is_empty() {
        info!("Waiting for {} in-flight reconciles", workers.len());
        let drained = tokio::time::timeout(settings.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Ok((key, Err(e))) = joined {
                    warn!("Reconcile of {} failed during shutdown: {}", key, e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Abandoning {} reconciles after {:?}; they will run again on next start",
                workers.len(),
                settings.shutdown_grace
            );
            workers.abort_all();
        }
    }

    RECONCILES_IN_FLIGHT.set(0.0);
    info!("Dispatcher stopped");
}

/// Turn an event into a reconcile request off the main loop
fn resolve(event: ChangeEvent, ctx: Arc<Context>) -> BoxFuture<'static, Option<ObjectKey>> {
    async move {
        let lookup = request_for(&event, ctx.store.as_ref());
        let key = match tokio::time::timeout(OWNER_LOOKUP_TIMEOUT, lookup).await {
            Ok(key) => key,
            Err(_) => {
                warn!(
                    "Owner lookup for {} timed out after {:?}, queueing anyway",
                    event.key, OWNER_LOOKUP_TIMEOUT
                );
                owner_key(&event)
            }
        };
        if let Some(key) = &key {
            debug!(
                "{} {} changed, queueing {}",
                kind_name(event.kind),
                event.key,
                key
            );
        }
        key
    }
    .boxed()
}

/// Wait for a free worker slot and a due key
async fn next_work(
    queue: &WorkQueue,
    semaphore: &Arc<Semaphore>,
) -> Option<(OwnedSemaphorePermit, ObjectKey)> {
    let permit = semaphore.clone().acquire_owned().await.ok()?;
    let key = queue.next().await?;
    Some((permit, key))
}

/// Run one reconcile under the timeout, holding the worker permit
async fn run_one<Fut>(
    key: ObjectKey,
    fut: Fut,
    permit: OwnedSemaphorePermit,
    timeout: Duration,
) -> (ObjectKey, Result<Action>)
where
    Fut: Future<Output = Result<Action>> + Send + 'static,
{
    let _permit = permit;
    let result = match AssertUnwindSafe(tokio::time::timeout(timeout, fut))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::Timeout(timeout)),
        Err(_) => Err(Error::Internal(format!("reconcile of {} panicked", key))),
    };
    (key, result)
}

/// Turn a reconcile outcome into the next scheduling decision
fn schedule(
    queue: &WorkQueue,
    failures: &mut HashMap<ObjectKey, u32>,
    settings: &ControllerSettings,
    key: &ObjectKey,
    result: Result<Action>,
) {
    match result {
        Ok(Action::Requeue(delay)) => {
            failures.remove(key);
            debug!("Requeueing {} in {:?}", key, delay);
            queue.add_after(key.clone(), delay);
        }
        Ok(Action::AwaitChange) => {
            failures.remove(key);
        }
        Err(err) => {
            let attempts = failures.entry(key.clone()).or_insert(0);
            *attempts += 1;
            let delay = retry_delay(&err, *attempts, settings);

            RECONCILIATION_ERRORS
                .with_label_values(&[KIND_LABEL, err.metric_label()])
                .inc();
            warn!(
                "Reconcile of {} failed (attempt {}), retrying in {:?}: {}",
                key, attempts, delay, err
            );
            queue.add_after(key.clone(), delay);
        }
    }
}
