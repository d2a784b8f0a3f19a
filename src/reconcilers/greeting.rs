//! Reconciliation logic for GreetingService resources
//!
//! Every step is idempotent. The GreetingService is read fresh on each call,
//! so a burst of edits is reconciled against whatever spec is current when
//! the call runs.

use kube::ResourceExt;
use tracing::{info, warn};

use crate::adapters::{build_deployment, build_service};
use crate::controllers::{Action, Context};
use crate::crd::{validate, GreetingService};
use crate::reconcilers::status;
use crate::store::ObjectKey;
use crate::{Error, Result};

/// Condition reason for a spec that fails validation
const INVALID_SPEC: &str = "InvalidSpec";

/// Condition reason for a store failure during an attempt
const RECONCILE_ERROR: &str = "ReconcileError";

/// Bring the owned objects of the GreetingService at `key` in line with its
/// spec and report the outcome in its status.
///
/// Failures are recorded as phase `Failed` on a best-effort basis and the
/// original error is returned for the dispatcher to retry. Owned objects
/// are never deleted here; owner references let the API server collect them
/// with their parent.
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<Action> {
    let Some(greeting) = ctx.store.get_greeting(key).await? else {
        info!("GreetingService {} no longer exists, nothing to do", key);
        status::forget(key);
        return Ok(Action::await_change());
    };

    if greeting.metadata.deletion_timestamp.is_some() {
        info!("GreetingService {} is being deleted, skipping", key);
        return Ok(Action::await_change());
    }

    if let Err(e) = validate(&greeting.spec) {
        report_failure(&greeting, ctx, INVALID_SPEC, &e).await;
        return Err(e);
    }

    if let Err(e) = converge(key, &greeting, ctx).await {
        report_failure(&greeting, ctx, RECONCILE_ERROR, &e).await;
        return Err(e);
    }

    Ok(Action::requeue(ctx.settings.requeue_interval))
}

/// Apply both owned objects and write the resulting status
async fn converge(key: &ObjectKey, greeting: &GreetingService, ctx: &Context) -> Result<()> {
    let store = ctx.store.as_ref();

    let deployment = store.apply_deployment(&build_deployment(greeting)).await?;
    info!("Reconciled Deployment {}", key);

    let service = store.apply_service(&build_service(greeting)).await?;
    info!("Reconciled Service {}", key);

    let next = status::ready_status(greeting, &deployment, &service);
    status::write(store, greeting, next).await?;
    Ok(())
}

/// Surface a failed attempt through the status subresource.
///
/// `err` is what gets retried, so a failed status write is only logged.
async fn report_failure(greeting: &GreetingService, ctx: &Context, reason: &str, err: &Error) {
    let message = match err {
        Error::Validation(msg) => msg.clone(),
        other => other.to_string(),
    };
    warn!(
        "GreetingService {}/{} failed ({}): {}",
        greeting.namespace().unwrap_or_default(),
        greeting.name_any(),
        reason,
        message
    );

    let failed = status::failed_status(greeting, reason, &message);
    if let Err(e) = status::write(ctx.store.as_ref(), greeting, failed).await {
        warn!("Could not record failure in status: {}", e);
    }
}
