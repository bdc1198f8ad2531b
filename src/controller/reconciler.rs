//! Reconciliation of HTTPProxy claims.
//!
//! A reconcile makes the cache reflect what one HTTPProxy currently declares:
//! it claims (or refreshes) every virtual host the proxy asks for, and
//! releases the claims it no longer asks for. A proxy that is gone, or whose
//! spec cannot be read, holds nothing.
//!
//! The controller watches HTTPProxy metadata only; each reconcile reads the
//! full object through [`ProxyApi`](crate::controller::proxy_api::ProxyApi).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use jiff::Timestamp;
use kube::core::PartialObjectMeta;
use kube::runtime::controller::Action;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{ClaimKey, ClaimOutcome, ResourceRef};
use crate::config::IngressClasses;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{HTTPProxy, HostError, identity};

/// Event reason for a claim held by another HTTPProxy
pub const CONFLICT_REASON: &str = "VirtualHostConflict";
/// Event reason for a virtual host that cannot be claimed
pub const INVALID_HOST_REASON: &str = "InvalidVirtualHost";

/// Claim keys an HTTPProxy asks for.
///
/// Proxies without an ingress class, or with a class that is not managed,
/// ask for nothing.
pub fn desired_claims(
    proxy: &HTTPProxy,
    ingress_classes: &IngressClasses,
) -> std::result::Result<BTreeSet<ClaimKey>, HostError> {
    let Some(class) = proxy.ingress_class() else {
        return Ok(BTreeSet::new());
    };
    if !ingress_classes.is_managed(class) {
        return Ok(BTreeSet::new());
    }
    Ok(proxy
        .declared_hosts()?
        .iter()
        .map(|host| ClaimKey::new(host, class))
        .collect())
}

/// Reconcile the claims of one HTTPProxy
pub async fn reconcile(obj: Arc<PartialObjectMeta<HTTPProxy>>, ctx: Arc<Context>) -> Result<Action> {
    let resource = identity(&*obj, None);
    let start_time = Instant::now();

    let result = sync_claims(&resource, &ctx).await;

    // Record metrics
    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_reconcile(start_time.elapsed().as_secs_f64());
    }

    let will_retry = matches!(&result, Err(e) if e.is_retryable());
    if !will_retry {
        ctx.reset_retries(&resource);
        ctx.initial_sync.settled(&resource);
        if let Some(ref health_state) = ctx.health_state {
            let now = u64::try_from(Timestamp::now().as_second()).unwrap_or(0);
            health_state.last_reconcile.store(now, Ordering::Relaxed);
        }
    }

    result
}

async fn sync_claims(resource: &ResourceRef, ctx: &Context) -> Result<Action> {
    let proxy = match ctx.api.get(resource).await {
        Ok(Some(proxy)) => proxy,
        Ok(None) => {
            let removed = ctx.cache.remove_all_owned_by(resource);
            debug!(resource = %resource, removed, "HTTPProxy not found, released claims");
            return Ok(Action::await_change());
        }
        Err(Error::Kube(kube::Error::SerdeError(e))) => {
            warn!(resource = %resource, error = %e, "HTTPProxy could not be decoded, releasing claims");
            ctx.cache.remove_all_owned_by(resource);
            return Err(Error::Kube(kube::Error::SerdeError(e)));
        }
        Err(e) => return Err(e),
    };

    let desired = match desired_claims(&proxy, &ctx.ingress_classes) {
        Ok(desired) => desired,
        Err(e) => {
            ctx.cache.remove_all_owned_by(resource);
            ctx.api
                .publish_warning(&proxy, INVALID_HOST_REASON, e.to_string())
                .await;
            return Err(e.into());
        }
    };

    let claimant = proxy.claimant(Some(&resource.namespace));
    let now = Instant::now();

    for key in &desired {
        match ctx.cache.try_claim(key.clone(), claimant.clone(), now) {
            ClaimOutcome::Claimed => debug!(resource = %resource, claim = %key, "Claimed virtual host"),
            ClaimOutcome::Refreshed => {}
            ClaimOutcome::TookOver(previous) => {
                info!(resource = %resource, claim = %key, previous = %previous, "Took over virtual host from newer HTTPProxy");
            }
            ClaimOutcome::Held(owner) => {
                warn!(resource = %resource, claim = %key, owner = %owner, "Virtual host already claimed");
                if let Some(ref state) = ctx.health_state {
                    state.metrics.record_conflict();
                }
                let note = format!(
                    "virtual host {} in ingress class {} is already used by HTTPProxy {}",
                    key.host(),
                    key.ingress_class(),
                    owner
                );
                ctx.api.publish_warning(&proxy, CONFLICT_REASON, note).await;
            }
        }
    }

    for key in ctx.cache.keys_owned_by(resource) {
        if !desired.contains(&key) && ctx.cache.release(&key, resource) {
            debug!(resource = %resource, claim = %key, "Released virtual host");
        }
    }

    if let Some(ref state) = ctx.health_state {
        state.metrics.set_cache_entries(ctx.cache.len());
    }

    if desired.is_empty() {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.resync_interval))
    }
}

/// Drop everything a deleted HTTPProxy held.
///
/// Called from the watch stream on delete notifications and for scheduled
/// reconciles whose object has already left the store.
pub fn release_deleted(resource: &ResourceRef, ctx: &Context) {
    let removed = ctx.cache.remove_all_owned_by(resource);
    ctx.reset_retries(resource);
    ctx.initial_sync.settled(resource);
    if let Some(ref state) = ctx.health_state {
        state.metrics.set_cache_entries(ctx.cache.len());
    }
    debug!(resource = %resource, removed, "HTTPProxy deleted, released claims");
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<PartialObjectMeta<HTTPProxy>>, error: &Error, ctx: Arc<Context>) -> Action {
    let resource = identity(&*obj, None);

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error();
    }

    if error.is_retryable() {
        let delay = ctx.next_retry_delay(&resource);
        warn!(resource = %resource, error = %error, retry_in_secs = delay.as_secs(), "Retryable error, will retry");
        Action::requeue(delay)
    } else {
        error!(resource = %resource, error = %error, "Non-retryable error");
        Action::await_change()
    }
}
