//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to every reconcile:
//! the claim cache, the HTTPProxy API and the configured ingress classes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::{ConflictCache, ResourceRef};
use crate::config::IngressClasses;
use crate::controller::initial_sync::InitialSync;
use crate::controller::proxy_api::ProxyApi;
use crate::health::HealthState;

/// First retry delay after a failed reconcile
pub const RETRY_BASE: Duration = Duration::from_secs(1);
/// Upper bound on the retry delay
pub const RETRY_MAX: Duration = Duration::from_secs(300);

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Claim index shared with the admission webhook
    pub cache: Arc<ConflictCache>,
    /// HTTPProxy reads and event publishing
    pub api: Arc<dyn ProxyApi>,
    /// Ingress classes whose claims are enforced
    pub ingress_classes: IngressClasses,
    /// How often held claims are refreshed
    pub resync_interval: Duration,
    /// Optional health state for metrics
    pub health_state: Option<Arc<HealthState>>,
    /// Gate opened once the initial list has been reconciled
    pub initial_sync: Arc<InitialSync>,
    /// Consecutive failed reconciles per HTTPProxy
    pub(crate) failures: Arc<DashMap<ResourceRef, u32>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        cache: Arc<ConflictCache>,
        api: Arc<dyn ProxyApi>,
        ingress_classes: IngressClasses,
        resync_interval: Duration,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            cache,
            api,
            ingress_classes,
            resync_interval,
            health_state,
            initial_sync: Arc::new(InitialSync::new()),
            failures: Arc::new(DashMap::new()),
        }
    }

    /// Count another failure for `resource` and return how long to wait
    /// before retrying: [`RETRY_BASE`] doubled per consecutive failure,
    /// capped at [`RETRY_MAX`].
    pub fn next_retry_delay(&self, resource: &ResourceRef) -> Duration {
        let mut attempts = self.failures.entry(resource.clone()).or_insert(0);
        let delay = RETRY_BASE
            .saturating_mul(2u32.saturating_pow(*attempts))
            .min(RETRY_MAX);
        *attempts = attempts.saturating_add(1);
        delay
    }

    /// Forget the failure streak of `resource`.
    pub fn reset_retries(&self, resource: &ResourceRef) {
        self.failures.remove(resource);
    }
}
