//! Controller keeping the conflict cache in sync with HTTPProxy objects.
//!
//! A `kube::runtime::Controller` over the HTTPProxy metadata watch runs one
//! reconcile at a time per HTTPProxy; each reconcile syncs that proxy's
//! claims with the cache.

pub mod context;
pub mod error;
pub mod initial_sync;
pub mod proxy_api;
pub mod reconciler;
