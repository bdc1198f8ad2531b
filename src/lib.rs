//! contour-admission-webhook library crate
//!
//! Keeps an in-memory index of which HTTPProxy claims each virtual host per
//! ingress class, and serves a validating admission webhook that rejects
//! HTTPProxies trying to reuse a host claimed by another one.

pub mod cache;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod webhooks;

pub use cache::{ClaimKey, ClaimLookup, Claimant, ConflictCache, ResourceRef};
pub use config::Config;
pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    run_webhook_server,
};

use std::sync::Arc;

use futures::{Stream, StreamExt, TryStreamExt};
use kube::core::PartialObjectMeta;
use kube::runtime::controller::{self as kube_controller, Action};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{Config as WatcherConfig, Event};
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use controller::context::Context;
use controller::error::Error;
use controller::reconciler::{error_policy, reconcile, release_deleted};
use crd::{HTTPProxy, identity};

/// HTTPProxy as delivered by the metadata watch
pub type ProxyMeta = PartialObjectMeta<HTTPProxy>;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Apply the side effects a raw watch event has outside of reconciles.
///
/// Objects from the initial list are registered with the initial-sync gate
/// before the controller sees them, so the gate cannot open ahead of their
/// first reconcile. Deletes release claims immediately; the controller
/// itself never reconciles an object that has left the store.
pub fn observe_watch_event(event: &Event<ProxyMeta>, ctx: &Context) {
    match event {
        Event::Init => debug!("Watch (re)list started"),
        Event::InitApply(obj) => ctx.initial_sync.expect(identity(obj, None)),
        Event::InitDone => {
            debug!("Watch (re)list complete");
            ctx.initial_sync.list_complete();
        }
        Event::Apply(_) => {}
        Event::Delete(obj) => release_deleted(&identity(obj, None), ctx),
    }
}

/// Create the reflector-backed trigger stream for the controller.
///
/// This creates a stream that:
/// - Maintains the reflector store the controller reads objects from
/// - Feeds raw events to [`observe_watch_event`]
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
fn create_filtered_stream<S>(
    events: S,
    ctx: Arc<Context>,
) -> (
    Store<ProxyMeta>,
    impl Stream<Item = Result<ProxyMeta, watcher::Error>> + Send + 'static,
)
where
    S: Stream<Item = Result<Event<ProxyMeta>, watcher::Error>> + Send + 'static,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, events)
        .inspect_ok(move |event| observe_watch_event(event, &ctx))
        .applied_objects()
        .predicate_filter(predicates::generation, Default::default());
    (reader, stream)
}

fn log_reconcile_result(
    result: Result<(ObjectRef<ProxyMeta>, Action), kube_controller::Error<Error, watcher::Error>>,
    ctx: &Context,
) {
    match result {
        Ok((obj, _action)) => debug!("Reconciled: {}", obj),
        // A requeue fired after the object left the store.
        Err(kube_controller::Error::ObjectNotFound(obj_ref)) => {
            let namespace = obj_ref.namespace.clone().unwrap_or_default();
            release_deleted(&ResourceRef::new(namespace, obj_ref.name.clone()), ctx);
        }
        // Already logged by the error policy.
        Err(kube_controller::Error::ReconcilerFailed(_, _)) => {}
        Err(e) => error!("Controller error: {:?}", e),
    }
}

/// Run the HTTPProxy controller over an arbitrary stream of watch events
/// until `shutdown` is cancelled.
///
/// At most `workers` HTTPProxies are reconciled concurrently; the controller
/// never runs two reconciles for the same object at once and merges
/// triggers that arrive while one is pending.
pub async fn run_controller_for_stream<S>(
    events: S,
    ctx: Arc<Context>,
    workers: u16,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Event<ProxyMeta>, watcher::Error>> + Send + 'static,
{
    info!(workers, "Starting controller for HTTPProxy resources");

    let (reader, proxy_stream) = create_filtered_stream(events, ctx.clone());

    Controller::for_stream(proxy_stream, reader)
        .with_config(kube_controller::Config::default().concurrency(workers))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| {
            log_reconcile_result(result, &ctx);
            futures::future::ready(())
        })
        .await;

    info!("Controller stopped");
}

/// Run the HTTPProxy controller until `shutdown` is cancelled.
///
/// Watches HTTPProxy metadata through `api` (namespaced or cluster-wide, see
/// [`scoped_api`]). Only metadata is watched; each reconcile fetches the
/// object it needs, so one undecodable HTTPProxy cannot stall the watch.
pub async fn run_controller(
    api: Api<HTTPProxy>,
    ctx: Arc<Context>,
    workers: u16,
    shutdown: CancellationToken,
) {
    let events = metadata_watcher(api, default_watcher_config()).default_backoff();
    run_controller_for_stream(events, ctx.clone(), workers, shutdown).await;
    if !ctx.initial_sync.is_synced() {
        warn!("Controller stopped before the initial sync completed");
    }
}
