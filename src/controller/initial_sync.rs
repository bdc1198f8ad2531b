//! Tracks whether the cache has been built from the initial HTTPProxy list.
//!
//! The watcher reports every object of its first list before signalling the
//! end of the list. Each of those objects is expected to finish one reconcile
//! before the cache is considered warm; only then may admission start.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::info;

use crate::cache::ResourceRef;

#[derive(Default)]
struct Pending {
    list_complete: bool,
    identities: HashSet<ResourceRef>,
    settled: HashSet<ResourceRef>,
}

/// One-shot gate that opens once the initial list is fully reconciled
pub struct InitialSync {
    pending: Mutex<Pending>,
    synced: watch::Sender<bool>,
}

impl Default for InitialSync {
    fn default() -> Self {
        Self::new()
    }
}

impl InitialSync {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            synced: watch::Sender::new(false),
        }
    }

    /// Record an object delivered by the initial list.
    ///
    /// Objects already settled are not waited for again when the watch
    /// relists before the gate opens.
    pub fn expect(&self, resource: ResourceRef) {
        if self.is_synced() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.list_complete && !pending.settled.contains(&resource) {
            pending.identities.insert(resource);
        }
    }

    /// The initial list has been fully delivered.
    pub fn list_complete(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.list_complete = true;
        self.open_if_done(&mut pending);
    }

    /// A reconcile for `resource` finished with a non-retry outcome, or the
    /// object was deleted.
    pub fn settled(&self, resource: &ResourceRef) {
        if self.is_synced() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.identities.remove(resource);
        pending.settled.insert(resource.clone());
        self.open_if_done(&mut pending);
    }

    fn open_if_done(&self, pending: &mut Pending) {
        if pending.list_complete && pending.identities.is_empty() && !self.is_synced() {
            info!("Initial sync complete");
            pending.settled.clear();
            self.synced.send_replace(true);
        }
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolve once the initial sync has completed.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|synced| *synced).await;
    }
}
