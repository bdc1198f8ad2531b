//! Conflict cache: the in-memory index of current virtual host claims.
//!
//! Maps `(virtual host, ingress class)` to the single HTTPProxy currently
//! allowed to use it. The reconciler is the only writer; the admission
//! webhook reads through [`ClaimLookup`].
//!
//! ## Concurrency
//!
//! Entries live in a [`DashMap`], which shards the key space over
//! independent `RwLock`s:
//! - lookups on different (or the same) keys run concurrently
//! - writers exclude readers only on the shard they touch
//! - [`ConflictCache::sweep`] locks one shard at a time, so a lookup waits
//!   at most for a single shard pass
//!
//! No operation performs I/O and none can fail.

mod sweeper;

pub use sweeper::run_sweeper;

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jiff::Timestamp;
use tokio::time::Instant;

// =============================================================================
// Identity
// =============================================================================

/// Namespaced identity of a resource (`namespace/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The resource holding (or asking for) a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimant {
    /// Identity used for ownership comparisons.
    pub resource: ResourceRef,
    /// Object UID, if known. Informational only.
    pub uid: Option<String>,
    /// Object creation timestamp, used to rank competing claims.
    pub created_at: Option<Timestamp>,
}

impl Claimant {
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource,
            uid: None,
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Whether this claimant takes precedence over `other` for a live claim.
    ///
    /// Older resources win. Equal or unknown creation times fall back to the
    /// lexicographic order of `namespace/name`; an unknown creation time
    /// always ranks after a known one.
    pub fn outranks(&self, other: &Claimant) -> bool {
        self.rank() < other.rank()
    }

    fn rank(&self) -> (bool, Option<Timestamp>, &ResourceRef) {
        (self.created_at.is_none(), self.created_at, &self.resource)
    }
}

impl fmt::Display for Claimant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.resource.fmt(f)
    }
}

// =============================================================================
// ClaimKey / ClaimEntry
// =============================================================================

/// A virtual host within an ingress class.
///
/// The host is lowercased and stripped of a trailing dot on construction,
/// so two spellings of the same name produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimKey {
    host: String,
    ingress_class: String,
}

impl ClaimKey {
    pub fn new(host: &str, ingress_class: impl Into<String>) -> Self {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        Self {
            host,
            ingress_class: ingress_class.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ingress_class(&self) -> &str {
        &self.ingress_class
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.host, self.ingress_class)
    }
}

/// Current owner of a [`ClaimKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEntry {
    pub claimant: Claimant,
    /// Last time a reconcile confirmed this claim.
    pub refreshed_at: Instant,
    /// `refreshed_at + ttl`; the sweeper evicts the entry from here on.
    pub expires_at: Instant,
}

impl ClaimEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    pub fn owner(&self) -> &ResourceRef {
        &self.claimant.resource
    }
}

/// Result of [`ConflictCache::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The key was unclaimed (or its entry had expired).
    Claimed,
    /// The claimant already owned the key; expiry was pushed forward.
    Refreshed,
    /// A live claim held by a lower-ranked resource was replaced.
    TookOver(Claimant),
    /// The key stays with a live claim held by a higher-ranked resource.
    Held(Claimant),
}

impl ClaimOutcome {
    /// Whether the claimant owns the key after the call.
    pub fn is_owned(&self) -> bool {
        !matches!(self, ClaimOutcome::Held(_))
    }
}

// =============================================================================
// ClaimLookup
// =============================================================================

/// Read-only view of the claim index.
///
/// The admission path only ever needs this; keeping it behind a trait lets
/// decision logic be exercised against any seeded index.
pub trait ClaimLookup: Send + Sync {
    fn lookup(&self, key: &ClaimKey) -> Option<ClaimEntry>;
}

// =============================================================================
// ConflictCache
// =============================================================================

/// Longest lifetime an entry may have between refreshes.
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Concurrent, TTL-bounded map of virtual host claims.
#[derive(Debug)]
pub struct ConflictCache {
    entries: DashMap<ClaimKey, ClaimEntry>,
    ttl: Duration,
}

impl ConflictCache {
    /// Create an empty cache whose entries live for `ttl` after each refresh.
    ///
    /// `ttl` is capped at [`MAX_ENTRY_TTL`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: ttl.min(MAX_ENTRY_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entry_for(&self, claimant: Claimant, now: Instant) -> ClaimEntry {
        ClaimEntry {
            claimant,
            refreshed_at: now,
            expires_at: now + self.ttl,
        }
    }

    /// Set or overwrite the entry for `key`, unconditionally.
    pub fn upsert(&self, key: ClaimKey, claimant: Claimant, now: Instant) {
        let entry = self.entry_for(claimant, now);
        self.entries.insert(key, entry);
    }

    /// Claim `key` for `claimant` unless a live, higher-ranked claim exists.
    ///
    /// The check and the write happen under the key's shard lock, so two
    /// resources racing for the same host always resolve the same way.
    pub fn try_claim(&self, key: ClaimKey, claimant: Claimant, now: Instant) -> ClaimOutcome {
        match self.entries.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(self.entry_for(claimant, now));
                ClaimOutcome::Claimed
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let outcome = if current.claimant.resource == claimant.resource {
                    ClaimOutcome::Refreshed
                } else if current.is_expired(now) {
                    ClaimOutcome::Claimed
                } else if claimant.outranks(&current.claimant) {
                    ClaimOutcome::TookOver(current.claimant.clone())
                } else {
                    return ClaimOutcome::Held(current.claimant.clone());
                };
                occupied.insert(self.entry_for(claimant, now));
                outcome
            }
        }
    }

    /// Remove the entry for `key`, if any.
    pub fn remove(&self, key: &ClaimKey) -> Option<ClaimEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove the entry for `key` only if `resource` still owns it.
    pub fn release(&self, key: &ClaimKey, resource: &ResourceRef) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.owner() == resource)
            .is_some()
    }

    /// Remove every entry owned by `resource`. Returns how many were removed.
    pub fn remove_all_owned_by(&self, resource: &ResourceRef) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.owner() != resource;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Current owner of `key`. Pure read.
    pub fn lookup(&self, key: &ClaimKey) -> Option<ClaimEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Keys currently owned by `resource`.
    pub fn keys_owned_by(&self, resource: &ResourceRef) -> Vec<ClaimKey> {
        self.entries
            .iter()
            .filter(|entry| entry.value().owner() == resource)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Evict every entry whose expiry is at or before `now`.
    /// Returns how many entries were evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClaimLookup for ConflictCache {
    fn lookup(&self, key: &ClaimKey) -> Option<ClaimEntry> {
        ConflictCache::lookup(self, key)
    }
}
