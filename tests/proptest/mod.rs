// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for contour-admission-webhook.
//!
//! Uses proptest to generate random inputs and verify invariants.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use proptest::prelude::*;
use tokio::time::Instant;

use common::fixtures::{HTTPProxyBuilder, admission_review, proxy_json};
use contour_admission_webhook::cache::{ClaimKey, Claimant, ConflictCache, ResourceRef};
use contour_admission_webhook::config::IngressClasses;
use contour_admission_webhook::crd::normalize_host;
use contour_admission_webhook::webhooks::{AdmissionReview, WebhookState, admit};
use kube::core::DynamicObject;

/// Strategy for generating valid DNS labels.
fn label() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?"
}

/// Strategy for generating valid hostnames (2-4 labels).
fn hostname() -> impl Strategy<Value = String> {
    prop::collection::vec(label(), 2..=4).prop_map(|labels| labels.join("."))
}

/// Strategy for randomizing the case of a string.
fn recase(s: String) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<bool>(), s.len()).prop_map(move |upper| {
        s.chars()
            .zip(upper)
            .map(|(c, u)| if u { c.to_ascii_uppercase() } else { c })
            .collect()
    })
}

/// Strategy for competing claimants: distinct names, optional creation times.
fn claimants() -> impl Strategy<Value = Vec<Claimant>> {
    prop::collection::btree_map("[a-z]{1,6}", prop::option::of(0i64..1_000), 2..8).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|(name, created)| {
                    let claimant = Claimant::new(ResourceRef::new("ns", name));
                    match created {
                        Some(s) => claimant.with_created_at(Timestamp::from_second(s).unwrap()),
                        None => claimant,
                    }
                })
                .collect()
        },
    )
}

fn decide(state: &WebhookState, name: &str, class: &str, host: &str) -> bool {
    let proxy = HTTPProxyBuilder::new(name)
        .ingress_class(class)
        .fqdn(host)
        .build();
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_value(admission_review("CREATE", name, Some(proxy_json(&proxy)))).unwrap();
    admit(state, &review.try_into().unwrap()).allowed
}

proptest! {
    /// Normalizing an already normalized host changes nothing.
    #[test]
    fn normalize_is_idempotent(host in hostname()) {
        let once = normalize_host(&host).unwrap();
        prop_assert_eq!(normalize_host(&once).unwrap(), once);
    }

    /// Hosts differing only in case (or a trailing dot) map to the same claim.
    #[test]
    fn claim_keys_ignore_case(host in hostname().prop_flat_map(|h| (Just(h.clone()), recase(h)))) {
        let (lower, mixed) = host;
        prop_assert_eq!(
            ClaimKey::new(&lower, "public"),
            ClaimKey::new(&format!("{mixed}."), "public")
        );
    }

    /// Whatever order competing reconciles run in, the same claimant ends up
    /// owning the host: the one that outranks every other.
    #[test]
    fn claim_winner_is_order_independent(
        order in claimants().prop_flat_map(|c| Just(c).prop_shuffle())
    ) {
        let cache = ConflictCache::new(Duration::from_secs(60));
        let key = ClaimKey::new("a.example.com", "public");
        let now = Instant::now();
        for claimant in &order {
            cache.try_claim(key.clone(), claimant.clone(), now);
        }

        let winner = order
            .iter()
            .find(|c| order.iter().all(|other| other == *c || c.outranks(other)))
            .unwrap();
        let found = cache.lookup(&key).unwrap();
        prop_assert_eq!(found.owner(), &winner.resource);
        prop_assert_eq!(cache.len(), 1);
    }

    /// Requests for unmanaged classes are admitted whatever the cache holds.
    #[test]
    fn unmanaged_classes_always_pass(
        host in hostname(),
        class in "[a-z]{3,10}".prop_filter("managed", |c| c != "public"),
    ) {
        let cache = ConflictCache::new(Duration::from_secs(60));
        let now = Instant::now();
        cache.upsert(ClaimKey::new(&host, "public"), Claimant::new(ResourceRef::new("ns", "foo")), now);
        cache.upsert(ClaimKey::new(&host, &class), Claimant::new(ResourceRef::new("ns", "foo")), now);
        let state = WebhookState::new(Arc::new(cache), IngressClasses::new(["public"]), None);

        prop_assert!(decide(&state, "bar", &class, &host));
        prop_assert!(!decide(&state, "bar", "public", &host));
    }

    /// A sweep evicts an entry exactly when its TTL has elapsed.
    #[test]
    fn sweep_respects_ttl(ttl_ms in 1u64..100_000, elapsed_ms in 0u64..200_000) {
        let ttl = Duration::from_millis(ttl_ms);
        let cache = ConflictCache::new(ttl);
        let key = ClaimKey::new("a.example.com", "public");
        let t0 = Instant::now();
        cache.upsert(key.clone(), Claimant::new(ResourceRef::new("ns", "foo")), t0);

        let evicted = cache.sweep(t0 + Duration::from_millis(elapsed_ms));
        prop_assert_eq!(evicted == 1, elapsed_ms >= ttl_ms);
        prop_assert_eq!(cache.lookup(&key).is_none(), elapsed_ms >= ttl_ms);
    }
}
