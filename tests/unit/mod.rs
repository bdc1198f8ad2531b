// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for contour-admission-webhook.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation through the public API.

#[path = "../common/mod.rs"]
mod common;

mod crd_tests {
    use crate::common::fixtures::HTTPProxyBuilder;
    use contour_admission_webhook::crd::KUBERNETES_INGRESS_CLASS_ANNOTATION;
    use std::collections::BTreeSet;

    #[test]
    fn test_annotation_overrides_class_field() {
        let proxy = HTTPProxyBuilder::new("foo")
            .ingress_class("internal")
            .class_annotation("public")
            .fqdn("a.example.com")
            .build();
        assert_eq!(proxy.ingress_class(), Some("public"));
    }

    #[test]
    fn test_legacy_annotation() {
        let proxy = HTTPProxyBuilder::new("foo")
            .annotation(KUBERNETES_INGRESS_CLASS_ANNOTATION, "public")
            .build();
        assert_eq!(proxy.ingress_class(), Some("public"));
    }

    #[test]
    fn test_hosts_are_normalized() {
        let proxy = HTTPProxyBuilder::new("foo").fqdn("WWW.Example.com.").build();
        assert_eq!(
            proxy.declared_hosts().unwrap(),
            BTreeSet::from(["www.example.com".to_string()])
        );
    }
}

mod config_tests {
    use contour_admission_webhook::config::Config;
    use std::time::Duration;

    #[test]
    fn test_deployment_config() {
        let config = Config::from_yaml(
            r#"
cache:
  cleanUpIntervalSecond: 60
  entryTtlSecond: 600
ingressClasses:
  - public
  - private
webhook:
  port: 8443
  tlsCertFile: /certs/tls.crt
  tlsKeyFile: /certs/tls.key
"#,
        )
        .unwrap();

        assert_eq!(config.cache.entry_ttl, Duration::from_secs(600));
        assert_eq!(config.cache.cleanup_interval, Duration::from_secs(60));
        assert!(config.ingress_classes.is_managed("public"));
        assert!(config.ingress_classes.is_managed("private"));
        assert!(!config.ingress_classes.is_managed("internal"));
        assert_eq!(config.webhook.port, 8443);
        assert!(config.controller.resync_interval < config.cache.entry_ttl);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = Config::from_yaml(
            r#"
cache:
  cleanUpIntervalSecond: 60
  entryTtlSecond: 600
  maxEntries: 10
ingressClasses: [public]
"#,
        );
        assert!(result.is_err());
    }
}

mod cache_tests {
    use contour_admission_webhook::cache::{ClaimKey, ClaimOutcome, Claimant, ConflictCache, ResourceRef};
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn test_same_host_in_different_classes_is_independent() {
        let cache = ConflictCache::new(Duration::from_secs(60));
        let now = Instant::now();
        let foo = Claimant::new(ResourceRef::new("ns", "foo"));
        let bar = Claimant::new(ResourceRef::new("ns", "bar"));

        assert_eq!(
            cache.try_claim(ClaimKey::new("a.example.com", "public"), foo, now),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            cache.try_claim(ClaimKey::new("a.example.com", "private"), bar, now),
            ClaimOutcome::Claimed
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_same_name_in_different_namespaces_is_a_different_owner() {
        let cache = ConflictCache::new(Duration::from_secs(60));
        let now = Instant::now();
        let key = ClaimKey::new("a.example.com", "public");
        cache.upsert(key.clone(), Claimant::new(ResourceRef::new("team-a", "web")), now);

        assert!(!cache.release(&key, &ResourceRef::new("team-b", "web")));
        assert_eq!(
            cache.lookup(&key).unwrap().owner(),
            &ResourceRef::new("team-a", "web")
        );
    }
}

mod webhook_tests {
    use crate::common::fixtures::{HTTPProxyBuilder, admission_review, proxy_json};
    use contour_admission_webhook::cache::{ClaimKey, Claimant, ConflictCache, ResourceRef};
    use contour_admission_webhook::config::IngressClasses;
    use contour_admission_webhook::webhooks::{AdmissionRequest, AdmissionReview, WebhookState, admit};
    use kube::core::DynamicObject;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn request(review: serde_json::Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(review).unwrap();
        review.try_into().unwrap()
    }

    fn state() -> WebhookState {
        let cache = ConflictCache::new(Duration::from_secs(60));
        cache.upsert(
            ClaimKey::new("a.example.com", "public"),
            Claimant::new(ResourceRef::new("ns", "foo")),
            Instant::now(),
        );
        WebhookState::new(Arc::new(cache), IngressClasses::new(["public"]), None)
    }

    #[test]
    fn test_scenario_a_decisions() {
        let state = state();

        let bar = HTTPProxyBuilder::new("bar")
            .ingress_class("public")
            .fqdn("a.example.com")
            .build();
        let result = admit(&state, &request(admission_review("CREATE", "bar", Some(proxy_json(&bar)))));
        assert!(!result.allowed);
        assert!(result.message.unwrap().contains("ns/foo"));

        let foo = HTTPProxyBuilder::new("foo")
            .ingress_class("public")
            .fqdn("a.example.com")
            .build();
        let result = admit(&state, &request(admission_review("UPDATE", "foo", Some(proxy_json(&foo)))));
        assert!(result.allowed);
    }

    #[test]
    fn test_class_from_annotation_is_enforced() {
        let bar = HTTPProxyBuilder::new("bar")
            .class_annotation("public")
            .fqdn("A.EXAMPLE.COM")
            .build();
        let result = admit(&state(), &request(admission_review("CREATE", "bar", Some(proxy_json(&bar)))));
        assert!(!result.allowed);
    }

    #[test]
    fn test_proxy_without_class_is_not_checked() {
        let bar = HTTPProxyBuilder::new("bar").fqdn("a.example.com").build();
        let result = admit(&state(), &request(admission_review("CREATE", "bar", Some(proxy_json(&bar)))));
        assert!(result.allowed);
    }

    #[test]
    fn test_included_proxy_is_allowed() {
        let child = HTTPProxyBuilder::new("child").ingress_class("public").build();
        let result = admit(&state(), &request(admission_review("CREATE", "child", Some(proxy_json(&child)))));
        assert!(result.allowed);
    }
}
