//! Test fixtures and builder patterns for HTTPProxy and AdmissionReview.

use contour_admission_webhook::crd::{
    CONTOUR_INGRESS_CLASS_ANNOTATION, HTTPProxy, HTTPProxySpec, VirtualHost,
};
use jiff::Timestamp;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::{PartialObjectMeta, PartialObjectMetaExt};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Builder for creating HTTPProxy test fixtures.
///
/// # Example
/// ```
/// let proxy = HTTPProxyBuilder::new("foo")
///     .namespace("ns")
///     .ingress_class("public")
///     .fqdn("a.example.com")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct HTTPProxyBuilder {
    name: String,
    namespace: String,
    fqdn: Option<String>,
    ingress_class_name: Option<String>,
    annotations: BTreeMap<String, String>,
    uid: Option<String>,
    created_at: Option<i64>,
    generation: Option<i64>,
}

impl HTTPProxyBuilder {
    /// Create a new builder with the given proxy name, in namespace `ns`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: Some(format!("uid-{}", name)),
            name,
            namespace: "ns".to_string(),
            fqdn: None,
            ingress_class_name: None,
            annotations: BTreeMap::new(),
            created_at: None,
            generation: None,
        }
    }

    /// Set the namespace for the proxy.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set `spec.virtualhost.fqdn`.
    pub fn fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = Some(fqdn.into());
        self
    }

    /// Set `spec.ingressClassName`.
    pub fn ingress_class(mut self, class: impl Into<String>) -> Self {
        self.ingress_class_name = Some(class.into());
        self
    }

    /// Set the `projectcontour.io/ingress.class` annotation.
    pub fn class_annotation(self, class: impl Into<String>) -> Self {
        self.annotation(CONTOUR_INGRESS_CLASS_ANNOTATION, class)
    }

    /// Add an annotation.
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Set the creation timestamp (seconds since the epoch).
    pub fn created_at(mut self, seconds: i64) -> Self {
        self.created_at = Some(seconds);
        self
    }

    /// Set `metadata.generation`.
    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Build the HTTPProxy.
    pub fn build(self) -> HTTPProxy {
        HTTPProxy {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                annotations: if self.annotations.is_empty() {
                    None
                } else {
                    Some(self.annotations)
                },
                creation_timestamp: self
                    .created_at
                    .and_then(|s| Timestamp::from_second(s).ok())
                    .map(Time),
                generation: self.generation,
                ..Default::default()
            },
            spec: HTTPProxySpec {
                virtualhost: self.fqdn.map(|fqdn| VirtualHost { fqdn: Some(fqdn) }),
                ingress_class_name: self.ingress_class_name,
            },
        }
    }
}

/// Metadata-only view of an HTTPProxy, as delivered by a metadata watch.
pub fn metadata_of(proxy: &HTTPProxy) -> PartialObjectMeta<HTTPProxy> {
    proxy.metadata.clone().into_response_partial()
}

/// Build an `admission.k8s.io/v1` AdmissionReview for an HTTPProxy.
///
/// `object` is serialized as-is; pass `None` for DELETE requests.
pub fn admission_review(operation: &str, name: &str, object: Option<Value>) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": format!("uid-{}-{}", operation.to_lowercase(), name),
            "kind": {"group": "projectcontour.io", "version": "v1", "kind": "HTTPProxy"},
            "resource": {"group": "projectcontour.io", "version": "v1", "resource": "httpproxies"},
            "name": name,
            "namespace": "ns",
            "operation": operation,
            "userInfo": {"username": "system:serviceaccount:ns:deployer"},
            "object": object,
            "dryRun": false
        }
    })
}

/// Serialize an HTTPProxy with its apiVersion/kind for an admission request.
pub fn proxy_json(proxy: &HTTPProxy) -> Value {
    let mut value = serde_json::to_value(proxy).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("apiVersion".to_string(), json!("projectcontour.io/v1"));
        map.insert("kind".to_string(), json!("HTTPProxy"));
    }
    value
}
