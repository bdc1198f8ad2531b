//! HTTPProxy Custom Resource (Contour, `projectcontour.io/v1`).
//!
//! Only the fields that take part in virtual host claims are modelled;
//! everything else in the object (routes, includes, TLS, status) is ignored
//! on deserialization. The CRD itself is installed by Contour.

use std::collections::BTreeSet;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{Claimant, ResourceRef};

/// Contour's own ingress class annotation. Takes precedence over the others.
pub const CONTOUR_INGRESS_CLASS_ANNOTATION: &str = "projectcontour.io/ingress.class";
/// Legacy Kubernetes ingress class annotation.
pub const KUBERNETES_INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Maximum length of a DNS name (RFC 1123)
const MAX_HOST_LEN: usize = 253;
/// Maximum length of a single DNS label
const MAX_LABEL_LEN: usize = 63;

/// HTTPProxy as served by Contour.
///
/// Example:
/// ```yaml
/// apiVersion: projectcontour.io/v1
/// kind: HTTPProxy
/// metadata:
///   name: foo
///   namespace: ns
/// spec:
///   ingressClassName: public
///   virtualhost:
///     fqdn: a.example.com
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    plural = "httpproxies",
    shortname = "proxy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPProxySpec {
    /// Root proxies declare a virtual host; included (child) proxies do not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtualhost: Option<VirtualHost>,

    /// Ingress class, used when neither class annotation is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
}

/// Virtual host of a root HTTPProxy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    /// Fully qualified domain name; may start with a `*.` wildcard label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

/// Reasons a declared virtual host cannot be claimed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("spec.virtualhost.fqdn is required on a root HTTPProxy")]
    Missing,

    #[error("spec.virtualhost.fqdn must not be empty")]
    Empty,

    #[error("virtual host {host:?} is longer than {MAX_HOST_LEN} characters")]
    TooLong { host: String },

    #[error("virtual host {host:?} has an invalid DNS label {label:?}")]
    InvalidLabel { host: String, label: String },
}

/// Normalize a declared virtual host into its canonical claim form.
///
/// Lowercases, strips surrounding whitespace and one trailing dot, then
/// checks RFC 1123 label syntax. A leading `*` label is accepted as a
/// wildcard when at least one more label follows.
pub fn normalize_host(raw: &str) -> Result<String, HostError> {
    let trimmed = raw.trim();
    let host = trimmed
        .strip_suffix('.')
        .unwrap_or(trimmed)
        .to_ascii_lowercase();

    if host.is_empty() {
        return Err(HostError::Empty);
    }
    if host.len() > MAX_HOST_LEN {
        return Err(HostError::TooLong { host });
    }

    let label_count = host.split('.').count();
    for (index, label) in host.split('.').enumerate() {
        let wildcard = index == 0 && label == "*" && label_count > 1;
        if !wildcard && !is_valid_label(label) {
            return Err(HostError::InvalidLabel {
                label: label.to_string(),
                host,
            });
        }
    }

    Ok(host)
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Namespaced identity of an HTTPProxy, full or metadata-only.
///
/// `fallback_namespace` is used when the object carries no namespace,
/// which happens for objects embedded in admission requests.
pub fn identity<K: ResourceExt>(obj: &K, fallback_namespace: Option<&str>) -> ResourceRef {
    let namespace = obj
        .namespace()
        .or_else(|| fallback_namespace.map(str::to_string))
        .unwrap_or_default();
    ResourceRef::new(namespace, obj.name_any())
}

impl HTTPProxy {
    /// Namespaced identity of this proxy. See [`identity`].
    pub fn resource_ref(&self, fallback_namespace: Option<&str>) -> ResourceRef {
        identity(self, fallback_namespace)
    }

    /// Claimant record for this proxy (identity, UID, creation time).
    pub fn claimant(&self, fallback_namespace: Option<&str>) -> Claimant {
        Claimant {
            resource: self.resource_ref(fallback_namespace),
            uid: self.uid(),
            created_at: self.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }

    /// Effective ingress class.
    ///
    /// First non-empty value of the `projectcontour.io/ingress.class`
    /// annotation, the `kubernetes.io/ingress.class` annotation, then
    /// `spec.ingressClassName`.
    pub fn ingress_class(&self) -> Option<&str> {
        let annotations = self.annotations();
        [
            annotations
                .get(CONTOUR_INGRESS_CLASS_ANNOTATION)
                .map(String::as_str),
            annotations
                .get(KUBERNETES_INGRESS_CLASS_ANNOTATION)
                .map(String::as_str),
            self.spec.ingress_class_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|class| !class.is_empty())
    }

    /// Normalized virtual hosts this proxy claims.
    ///
    /// Empty for included proxies without a `virtualhost` block.
    pub fn declared_hosts(&self) -> Result<BTreeSet<String>, HostError> {
        let Some(virtualhost) = &self.spec.virtualhost else {
            return Ok(BTreeSet::new());
        };
        let fqdn = virtualhost.fqdn.as_deref().ok_or(HostError::Missing)?;
        Ok(BTreeSet::from([normalize_host(fqdn)?]))
    }
}
