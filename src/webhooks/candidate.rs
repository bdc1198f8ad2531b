//! The HTTPProxy under admission, as the policies see it.

use crate::cache::ResourceRef;
use crate::crd::HTTPProxy;

/// A create or update request for an HTTPProxy
#[derive(Debug, Clone)]
pub struct Candidate {
    pub proxy: HTTPProxy,
    /// Identity used for claim ownership
    pub resource: ResourceRef,
}

impl Candidate {
    /// Build a candidate from the object in an admission request.
    ///
    /// Objects in CREATE requests may omit their namespace (and, with
    /// `generateName`, their name); the request coordinates fill the gap.
    pub fn new(proxy: HTTPProxy, namespace: Option<&str>, name: &str) -> Self {
        let resource = ResourceRef::new(
            proxy
                .metadata
                .namespace
                .clone()
                .or_else(|| namespace.map(str::to_string))
                .unwrap_or_default(),
            proxy
                .metadata
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| name.to_string()),
        );
        Self { proxy, resource }
    }
}
