//! Access to HTTPProxy objects on the API server.
//!
//! The reconciler only needs point reads and event publishing, so both sit
//! behind [`ProxyApi`] and tests can drive it without a cluster.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::cache::ResourceRef;
use crate::controller::error::Result;
use crate::crd::HTTPProxy;

/// Controller name reported on published events
pub const REPORTER_NAME: &str = "contour-admission-webhook";

/// Trait abstracting Kubernetes client operations for HTTPProxy
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProxyApi: Send + Sync {
    /// Fetch the current state of an HTTPProxy.
    ///
    /// Returns `Ok(None)` when the object no longer exists.
    async fn get(&self, resource: &ResourceRef) -> Result<Option<HTTPProxy>>;

    /// Attach a Warning event to an HTTPProxy. Failures are logged, not returned.
    async fn publish_warning(&self, proxy: &HTTPProxy, reason: &str, note: String);
}

/// [`ProxyApi`] backed by a live cluster
#[derive(Clone)]
pub struct KubeProxyApi {
    client: Client,
    reporter: Reporter,
}

impl KubeProxyApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: REPORTER_NAME.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }
}

#[async_trait]
impl ProxyApi for KubeProxyApi {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<HTTPProxy>> {
        let api: Api<HTTPProxy> = Api::namespaced(self.client.clone(), &resource.namespace);
        Ok(api.get_opt(&resource.name).await?)
    }

    async fn publish_warning(&self, proxy: &HTTPProxy, reason: &str, note: String) {
        let object_ref = proxy.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note: Some(note),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}
