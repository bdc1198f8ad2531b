//! Admission webhook server.
//!
//! Serves `POST /validate-httpproxy` over TLS for a
//! ValidatingWebhookConfiguration that targets `httpproxies` CREATE and
//! UPDATE operations in `projectcontour.io/v1`.
//!
//! The server must only be started once the claim cache has completed its
//! initial sync; until then the readiness probe keeps the pod out of the
//! webhook Service.

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::ClaimLookup;
use crate::config::{IngressClasses, WebhookConfig};
use crate::crd::HTTPProxy;
use crate::health::HealthState;
use crate::webhooks::candidate::Candidate;
use crate::webhooks::policies::{ValidationContext, ValidationResult, validate_all};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Route the ValidatingWebhookConfiguration points at
pub const VALIDATE_PATH: &str = "/validate-httpproxy";

/// Denial reason for requests that carry no decodable HTTPProxy
pub const INVALID_REQUEST_REASON: &str = "InvalidRequest";
/// Denial reason when validation itself fails
pub const INTERNAL_ERROR_REASON: &str = "InternalError";
/// Metric reason for admitted requests
const ALLOWED_REASON: &str = "Allowed";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Claim index maintained by the controller
    pub claims: Arc<dyn ClaimLookup>,
    /// Ingress classes whose claims are enforced
    pub ingress_classes: IngressClasses,
    /// Optional health state for metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(
        claims: Arc<dyn ClaimLookup>,
        ingress_classes: IngressClasses,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            claims,
            ingress_classes,
            health_state,
        }
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason(
    request: &AdmissionRequest<DynamicObject>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_httpproxy))
        .with_state(state)
}

/// Decide on an admission request.
///
/// Pure with respect to the cache: nothing is written on this path.
pub fn admit(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> ValidationResult {
    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        return ValidationResult::allowed();
    }

    let Some(object) = &request.object else {
        return ValidationResult::denied(INVALID_REQUEST_REASON, "Missing object in request");
    };
    let proxy: HTTPProxy = match object.clone().try_parse() {
        Ok(proxy) => proxy,
        Err(e) => {
            return ValidationResult::denied(
                INVALID_REQUEST_REASON,
                &format!("Object is not a valid HTTPProxy: {}", e),
            );
        }
    };

    let candidate = Candidate::new(proxy, request.namespace.as_deref(), &request.name);
    let ctx = ValidationContext {
        candidate: &candidate,
        claims: state.claims.as_ref(),
        ingress_classes: &state.ingress_classes,
    };

    match catch_unwind(AssertUnwindSafe(|| validate_all(&ctx))) {
        Ok(result) => result,
        Err(_) => {
            error!(resource = %candidate.resource, "Validation panicked, denying request");
            ValidationResult::denied(INTERNAL_ERROR_REASON, "Internal error while validating HTTPProxy")
        }
    }
}

/// Validate an HTTPProxy admission webhook handler
async fn validate_httpproxy(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let uid = &request.uid;
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    let result = admit(&state, &request);

    if let Some(ref health_state) = state.health_state {
        health_state.metrics.record_admission(
            result.allowed,
            result.reason.as_deref().unwrap_or(ALLOWED_REASON),
        );
    }

    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
        return (
            StatusCode::OK,
            Json(deny_with_reason(&request, &message, &reason)),
        );
    }

    info!(uid = %uid, operation = ?request.operation, "Admission request allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(&request).into_review()),
    )
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0 on the configured port and serves until `handle` is
/// told to shut down. TLS certificates are loaded from the configured paths.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    config: &WebhookConfig,
    handle: Handle,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state);

    let tls = RustlsConfig::from_pem_file(&config.tls_cert_file, &config.tls_key_file)
        .await
        .map_err(|e| {
            WebhookError::TlsConfig(format!(
                "{} / {}: {}",
                config.tls_cert_file.display(),
                config.tls_key_file.display(),
                e
            ))
        })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(port = config.port, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    info!("Webhook server stopped");
    Ok(())
}
