//! Validating admission webhook for HTTPProxy.
//!
//! Decisions are made against the conflict cache only; the webhook never
//! calls the API server and never writes claims.

pub mod candidate;
pub mod policies;
mod server;

pub use candidate::Candidate;
pub use policies::{ValidationContext, ValidationResult};
pub use server::{
    INTERNAL_ERROR_REASON, INVALID_REQUEST_REASON, VALIDATE_PATH, WEBHOOK_CERT_PATH,
    WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState, admit, create_webhook_router,
    run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
