//! Validation policies for HTTPProxy admission.
//!
//! Policies run in order and the first denial wins:
//! - HTTPProxies outside the managed ingress classes are always admitted
//! - `virtual_host`: the declared host must be a valid DNS name
//! - `uniqueness`: the host must not be claimed by another HTTPProxy

pub mod uniqueness;
pub mod virtual_host;

use crate::cache::ClaimLookup;
use crate::config::IngressClasses;
use crate::webhooks::candidate::Candidate;

/// Result of a validation check
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validation
pub struct ValidationContext<'a> {
    /// The HTTPProxy being admitted
    pub candidate: &'a Candidate,
    /// Current claims
    pub claims: &'a dyn ClaimLookup,
    /// Ingress classes whose claims are enforced
    pub ingress_classes: &'a IngressClasses,
}

impl<'a> ValidationContext<'a> {
    /// Ingress class of the candidate, if it is one this webhook manages
    pub fn managed_class(&self) -> Option<&'a str> {
        self.candidate
            .proxy
            .ingress_class()
            .filter(|class| self.ingress_classes.is_managed(class))
    }
}

/// Run all validation policies
pub fn validate_all(ctx: &ValidationContext<'_>) -> ValidationResult {
    if ctx.managed_class().is_none() {
        return ValidationResult::allowed();
    }

    let result = virtual_host::validate(ctx);
    if !result.allowed {
        return result;
    }

    let result = uniqueness::validate(ctx);
    if !result.allowed {
        return result;
    }

    ValidationResult::allowed()
}
