//! Virtual host syntax policy.
//!
//! A managed root HTTPProxy must declare a virtual host that is a valid DNS
//! name. Included proxies (no `virtualhost` block) pass.

use super::{ValidationContext, ValidationResult};

/// Denial reason
pub const REASON: &str = "InvalidVirtualHost";

/// Validate the declared virtual host
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    match ctx.candidate.proxy.declared_hosts() {
        Ok(_) => ValidationResult::allowed(),
        Err(e) => ValidationResult::denied(REASON, &e.to_string()),
    }
}
