//! Virtual host uniqueness policy.
//!
//! Denies an HTTPProxy whose virtual host is currently claimed, within the
//! same ingress class, by a different HTTPProxy. Claims whose TTL has
//! elapsed but that the sweeper has not evicted yet count as free.

use tokio::time::Instant;

use super::{ValidationContext, ValidationResult};
use crate::cache::ClaimKey;

/// Denial reason
pub const REASON: &str = "VirtualHostConflict";

/// Validate that no other HTTPProxy holds the declared virtual host
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    let Some(class) = ctx.managed_class() else {
        return ValidationResult::allowed();
    };
    let Ok(hosts) = ctx.candidate.proxy.declared_hosts() else {
        return ValidationResult::allowed();
    };

    let now = Instant::now();
    for host in &hosts {
        let key = ClaimKey::new(host, class);
        let Some(entry) = ctx.claims.lookup(&key) else {
            continue;
        };
        if entry.is_expired(now) || entry.owner() == &ctx.candidate.resource {
            continue;
        }
        return ValidationResult::denied(
            REASON,
            &format!(
                "virtual host {} in ingress class {} is already used by HTTPProxy {}",
                key.host(),
                key.ingress_class(),
                entry.owner()
            ),
        );
    }

    ValidationResult::allowed()
}
