//! Custom resources consumed by the webhook.
//!
//! - `HTTPProxy`: Contour's virtual host routing resource. Owned by Contour;
//!   this crate only reads it.

mod http_proxy;

pub use http_proxy::*;
