//! Axum middleware for the defense chain.

mod admin_auth;
mod body_guard;
mod error_report;
mod rate_limit;
mod timeout;

pub use admin_auth::require_admin;
pub use body_guard::body_guard;
pub use error_report::report_errors;
pub use rate_limit::{enforce_rate_limit, ClassState};
pub use timeout::request_timeout;
