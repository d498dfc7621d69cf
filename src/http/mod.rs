//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, live config)
//!     → middleware/ (error reporting, timeout, body guard, class rate limit)
//!     → extract.rs (prompt screening, geometry validation)
//!     → handlers.rs (proxy to upstream)
//!     → Send to client
//! ```

pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{build_router, AppState, GuardServer};
