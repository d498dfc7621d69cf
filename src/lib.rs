//! Request validation and abuse defense for the field monitoring API.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod upstream;

pub use config::schema::GuardConfig;
pub use http::GuardServer;
pub use lifecycle::Shutdown;
pub use security::pipeline::DefensePipeline;
