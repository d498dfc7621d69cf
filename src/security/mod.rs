//! Request defense subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (declared size, content type)
//!     → rate_limit/ (per client and endpoint class window)
//!     → injection/ (free-text prompts) or geometry.rs (areas of interest)
//!     → handler
//!
//! Any step may fail with a DefenseError (error.rs); pipeline.rs turns it
//! into an audit event (audit.rs) with sensitive fields masked (masking.rs).
//! ```

pub mod audit;
pub mod error;
pub mod geometry;
pub mod injection;
pub mod limits;
pub mod masking;
pub mod pipeline;
pub mod rate_limit;

pub use audit::{AuditSink, MemoryAuditSink, RequestOrigin, SecurityEvent, TracingAuditSink};
pub use error::{DefenseError, DefenseResult, ErrorKind, ErrorSeverity};
pub use pipeline::DefensePipeline;
