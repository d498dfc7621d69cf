//! Upstream services the guard sits in front of.
//!
//! Failures are mapped into the defense error taxonomy so a client can tell
//! a service that is down apart from one that rejected the request.

mod client;

pub use client::{UpstreamClient, UpstreamError, UpstreamResult, UpstreamService};
