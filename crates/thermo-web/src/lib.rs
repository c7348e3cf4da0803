//! # thermo-web
//!
//! The buffer-constrained HTTP response engine.
//!
//! This crate provides:
//! - A minimal request model and the header token matcher
//! - Pull-based response bodies over static ranges, on-the-fly gzip
//!   decompression and template substitution, unified behind one
//!   `(buffer, index) -> bytes` call
//! - Response builders with ETag / content-negotiation logic
//! - The route registry with per-method dispatch, auto-synthesized
//!   HEAD/OPTIONS/405 responses and per-(path, method, status) counters
//!
//! The engine computes exact response lengths before emitting a single byte,
//! never holds a full response in memory, and resumes correctly across an
//! arbitrary number of small pull calls from the network layer.

pub mod handlers;
pub mod registry;
pub mod request;
pub mod response;
pub mod stats;

pub use handlers::{TemplateValue, TemplateValues};
pub use registry::{HandlerFn, Methods, Registry};
pub use request::{csv_header_contains, Method, Request};
pub use response::{Body, Produce, Response};
pub use stats::RequestStats;
