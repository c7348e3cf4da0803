//! # thermo-metrics
//!
//! Metrics support for the thermometer firmware.
//!
//! This crate provides:
//! - The Prometheus 0.0.4 / OpenMetrics 1.0.0 text serializer over sensor
//!   values and the request counters, with the exact output size computed
//!   before a single byte is written
//! - The `/metrics` route handler with `Accept` negotiation
//! - The asynchronous push client driving one outbound connection at a time

pub mod exposition;
pub mod push;
pub mod routes;

pub use exposition::{render, MetricDescriptor, OPENMETRICS_CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE};
pub use push::MetricsPusher;
pub use routes::register_metrics_route;
