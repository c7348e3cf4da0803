//! The `/metrics` route.

use crate::exposition::{render, OPENMETRICS_CONTENT_TYPE, OPENMETRICS_MIME, PROMETHEUS_CONTENT_TYPE};
use std::sync::Arc;
use thermo_core::SensorSource;
use thermo_web::response::{Body, Response, CACHE_CONTROL_NOCACHE};
use thermo_web::stats::RequestStats;
use thermo_web::{csv_header_contains, HandlerFn, Methods, Registry};
use tracing::debug;

/// Build the `/metrics` handler.
///
/// The exposition format is selected by the request's `Accept` header:
/// clients listing `application/openmetrics-text` get OpenMetrics 1.0.0,
/// everyone else the legacy Prometheus 0.0.4 format.
pub fn metrics_handler(
    namespace: String,
    sensor: Arc<dyn SensorSource>,
    stats: Arc<RequestStats>,
) -> HandlerFn {
    Arc::new(move |request| {
        let openmetrics = request
            .header("Accept")
            .is_some_and(|header| csv_header_contains(header, OPENMETRICS_MIME));
        if openmetrics {
            debug!("Client accepts openmetrics.");
        } else {
            debug!("Client doesn't accept openmetrics.");
        }

        let text = render(&namespace, sensor.as_ref(), &stats, openmetrics);
        let content_type = if openmetrics {
            OPENMETRICS_CONTENT_TYPE
        } else {
            PROMETHEUS_CONTENT_TYPE
        };
        Response::new(200, content_type, text.len(), Body::from_vec(text.into_bytes()))
            .with_header("Cache-Control", CACHE_CONTROL_NOCACHE)
            .with_header("Vary", "Accept")
    })
}

/// Register the `/metrics` route on a registry, scraping the registry's own
/// request counters.
pub fn register_metrics_route(
    registry: &mut Registry,
    namespace: impl Into<String>,
    sensor: Arc<dyn SensorSource>,
) {
    let stats = registry.stats();
    registry.register(
        "/metrics",
        Methods::GET,
        metrics_handler(namespace.into(), sensor, stats),
    );
}
