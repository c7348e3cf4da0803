//! Thermometer web server for Linux.
//!
//! Wires the response engine to a TCP listener: embedded gzip web assets,
//! the templated index page, the sensor text/JSON endpoints, the timings
//! API, the metrics endpoint and the optional metrics push. A demo sensor
//! task stands in for the hardware driver.

mod conn;

/// Web assets gzipped by the build script.
mod assets {
    include!(concat!(env!("OUT_DIR"), "/assets.rs"));
}

use std::sync::Arc;
use std::time::Duration;
use thermo_core::{Clock, Config, SensorSource, SensorStore, SystemClock};
use thermo_metrics::MetricsPusher;
use thermo_web::response::{Body, Response, CACHE_CONTROL_NOCACHE};
use thermo_web::{Methods, Registry, TemplateValue, TemplateValues};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,thermo_web=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!(hostname = %config.hostname, port = config.port, "Thermometer server starting...");

    let clock: Arc<SystemClock> = Arc::new(SystemClock::new());
    let store = Arc::new(SensorStore::new(clock.clone()));

    let mut registry = Registry::new();
    register_routes(&mut registry, &config, clock.clone(), store.clone());
    thermo_metrics::register_metrics_route(
        &mut registry,
        config.metrics_namespace.clone(),
        store.clone(),
    );
    registry.register_server_options(Methods::GET | Methods::HEAD | Methods::OPTIONS);
    let registry = Arc::new(registry);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("Listening on http://0.0.0.0:{}", config.port);

    let server_header: Arc<str> = Arc::from(config.server_header.as_str());
    let server_handle = {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = conn::serve(listener, registry, server_header).await {
                tracing::error!("HTTP server error: {}", e);
            }
        })
    };

    // Demo measurements in place of the hardware sensor driver.
    let demo_handle = {
        let store = store.clone();
        tokio::spawn(async move {
            run_demo_sensor(store).await;
        })
    };

    let push_handle = if config.push.enabled {
        let pusher = MetricsPusher::new(&config, store.clone(), registry.stats());
        tracing::info!(
            addr = %config.push.addr,
            port = config.push.port,
            interval_secs = config.push.interval_secs,
            "Metrics push enabled."
        );
        Some(tokio::spawn(pusher.run()))
    } else {
        None
    };

    tracing::info!("Try these commands:");
    tracing::info!("   curl http://localhost:{}/index.html", config.port);
    tracing::info!("   curl http://localhost:{}/data.json", config.port);
    tracing::info!("   curl http://localhost:{}/metrics", config.port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = server_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = demo_handle => {
            tracing::warn!("Demo sensor stopped");
        }
    }

    if let Some(handle) = push_handle {
        handle.abort();
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load the configuration file named on the command line, if any.
fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path)?;
            tracing::info!(path, "Loaded configuration.");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Register the web UI and sensor endpoints.
fn register_routes(
    registry: &mut Registry,
    config: &Config,
    clock: Arc<SystemClock>,
    store: Arc<SensorStore>,
) {
    let window_bits = config.gzip_window_bits;

    registry.register_redirect("/", "/index.html");

    let index_values: TemplateValues = [
        (
            "TEMP".to_string(),
            TemplateValue::dynamic({
                let store = store.clone();
                move || store.last_temperature_string()
            }),
        ),
        (
            "HUMID".to_string(),
            TemplateValue::dynamic({
                let store = store.clone();
                move || store.last_humidity_string()
            }),
        ),
        (
            "TIME".to_string(),
            TemplateValue::dynamic({
                let store = store.clone();
                move || store.time_since_valid_measurement_string()
            }),
        ),
    ]
    .into_iter()
    .collect();
    registry.register_template(
        "/index.html",
        "text/html",
        Arc::from(assets::INDEX_HTML),
        index_values,
    );

    registry.register_compressed_static(
        "/main.css",
        "text/css",
        Arc::from(assets::MAIN_CSS_GZ),
        Some(assets::MAIN_CSS_ETAG.to_string()),
        window_bits,
    );
    registry.register_compressed_static(
        "/index.js",
        "text/javascript",
        Arc::from(assets::INDEX_JS_GZ),
        Some(assets::INDEX_JS_ETAG.to_string()),
        window_bits,
    );
    registry.register_compressed_static(
        "/manifest.json",
        "application/json",
        Arc::from(assets::MANIFEST_JSON_GZ),
        Some(assets::MANIFEST_JSON_ETAG.to_string()),
        window_bits,
    );
    registry.register_compressed_static(
        "/favicon.svg",
        "image/svg+xml",
        Arc::from(assets::FAVICON_SVG_GZ),
        Some(assets::FAVICON_SVG_ETAG.to_string()),
        window_bits,
    );

    registry.register("/temperature", Methods::GET, {
        let store = store.clone();
        Arc::new(move |_req| text_response(store.temperature_string()))
    });
    registry.register("/humidity", Methods::GET, {
        let store = store.clone();
        Arc::new(move |_req| text_response(store.humidity_string()))
    });
    registry.register("/data.json", Methods::GET, {
        let store = store.clone();
        Arc::new(move |_req| {
            let payload = serde_json::json!({
                "temperature": measurement_json(store.last_temperature()),
                "humidity": measurement_json(store.last_humidity()),
                "time": store.time_since_valid_measurement_string(),
            });
            let body = payload.to_string();
            Response::new(
                200,
                "application/json",
                body.len(),
                Body::from_vec(body.into_bytes()),
            )
            .with_header("Cache-Control", CACHE_CONTROL_NOCACHE)
        })
    });

    registry.register("/timings/since_startup_ms", Methods::GET, {
        let clock = clock.clone();
        Arc::new(move |_req| text_response(clock.millis().to_string()))
    });
    registry.register("/timings/since_measurement_ms", Methods::GET, {
        let store = store.clone();
        Arc::new(move |_req| text_response(timing_string(store.time_since_measurement())))
    });
    registry.register("/timings/since_successful_measurement_ms", Methods::GET, {
        let store = store.clone();
        Arc::new(move |_req| text_response(timing_string(store.time_since_valid_measurement())))
    });
    registry.register_static(
        "/timings/info",
        "text/plain",
        Arc::from(TIMINGS_INFO.as_bytes()),
        None,
    );
    registry.register_redirect("/timings", "/timings/info");
    registry.register_redirect("/timings/", "/timings/info");
}

const TIMINGS_INFO: &str = "This directory contains various timing informations.\n\
A list of these endpoints is currently not available.\n\
The precision of these timings may not be ideal because the uptime counter wraps after ~50 days.\n\
All endpoints return values in milliseconds.";

fn text_response(body: String) -> Response {
    Response::new(
        200,
        "text/plain",
        body.len(),
        Body::from_vec(body.into_bytes()),
    )
    .with_header("Cache-Control", CACHE_CONTROL_NOCACHE)
}

/// Timings report -1 for "never", like the firmware's signed millis values.
fn timing_string(value: Option<u64>) -> String {
    match value {
        Some(ms) => ms.to_string(),
        None => "-1".to_string(),
    }
}

/// Measurements serialize as two-decimal numbers, or "Unknown".
fn measurement_json(value: f32) -> serde_json::Value {
    if value.is_nan() {
        serde_json::Value::String("Unknown".to_string())
    } else {
        serde_json::json!((value as f64 * 100.0).round() / 100.0)
    }
}

/// Generate demo measurements - a slow drift around plausible room values.
async fn run_demo_sensor(store: Arc<SensorStore>) {
    let mut interval = tokio::time::interval(Duration::from_secs(2));
    let mut tick = 0u64;
    loop {
        interval.tick().await;
        let phase = tick as f32 / 30.0;
        let temperature = 21.5 + 2.0 * phase.sin();
        let humidity = 48.0 + 5.0 * (phase * 0.7).cos();
        store.record(temperature, humidity);
        tick += 1;
    }
}
