//! Metrics text serialization.
//!
//! Emits Prometheus 0.0.4 or OpenMetrics 1.0.0 exposition text. The exact
//! output size is computed before any byte is written: fixed-length format
//! fragments per metric plus variable-length fragments (path strings, digit
//! counts) for the request counter table. Should the estimate ever prove too
//! small, generation logs an error and truncates instead of growing.

use thermo_core::SensorSource;
use thermo_web::stats::RequestStats;
use thermo_web::Method;
use tracing::error;

/// Content type of the legacy Prometheus exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Content type of the OpenMetrics exposition format.
pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// The `Accept` token selecting OpenMetrics output.
pub const OPENMETRICS_MIME: &str = "application/openmetrics-text";

/// Static description of one metric block.
///
/// The metric name on the wire is `<namespace>_<name>[_<unit>]`.
pub struct MetricDescriptor {
    pub name: &'static str,
    pub unit: &'static str,
    pub help: &'static str,
    pub kind: &'static str,
}

/// The measured outside temperature.
pub const EXTERNAL_TEMPERATURE: MetricDescriptor = MetricDescriptor {
    name: "external_temperature",
    unit: "celsius",
    help: "The current measured external temperature in degrees celsius.",
    kind: "gauge",
};

/// The measured outside relative humidity.
pub const EXTERNAL_HUMIDITY: MetricDescriptor = MetricDescriptor {
    name: "external_humidity",
    unit: "percent",
    help: "The current measured external relative humidity in percent.",
    kind: "gauge",
};

/// The per-(path, method, status) request counter family.
pub const HTTP_REQUESTS: MetricDescriptor = MetricDescriptor {
    name: "http_requests_total",
    unit: "",
    help: "The total number of HTTP requests handled by this server.",
    kind: "counter",
};

const EOF_LINE: &str = "# EOF\n";

/// Render the full exposition document.
pub fn render(
    namespace: &str,
    sensor: &dyn SensorSource,
    stats: &RequestStats,
    openmetrics: bool,
) -> String {
    let snapshot = stats.snapshot();
    let temperature = sensor.temperature() as f64;
    let humidity = sensor.humidity() as f64;

    let mut size = gauge_block_len(namespace, &EXTERNAL_TEMPERATURE, temperature, openmetrics)
        + gauge_block_len(namespace, &EXTERNAL_HUMIDITY, humidity, openmetrics)
        + metadata_line_len(namespace, "HELP", &HTTP_REQUESTS, HTTP_REQUESTS.help)
        + metadata_line_len(namespace, "TYPE", &HTTP_REQUESTS, HTTP_REQUESTS.kind);
    for ((path, method, status), count) in &snapshot {
        size += counter_sample_len(namespace, path, *method, *status, *count);
    }
    if openmetrics {
        size += EOF_LINE.len();
    }

    let mut out = MetricsBuffer::new(size);
    write_gauge_block(&mut out, namespace, &EXTERNAL_TEMPERATURE, temperature, openmetrics);
    write_gauge_block(&mut out, namespace, &EXTERNAL_HUMIDITY, humidity, openmetrics);
    write_metadata_line(&mut out, namespace, "HELP", &HTTP_REQUESTS, HTTP_REQUESTS.help);
    write_metadata_line(&mut out, namespace, "TYPE", &HTTP_REQUESTS, HTTP_REQUESTS.kind);
    for ((path, method, status), count) in &snapshot {
        write_counter_sample(&mut out, namespace, path, *method, *status, *count);
    }
    if openmetrics {
        out.push(EOF_LINE);
    }
    out.finish()
}

/// Size-capped output buffer; overruns log and truncate.
struct MetricsBuffer {
    buf: String,
    cap: usize,
    truncated: bool,
}

impl MetricsBuffer {
    fn new(cap: usize) -> Self {
        Self {
            buf: String::with_capacity(cap),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, fragment: &str) {
        if self.truncated {
            return;
        }
        if self.buf.len() + fragment.len() > self.cap {
            error!(
                cap = self.cap,
                have = self.buf.len(),
                need = fragment.len(),
                "Metrics generation buffer overflow."
            );
            self.truncated = true;
            return;
        }
        self.buf.push_str(fragment);
    }

    fn finish(self) -> String {
        self.buf
    }
}

fn full_name_len(namespace: &str, metric: &MetricDescriptor) -> usize {
    let mut len = metric.name.len();
    if !namespace.is_empty() {
        len += namespace.len() + 1;
    }
    if !metric.unit.is_empty() {
        len += metric.unit.len() + 1;
    }
    len
}

fn push_full_name(out: &mut MetricsBuffer, namespace: &str, metric: &MetricDescriptor) {
    if !namespace.is_empty() {
        out.push(namespace);
        out.push("_");
    }
    out.push(metric.name);
    if !metric.unit.is_empty() {
        out.push("_");
        out.push(metric.unit);
    }
}

fn metadata_line_len(namespace: &str, field: &str, metric: &MetricDescriptor, value: &str) -> usize {
    2 + field.len() + 1 + full_name_len(namespace, metric) + 1 + value.len() + 1
}

fn write_metadata_line(
    out: &mut MetricsBuffer,
    namespace: &str,
    field: &str,
    metric: &MetricDescriptor,
    value: &str,
) {
    out.push("# ");
    out.push(field);
    out.push(" ");
    push_full_name(out, namespace, metric);
    out.push(" ");
    out.push(value);
    out.push("\n");
}

fn gauge_block_len(
    namespace: &str,
    metric: &MetricDescriptor,
    value: f64,
    openmetrics: bool,
) -> usize {
    let mut len = metadata_line_len(namespace, "HELP", metric, metric.help)
        + metadata_line_len(namespace, "TYPE", metric, metric.kind);
    if openmetrics {
        len += metadata_line_len(namespace, "UNIT", metric, metric.unit);
    }
    len + full_name_len(namespace, metric) + 1 + float_len(value) + 1
}

/// HELP line, TYPE line, UNIT line (OpenMetrics only) and the sample line.
fn write_gauge_block(
    out: &mut MetricsBuffer,
    namespace: &str,
    metric: &MetricDescriptor,
    value: f64,
    openmetrics: bool,
) {
    write_metadata_line(out, namespace, "HELP", metric, metric.help);
    write_metadata_line(out, namespace, "TYPE", metric, metric.kind);
    if openmetrics {
        write_metadata_line(out, namespace, "UNIT", metric, metric.unit);
    }
    push_full_name(out, namespace, metric);
    out.push(" ");
    out.push(&format_value(value));
    out.push("\n");
}

fn counter_sample_len(
    namespace: &str,
    path: &str,
    method: Method,
    status: u16,
    count: u64,
) -> usize {
    full_name_len(namespace, &HTTP_REQUESTS)
        + "{method=\"".len()
        + method.label().len()
        + "\",code=\"".len()
        + digits(status as u64)
        + "\",path=\"".len()
        + path.len()
        + "\"} ".len()
        + digits(count)
        + 4
        + 1
}

fn write_counter_sample(
    out: &mut MetricsBuffer,
    namespace: &str,
    path: &str,
    method: Method,
    status: u16,
    count: u64,
) {
    push_full_name(out, namespace, &HTTP_REQUESTS);
    out.push("{method=\"");
    out.push(method.label());
    out.push("\",code=\"");
    out.push(&status.to_string());
    out.push("\",path=\"");
    out.push(path);
    out.push("\"} ");
    out.push(&format_value(count as f64));
    out.push("\n");
}

/// Sample values render with three decimals; NaN renders as `NAN`.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else {
        format!("{:.3}", value)
    }
}

/// The exact rendered length of a sample value.
fn float_len(value: f64) -> usize {
    if value.is_nan() {
        return 3;
    }
    if value.is_infinite() {
        // "{:.3}" renders infinities without decimals.
        return if value < 0.0 { 4 } else { 3 };
    }
    // Round to the emitted precision first so 9.9999 sizes as "10.000".
    let rounded = (value * 1_000.0).round() / 1_000.0;
    let sign = if value.is_sign_negative() { 1 } else { 0 };
    sign + digits(rounded.abs().trunc() as u64) + 1 + 3
}

fn digits(mut value: u64) -> usize {
    let mut count = 1;
    while value >= 10 {
        value /= 10;
        count += 1;
    }
    count
}
