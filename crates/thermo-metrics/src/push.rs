//! Outbound metrics push.
//!
//! Drives one client connection to a push gateway: connect, write the
//! request, scan the incoming bytes for the HTTP status line, disconnect.
//! At most one push attempt is in flight; if a new attempt is due while one
//! is still active, the new attempt is skipped and the stale connection is
//! forced closed. A timeout derived from the push interval bounds how long a
//! hung remote endpoint can stall the connection.

use crate::exposition::render;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thermo_core::{Config, PushConfig, SensorSource};
use thermo_web::stats::RequestStats;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors from one push attempt.
#[derive(Debug, Error)]
pub enum PushError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The gateway closed the connection before sending a status line.
    #[error("no http status line in response")]
    NoStatus,
}

/// Periodic metrics pusher.
pub struct MetricsPusher {
    push: PushConfig,
    hostname: String,
    namespace: String,
    sensor: Arc<dyn SensorSource>,
    stats: Arc<RequestStats>,
    in_flight: Arc<AtomicBool>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsPusher {
    /// Create a pusher from the configuration.
    pub fn new(config: &Config, sensor: Arc<dyn SensorSource>, stats: Arc<RequestStats>) -> Self {
        Self {
            push: config.push.clone(),
            hostname: config.hostname.clone(),
            namespace: config.metrics_namespace.clone(),
            sensor,
            stats,
            in_flight: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }

    /// Run push attempts at the configured interval; never returns.
    pub async fn run(self) {
        let period = Duration::from_secs(self.push.interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick();
        }
    }

    /// Start one push attempt, unless the previous one is still active.
    fn tick(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("Previous metrics push still active, skipping this attempt.");
            if let Some(stale) = self.current.lock().unwrap().take() {
                stale.abort();
            }
            self.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let job = if self.push.job.is_empty() {
            self.hostname.clone()
        } else {
            self.push.job.clone()
        };
        let body = render(&self.namespace, self.sensor.as_ref(), &self.stats, false);
        let addr = self.push.addr.clone();
        let port = self.push.port;
        let instance = self.push.instance.clone();
        let namespace = self.namespace.clone();
        // The original firmware uses 75% of the interval as its socket
        // timeouts; keep that bound for the whole attempt.
        let timeout = Duration::from_millis(self.push.interval_secs.max(1) * 750);
        let in_flight = self.in_flight.clone();

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(
                timeout,
                push_once(&addr, port, &job, &instance, &namespace, &body),
            )
            .await
            {
                Ok(Ok(200)) => debug!("Pushed metrics."),
                Ok(Ok(code)) => {
                    warn!(code, "Received http status code {code} when trying to push metrics.")
                }
                Ok(Err(e)) => error!(error = %e, "Connecting to the metrics server failed!"),
                Err(_) => error!("Metrics push timed out."),
            }
            in_flight.store(false, Ordering::SeqCst);
        });
        *self.current.lock().unwrap() = Some(handle);
    }
}

/// One complete push attempt.
async fn push_once(
    addr: &str,
    port: u16,
    job: &str,
    instance: &str,
    namespace: &str,
    body: &str,
) -> Result<u16, PushError> {
    let mut stream = TcpStream::connect((addr, port)).await?;
    let instance = if instance.is_empty() {
        stream.local_addr()?.ip().to_string()
    } else {
        instance.to_string()
    };
    let url = build_push_url(job, &instance, namespace);
    info!(url = %url, "Pushing metrics.");

    let request = format!(
        "POST {url} HTTP/1.0\r\nHost: {addr}\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::with_capacity(128);
    let mut chunk = [0u8; 128];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return scan_status_code(&response).ok_or(PushError::NoStatus);
        }
        response.extend_from_slice(&chunk[..n]);
        if let Some(code) = scan_status_code(&response) {
            return Ok(code);
        }
        if response.len() > 1024 {
            return Err(PushError::NoStatus);
        }
    }
}

/// `/metrics/job/<job>/instance/<instance>/namespace/<namespace>`
pub fn build_push_url(job: &str, instance: &str, namespace: &str) -> String {
    format!("/metrics/job/{job}/instance/{instance}/namespace/{namespace}")
}

/// Find the status code in the first bytes of an HTTP response.
///
/// Scans past the `HTTP/x.y ` prefix for the first digit and reads the three
/// digit code, the way the firmware scans its receive callbacks.
fn scan_status_code(data: &[u8]) -> Option<u16> {
    for (i, byte) in data.iter().enumerate() {
        if i > 8 && byte.is_ascii_digit() && data.len() > i + 2 {
            let code = std::str::from_utf8(&data[i..i + 3]).ok()?;
            return code.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use thermo_core::{ManualClock, SensorStore};

    #[test]
    fn test_build_push_url() {
        assert_eq!(
            build_push_url("wifi-thermometer", "192.168.2.101", "thermo"),
            "/metrics/job/wifi-thermometer/instance/192.168.2.101/namespace/thermo"
        );
    }

    #[test]
    fn test_scan_status_code() {
        assert_eq!(scan_status_code(b"HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(scan_status_code(b"HTTP/1.0 404 Not Found\r\n"), Some(404));
        // Too little data to contain a full code yet.
        assert_eq!(scan_status_code(b"HTTP/1.1 20"), None);
        assert_eq!(scan_status_code(b"HTTP/1.1 "), None);
        assert_eq!(scan_status_code(b""), None);
    }

    #[tokio::test]
    async fn test_push_against_local_gateway() {
        use tokio::io::AsyncBufReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = tokio::io::BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.unwrap();

            let mut content_length = 0usize;
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                if let Some(value) = line.strip_prefix("Content-Length:") {
                    content_length = value.trim().parse().unwrap();
                }
                line.clear();
            }
            // Consume the body and the trailing blank line before replying,
            // so closing the socket cannot reset the unread request.
            let mut body = vec![0u8; content_length + 4];
            reader.read_exact(&mut body).await.unwrap();

            reader
                .into_inner()
                .write_all(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            request_line
        });

        let store = SensorStore::new(Arc::new(ManualClock::new()));
        store.record(20.0, 40.0);
        let stats = RequestStats::new();
        let body = render("thermo", &store, &stats, false);

        let code = push_once("127.0.0.1", port, "job1", "inst1", "thermo", &body)
            .await
            .unwrap();
        assert_eq!(code, 200);

        let request_line = server.await.unwrap();
        assert_eq!(
            request_line,
            "POST /metrics/job/job1/instance/inst1/namespace/thermo HTTP/1.0\r\n"
        );
    }
}
