//! Minimal HTTP/1.1 connection handling.
//!
//! This is the narrow network layer the response engine is designed for: it
//! resolves the request head, asks the registry for a response, writes the
//! headers with the exact declared content length, and then pulls the body
//! in bounded chunks until that length is reached. The producer never sees
//! the socket and the connection never sees a body larger than one chunk.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use thermo_web::response::status_reason;
use thermo_web::{Method, Produce, Registry, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

/// Upper bound for the request head.
const MAX_HEAD_LEN: usize = 8 * 1024;

/// Initial body pull chunk size.
const CHUNK_LEN: usize = 1024;

/// Hard bound for chunk growth after a try-again result.
const MAX_CHUNK_LEN: usize = 64 * 1024;

/// Accept connections forever.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    server_header: Arc<str>,
) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = registry.clone();
                let server_header = server_header.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, registry, server_header).await {
                        debug!(client = %addr, error = %e, "Connection ended with an error.");
                    }
                });
            }
            Err(e) => error!(error = %e, "Failed to accept connection."),
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    registry: Arc<Registry>,
    server_header: Arc<str>,
) -> Result<()> {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejecting unparseable request.");
            stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
            stream.shutdown().await.ok();
            return Ok(());
        }
    };

    let mut response = registry.dispatch(&request);
    write_response(&mut stream, &mut response, &server_header).await?;
    stream.shutdown().await.ok();
    Ok(())
}

/// Read and parse the request line and headers.
async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 512];
    let head_end = loop {
        let n = stream.read(&mut buf).await.context("reading request head")?;
        if n == 0 {
            bail!("connection closed before the request head ended");
        }
        head.extend_from_slice(&buf[..n]);
        if let Some(pos) = find_head_end(&head) {
            break pos;
        }
        if head.len() > MAX_HEAD_LEN {
            bail!("request head too large");
        }
    };

    let head = std::str::from_utf8(&head[..head_end]).context("request head is not utf-8")?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split(' ');
    let method_token = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");
    let Some(method) = Method::parse(method_token) else {
        bail!("unsupported method {method_token:?}");
    };
    if target.is_empty() {
        bail!("missing request target");
    }
    // Query strings play no role in routing.
    let path = target.split('?').next().unwrap_or(target);

    let mut request = Request::new(method, path);
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            request = request.with_header(name.trim(), value.trim());
        }
    }
    Ok(request)
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Write status line, headers, and then the body in bounded pull chunks.
async fn write_response(
    stream: &mut TcpStream,
    response: &mut Response,
    server_header: &str,
) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        status_reason(response.status)
    );
    head.push_str(&format!("Server: {server_header}\r\n"));
    head.push_str("Access-Control-Allow-Origin: *\r\n");
    if response.status != 204 {
        head.push_str(&format!("Content-Type: {}\r\n", response.content_type));
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.content_length));
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await?;

    if response.head_only {
        return Ok(());
    }

    let mut remaining = response.content_length;
    let mut index = 0;
    let mut chunk_len = CHUNK_LEN;
    let mut chunk = vec![0u8; chunk_len.min(remaining.max(1))];
    while remaining > 0 {
        let want = chunk_len.min(remaining);
        if chunk.len() < want {
            chunk.resize(want, 0);
        }
        match response.body.produce(&mut chunk[..want], index) {
            Produce::Bytes(0) => {
                // The producer must emit its declared length; ending short
                // would desynchronize the connection.
                error!(
                    remaining,
                    declared = response.content_length,
                    "Response body ended before its declared length."
                );
                break;
            }
            Produce::Bytes(n) => {
                let n = n.min(remaining);
                stream.write_all(&chunk[..n]).await?;
                index += n;
                remaining -= n;
            }
            Produce::TryAgain => {
                if chunk_len >= MAX_CHUNK_LEN || chunk_len >= remaining {
                    error!(chunk_len, "Response producer cannot make progress.");
                    break;
                }
                chunk_len = (chunk_len * 2).min(MAX_CHUNK_LEN);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_request_round_trip_over_socket() {
        use thermo_web::Methods;
        use thermo_web::{Body, Response};

        let mut registry = Registry::new();
        registry.register(
            "/hello",
            Methods::GET,
            Arc::new(|_req| {
                Response::new(200, "text/plain", 5, Body::from_vec(b"hello".to_vec()))
            }),
        );
        let registry = Arc::new(registry);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, registry, Arc::from("TestServer")));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Server: TestServer\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn test_head_request_has_headers_but_no_body() {
        use thermo_web::Methods;
        use thermo_web::{Body, Response};

        let mut registry = Registry::new();
        registry.register(
            "/hello",
            Methods::GET,
            Arc::new(|_req| {
                Response::new(200, "text/plain", 5, Body::from_vec(b"hello".to_vec()))
            }),
        );
        let registry = Arc::new(registry);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, registry, Arc::from("TestServer")));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"HEAD /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
