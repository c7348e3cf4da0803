//! Response model and the unified pull-based body.
//!
//! A body is a tagged union over the three producer kinds (verbatim range,
//! decompressing, templated) plus the explicit empty body, all behind one
//! `(buffer, bytes_already_produced) -> bytes_written` call. Producer state
//! lives inside the body and survives across an arbitrary number of pull
//! calls; the declared content length is exact and decided before the first
//! byte is produced.

use std::sync::Arc;
use thermo_codec::gzip::GzipDecoder;
use thermo_codec::template::{Fill, TemplateFiller};

/// `Cache-Control` for content that may be cached but must be revalidated.
pub const CACHE_CONTROL_CACHE: &str = "public, no-cache";

/// `Cache-Control` for request-dependent content.
pub const CACHE_CONTROL_NOCACHE: &str = "no-store";

/// `Content-Security-Policy` sent with every `text/html` response.
pub const CSP_VALUE: &str =
    "default-src 'self'; style-src 'self'; script-src 'self'; img-src 'self' data:";

/// Result of one body pull call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produce {
    /// Bytes written into the buffer; 0 means the body is exhausted.
    Bytes(usize),
    /// Nothing was written; call again with the same position and a larger
    /// buffer.
    TryAgain,
}

/// A pull-based response body.
pub enum Body {
    /// Verbatim copy from a fixed range.
    Static(Arc<[u8]>),
    /// On-the-fly decompression of a stored gzip range.
    Decompress(GzipDecoder),
    /// Incremental placeholder substitution.
    Template(TemplateFiller),
    /// No body at all (HEAD, 204, 304, zero-length content).
    Empty,
}

impl Body {
    /// Body over owned bytes (dynamic content rendered up front).
    pub fn from_vec(data: Vec<u8>) -> Self {
        Body::Static(data.into())
    }

    /// Produce the next segment of the body into `buf`.
    ///
    /// `index` is the number of bytes already produced by earlier calls.
    pub fn produce(&mut self, buf: &mut [u8], index: usize) -> Produce {
        match self {
            Body::Empty => Produce::Bytes(0),
            Body::Static(data) => {
                let remaining = data.len().saturating_sub(index);
                let n = remaining.min(buf.len());
                buf[..n].copy_from_slice(&data[index..index + n]);
                Produce::Bytes(n)
            }
            Body::Decompress(decoder) => Produce::Bytes(decoder.decompress(buf)),
            Body::Template(filler) => match filler.fill(buf, index) {
                Fill::Filled(n) => Produce::Bytes(n),
                Fill::TryAgain => Produce::TryAgain,
            },
        }
    }
}

/// A response handed back to the network layer.
///
/// `content_length` is a promise: the body will produce exactly that many
/// bytes (none for `head_only` responses, which keep the declared length for
/// the header only).
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub content_length: usize,
    pub headers: Vec<(&'static str, String)>,
    pub body: Body,
    pub head_only: bool,
}

impl Response {
    /// Create a response with no extra headers.
    pub fn new(status: u16, content_type: &'static str, content_length: usize, body: Body) -> Self {
        Self {
            status,
            content_type,
            content_length,
            headers: Vec::new(),
            body,
            head_only: false,
        }
    }

    /// Attach a header (builder style).
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Look up an attached header (mainly for tests).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Turn this response into its HEAD variant: same status, headers and
    /// declared length, no body bytes.
    pub fn into_head_only(mut self) -> Self {
        self.head_only = true;
        self.body = Body::Empty;
        self
    }
}

/// The reason phrase for a status code.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_body_produces_in_chunks() {
        let mut body = Body::from_vec(b"abcdefgh".to_vec());
        let mut buf = [0u8; 3];
        assert_eq!(body.produce(&mut buf, 0), Produce::Bytes(3));
        assert_eq!(&buf, b"abc");
        assert_eq!(body.produce(&mut buf, 3), Produce::Bytes(3));
        assert_eq!(&buf, b"def");
        assert_eq!(body.produce(&mut buf, 6), Produce::Bytes(2));
        assert_eq!(&buf[..2], b"gh");
        assert_eq!(body.produce(&mut buf, 8), Produce::Bytes(0));
    }

    #[test]
    fn test_empty_body_produces_nothing() {
        let mut body = Body::Empty;
        let mut buf = [0u8; 8];
        assert_eq!(body.produce(&mut buf, 0), Produce::Bytes(0));
    }

    #[test]
    fn test_head_only_keeps_length_and_headers() {
        let response = Response::new(200, "text/plain", 5, Body::from_vec(b"hello".to_vec()))
            .with_header("Cache-Control", CACHE_CONTROL_NOCACHE)
            .into_head_only();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_length, 5);
        assert_eq!(response.header("Cache-Control"), Some(CACHE_CONTROL_NOCACHE));
        assert!(response.head_only);
        assert!(matches!(response.body, Body::Empty));
    }

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(304), "Not Modified");
        assert_eq!(status_reason(405), "Method Not Allowed");
    }
}
