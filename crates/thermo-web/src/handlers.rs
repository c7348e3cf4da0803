//! Response builders.
//!
//! Each builder decides status, headers and the exact content length, and
//! hands back a [`Response`] whose body produces that many bytes across any
//! number of pull calls. The 404 and 405 pages go through the same templated
//! producer machinery as everything else, so their length computation is
//! uniform.

use crate::registry::Methods;
use crate::request::{csv_header_contains, Request};
use crate::response::{
    Body, Response, CACHE_CONTROL_CACHE, CACHE_CONTROL_NOCACHE, CSP_VALUE,
};
use std::collections::HashMap;
use std::sync::Arc;
use thermo_codec::gzip::GzipDecoder;
use thermo_codec::template::{content_length, TemplateFiller};
use tracing::debug;

/// The error page template; filled with `$TITLE$`, `$ERROR$` and `$DETAILS$`.
pub static ERROR_HTML: &str = include_str!("../assets/error.html");

/// A replacement value for a template placeholder.
///
/// Dynamic values are produced by a zero-argument closure evaluated once per
/// request, before the content length is computed.
#[derive(Clone)]
pub enum TemplateValue {
    Fixed(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl TemplateValue {
    /// A precomputed value.
    pub fn fixed(value: impl Into<String>) -> Self {
        TemplateValue::Fixed(value.into())
    }

    /// A value computed per request.
    pub fn dynamic(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        TemplateValue::Dynamic(Arc::new(f))
    }

    fn resolve(&self) -> String {
        match self {
            TemplateValue::Fixed(value) => value.clone(),
            TemplateValue::Dynamic(f) => f(),
        }
    }
}

/// Named replacement values for one templated route.
pub type TemplateValues = HashMap<String, TemplateValue>;

/// Evaluate every value once for the current request.
fn resolve_values(values: &TemplateValues) -> HashMap<String, String> {
    values
        .iter()
        .map(|(name, value)| (name.clone(), value.resolve()))
        .collect()
}

fn attach_csp(response: Response, content_type: &str) -> Response {
    if content_type == "text/html" {
        response.with_header("Content-Security-Policy", CSP_VALUE)
    } else {
        response
    }
}

fn attach_cache_headers(response: Response, etag: Option<String>) -> Response {
    match etag {
        Some(tag) => response
            .with_header("ETag", tag)
            .with_header("Cache-Control", CACHE_CONTROL_CACHE),
        None => response.with_header("Cache-Control", CACHE_CONTROL_NOCACHE),
    }
}

fn matches_etag(request: &Request, etag: &str) -> bool {
    request
        .header("If-None-Match")
        .is_some_and(|header| csv_header_contains(header, etag))
}

/// Serve a fixed range verbatim, with optional cache validation.
pub fn static_response(
    request: &Request,
    status: u16,
    content_type: &'static str,
    data: &Arc<[u8]>,
    etag: Option<&str>,
) -> Response {
    let quoted = etag.map(|tag| format!("\"{tag}\""));

    let response = match &quoted {
        Some(tag) if matches_etag(request, tag) => {
            debug!("Client has up-to-date cached page.");
            Response::new(304, content_type, 0, Body::Empty)
        }
        _ => Response::new(status, content_type, data.len(), Body::Static(data.clone())),
    };

    attach_cache_headers(attach_csp(response, content_type), quoted)
}

/// Serve a stored gzip range, negotiated against `Accept-Encoding`.
///
/// Clients accepting gzip get the stored bytes verbatim; everyone else gets
/// them decompressed on the fly, with the content length taken from the gzip
/// trailer before the first byte is produced. A decompressed length of zero
/// is served as an explicit empty static body so the content length is still
/// exact.
pub fn compressed_response(
    request: &Request,
    status: u16,
    content_type: &'static str,
    compressed: &Arc<[u8]>,
    etag: Option<&str>,
    window_bits: i8,
) -> Response {
    let accepts_gzip = request
        .header("Accept-Encoding")
        .is_some_and(|header| csv_header_contains(header, "gzip"));
    if accepts_gzip {
        debug!("Client accepts gzip compressed data.");
    } else {
        debug!("Client doesn't accept gzip compressed data.");
    }

    // The validator differs per encoding so a client switching encodings
    // never matches a validator meant for the other one.
    let enc_etag = etag.map(|tag| {
        if accepts_gzip {
            format!("\"{tag}-gzip\"")
        } else {
            format!("\"{tag}\"")
        }
    });

    let response = match &enc_etag {
        Some(tag) if matches_etag(request, tag) => {
            debug!("Client has up-to-date cached page.");
            let response = Response::new(304, content_type, 0, Body::Empty);
            if accepts_gzip {
                response.with_header("Content-Encoding", "gzip")
            } else {
                response
            }
        }
        _ if accepts_gzip => Response::new(
            status,
            content_type,
            compressed.len(),
            Body::Static(compressed.clone()),
        )
        .with_header("Content-Encoding", "gzip"),
        _ => {
            let decoder = GzipDecoder::from_slice(compressed.clone(), window_bits);
            let length = decoder.decompressed_size().unwrap_or(0) as usize;
            if length == 0 {
                Response::new(status, content_type, 0, Body::Empty)
            } else {
                Response::new(status, content_type, length, Body::Decompress(decoder))
            }
        }
    };

    let response = response.with_header("Vary", "Accept-Encoding");
    attach_cache_headers(attach_csp(response, content_type), enc_etag)
}

/// Serve a template with per-request replacement values.
///
/// Output is request-dependent, so the response always carries `no-store`.
pub fn template_response(
    status: u16,
    content_type: &'static str,
    raw: &Arc<[u8]>,
    values: &TemplateValues,
) -> Response {
    let replacements = resolve_values(values);
    let length = content_length(raw, &replacements);
    let filler = TemplateFiller::new(raw.clone(), replacements);
    let response = Response::new(status, content_type, length, Body::Template(filler))
        .with_header("Cache-Control", CACHE_CONTROL_NOCACHE);
    attach_csp(response, content_type)
}

/// Redirect to another path.
pub fn redirect_response(target: &str) -> Response {
    Response::new(307, "text/plain", 0, Body::Empty).with_header("Location", target.to_string())
}

/// Methods in the order they are listed in `Allow` headers and error pages.
const METHOD_NAMES: [(Methods, &str); 6] = [
    (Methods::GET, "GET"),
    (Methods::POST, "POST"),
    (Methods::PUT, "PUT"),
    (Methods::PATCH, "PATCH"),
    (Methods::DELETE, "DELETE"),
    (Methods::HEAD, "HEAD"),
];

/// `OPTIONS, GET, HEAD, ...` - OPTIONS always leads.
fn allow_header(valid: Methods) -> String {
    let mut allow = String::from("OPTIONS");
    for (flag, name) in METHOD_NAMES {
        if valid.contains(flag) {
            allow.push_str(", ");
            allow.push_str(name);
        }
    }
    allow
}

/// `GET, HEAD, and OPTIONS` - prose version for the error page.
fn allow_prose(valid: Methods) -> String {
    let mut names: Vec<&str> = METHOD_NAMES
        .iter()
        .filter(|(flag, _)| valid.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
    names.push("OPTIONS");

    let mut prose = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            prose.push_str(", ");
            if i == names.len() - 1 {
                prose.push_str("and ");
            }
        }
        prose.push_str(name);
    }
    prose
}

/// Respond to an OPTIONS request with the methods a route supports.
pub fn options_response(valid: Methods) -> Response {
    Response::new(204, "text/plain", 0, Body::Empty).with_header("Allow", allow_header(valid))
}

/// Templated error page used by the 404 and 405 paths.
pub fn error_page_response(status: u16, title: &str, error: &str, details: &str) -> Response {
    let values: TemplateValues = [
        ("TITLE".to_string(), TemplateValue::fixed(title)),
        ("ERROR".to_string(), TemplateValue::fixed(error)),
        ("DETAILS".to_string(), TemplateValue::fixed(details)),
    ]
    .into_iter()
    .collect();
    template_response(status, "text/html", &Arc::from(ERROR_HTML.as_bytes()), &values)
}

/// The 404 page.
pub fn not_found_response(request: &Request) -> Response {
    let response = error_page_response(
        404,
        "Error 404 Not Found",
        "The requested file can not be found on this server!",
        &format!("The page <code>{}</code> couldn't be found.", request.path),
    );
    if request.method == crate::request::Method::Head {
        response.into_head_only()
    } else {
        response
    }
}

/// The fallback for methods a route has no handler for.
pub fn invalid_method_response(valid: Methods, request: &Request) -> Response {
    if request.method == crate::request::Method::Options {
        return options_response(valid);
    }

    let response = error_page_response(
        405,
        "Error 405 Method Not Allowed",
        &format!("The page cannot handle {} requests!", request.method),
        &format!(
            "The page <code>{}</code> can handle the request methods {}.",
            request.path,
            allow_prose(valid)
        ),
    );
    let response = if request.method == crate::request::Method::Head {
        response.into_head_only()
    } else {
        response
    };
    response.with_header("Allow", allow_header(valid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn asset(data: &[u8]) -> Arc<[u8]> {
        data.to_vec().into()
    }

    #[test]
    fn test_static_response_cache_headers() {
        let data = asset(b"body");
        let request = Request::new(Method::Get, "/x");
        let response = static_response(&request, 200, "text/plain", &data, Some("abc"));
        assert_eq!(response.status, 200);
        assert_eq!(response.content_length, 4);
        assert_eq!(response.header("ETag"), Some("\"abc\""));
        assert_eq!(response.header("Cache-Control"), Some(CACHE_CONTROL_CACHE));
    }

    #[test]
    fn test_static_response_without_etag_is_no_store() {
        let data = asset(b"body");
        let request = Request::new(Method::Get, "/x");
        let response = static_response(&request, 200, "text/plain", &data, None);
        assert_eq!(response.header("Cache-Control"), Some(CACHE_CONTROL_NOCACHE));
        assert_eq!(response.header("ETag"), None);
    }

    #[test]
    fn test_static_response_not_modified() {
        let data = asset(b"body");
        let request = Request::new(Method::Get, "/x").with_header("If-None-Match", "\"abc\"");
        let response = static_response(&request, 200, "text/plain", &data, Some("abc"));
        assert_eq!(response.status, 304);
        assert_eq!(response.content_length, 0);
        assert!(matches!(response.body, Body::Empty));
        assert_eq!(response.header("ETag"), Some("\"abc\""));
    }

    #[test]
    fn test_csp_only_on_html() {
        let data = asset(b"<html></html>");
        let request = Request::new(Method::Get, "/x");
        let html = static_response(&request, 200, "text/html", &data, None);
        assert_eq!(html.header("Content-Security-Policy"), Some(CSP_VALUE));
        let css = static_response(&request, 200, "text/css", &data, None);
        assert_eq!(css.header("Content-Security-Policy"), None);
    }

    #[test]
    fn test_redirect_response() {
        let response = redirect_response("/index.html");
        assert_eq!(response.status, 307);
        assert_eq!(response.header("Location"), Some("/index.html"));
        assert_eq!(response.content_length, 0);
    }

    #[test]
    fn test_allow_header_order() {
        assert_eq!(allow_header(Methods::GET), "OPTIONS, GET");
        assert_eq!(
            allow_header(Methods::GET | Methods::HEAD),
            "OPTIONS, GET, HEAD"
        );
    }

    #[test]
    fn test_allow_prose_uses_and() {
        assert_eq!(allow_prose(Methods::GET), "GET, and OPTIONS");
        assert_eq!(
            allow_prose(Methods::GET | Methods::HEAD),
            "GET, HEAD, and OPTIONS"
        );
    }

    #[test]
    fn test_error_page_length_matches_template_law() {
        let response = error_page_response(404, "T", "E", "D");
        let expected = ERROR_HTML.len() as i64
            + 2 * (1 - "$TITLE$".len() as i64)
            + (1 - "$ERROR$".len() as i64)
            + (1 - "$DETAILS$".len() as i64);
        assert_eq!(response.content_length as i64, expected);
    }

    #[test]
    fn test_template_response_resolves_dynamic_values_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_value = calls.clone();
        let values: TemplateValues = [(
            "N".to_string(),
            TemplateValue::dynamic(move || {
                calls_in_value.fetch_add(1, Ordering::Relaxed);
                "7".to_string()
            }),
        )]
        .into_iter()
        .collect();

        let raw: Arc<[u8]> = b"n=$N$".to_vec().into();
        let mut response = template_response(200, "text/plain", &raw, &values);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(response.content_length, 3);

        let mut buf = [0u8; 3];
        assert_eq!(response.body.produce(&mut buf, 0), crate::response::Produce::Bytes(3));
        assert_eq!(&buf, b"n=7");
        // Producing bytes never re-evaluates the closure.
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
