//! Route registry and dispatch.
//!
//! Routes are registered once at startup and never removed; there is at most
//! one entry per uri and paths are literals, never patterns. Dispatch picks
//! the handler for the request method, falls back to the synthesized
//! OPTIONS/405 responses for unhandled methods, and sends unknown paths to
//! the templated 404 page. Every dispatch, successful or fallback, counts
//! into the `(path, method, resulting status)` statistics.

use crate::handlers::{
    compressed_response, invalid_method_response, not_found_response, options_response,
    redirect_response, static_response, template_response, TemplateValues,
};
use crate::request::{Method, Request};
use crate::response::Response;
use crate::stats::RequestStats;
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

bitflags! {
    /// A set of HTTP request methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Methods: u8 {
        const GET = 0b0000_0001;
        const POST = 0b0000_0010;
        const DELETE = 0b0000_0100;
        const PUT = 0b0000_1000;
        const PATCH = 0b0001_0000;
        const HEAD = 0b0010_0000;
        const OPTIONS = 0b0100_0000;
    }
}

impl Methods {
    /// The flag for a single method.
    pub fn from_method(method: Method) -> Self {
        match method {
            Method::Get => Methods::GET,
            Method::Post => Methods::POST,
            Method::Delete => Methods::DELETE,
            Method::Put => Methods::PUT,
            Method::Patch => Methods::PATCH,
            Method::Head => Methods::HEAD,
            Method::Options => Methods::OPTIONS,
        }
    }

    fn slot(method: Method) -> usize {
        Self::from_method(method).bits().trailing_zeros() as usize
    }
}

/// A request handler producing a complete response.
pub type HandlerFn = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Handlers for one literal uri, one optional slot per method.
#[derive(Default)]
struct RouteEntry {
    handlers: [Option<HandlerFn>; 7],
    /// Whether the HEAD slot holds the synthesized GET wrapper rather than
    /// an explicitly registered handler.
    auto_head: bool,
}

impl RouteEntry {
    fn handler(&self, method: Method) -> Option<&HandlerFn> {
        self.handlers[Methods::slot(method)].as_ref()
    }

    fn set(&mut self, method: Method, handler: HandlerFn) {
        self.handlers[Methods::slot(method)] = Some(handler);
    }

    /// The set of explicitly registered methods. The auto-installed HEAD
    /// variant answers requests but is not advertised.
    fn methods(&self) -> Methods {
        let mut methods = Methods::empty();
        for method in [
            Method::Get,
            Method::Post,
            Method::Delete,
            Method::Put,
            Method::Patch,
            Method::Head,
            Method::Options,
        ] {
            if self.handlers[Methods::slot(method)].is_some() {
                methods |= Methods::from_method(method);
            }
        }
        if self.auto_head {
            methods -= Methods::HEAD;
        }
        methods
    }
}

/// The route table.
///
/// Created once at startup; dispatch only reads it. The counters are shared
/// out via [`Registry::stats`] for the metrics serializer.
pub struct Registry {
    routes: HashMap<String, RouteEntry>,
    stats: Arc<RequestStats>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            stats: Arc::new(RequestStats::new()),
        }
    }

    /// The shared request counters.
    pub fn stats(&self) -> Arc<RequestStats> {
        self.stats.clone()
    }

    /// Register a handler for a set of methods on a literal uri.
    ///
    /// Registering a set that includes GET auto-installs a HEAD variant that
    /// reuses the GET handler's status and headers while suppressing the
    /// body, unless HEAD already has a handler.
    pub fn register(&mut self, uri: &str, methods: Methods, handler: HandlerFn) {
        let entry = self.routes.entry(uri.to_string()).or_default();
        for method in [
            Method::Get,
            Method::Post,
            Method::Delete,
            Method::Put,
            Method::Patch,
            Method::Head,
            Method::Options,
        ] {
            if methods.contains(Methods::from_method(method)) {
                entry.set(method, handler.clone());
            }
        }
        if methods.contains(Methods::HEAD) {
            entry.auto_head = false;
        }

        if methods.contains(Methods::GET) && entry.handler(Method::Head).is_none() {
            let get_handler = handler.clone();
            entry.set(
                Method::Head,
                Arc::new(move |request| get_handler(request).into_head_only()),
            );
            entry.auto_head = true;
        }

        debug!(uri, ?methods, "Registered route handler.");
    }

    /// Register a GET handler serving a fixed range.
    pub fn register_static(
        &mut self,
        uri: &str,
        content_type: &'static str,
        data: Arc<[u8]>,
        etag: Option<String>,
    ) {
        self.register(
            uri,
            Methods::GET,
            Arc::new(move |request| {
                static_response(request, 200, content_type, &data, etag.as_deref())
            }),
        );
    }

    /// Register a GET handler serving a stored gzip range with content
    /// negotiation.
    pub fn register_compressed_static(
        &mut self,
        uri: &str,
        content_type: &'static str,
        compressed: Arc<[u8]>,
        etag: Option<String>,
        window_bits: i8,
    ) {
        self.register(
            uri,
            Methods::GET,
            Arc::new(move |request| {
                compressed_response(
                    request,
                    200,
                    content_type,
                    &compressed,
                    etag.as_deref(),
                    window_bits,
                )
            }),
        );
    }

    /// Register a GET handler serving a template with per-request values.
    pub fn register_template(
        &mut self,
        uri: &str,
        content_type: &'static str,
        raw: Arc<[u8]>,
        values: TemplateValues,
    ) {
        self.register(
            uri,
            Methods::GET,
            Arc::new(move |_request| template_response(200, content_type, &raw, &values)),
        );
    }

    /// Register a redirect for every method on a uri.
    pub fn register_redirect(&mut self, uri: &str, target: &str) {
        let target = target.to_string();
        self.register(
            uri,
            Methods::all(),
            Arc::new(move |_request| redirect_response(&target)),
        );
    }

    /// Register the server-wide `OPTIONS *` route advertising the given
    /// method support.
    pub fn register_server_options(&mut self, methods: Methods) {
        self.register(
            "*",
            Methods::OPTIONS,
            Arc::new(move |_request| options_response(methods)),
        );
    }

    /// Resolve a request to a response and count it under the resulting
    /// status.
    pub fn dispatch(&self, request: &Request) -> Response {
        let response = self.resolve(request);
        self.stats
            .increment(&request.path, request.method, response.status);
        debug!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            content_length = response.content_length,
            "Handled request."
        );
        response
    }

    fn resolve(&self, request: &Request) -> Response {
        match self.routes.get(&request.path) {
            Some(entry) => match entry.handler(request.method) {
                Some(handler) => handler(request),
                None => {
                    info!(
                        path = %request.path,
                        method = %request.method,
                        "Received a request with an unhandled method."
                    );
                    invalid_method_response(entry.methods(), request)
                }
            },
            None => {
                info!(path = %request.path, "A client tried to access a non-existing file.");
                not_found_response(request)
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
