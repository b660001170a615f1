//! Request and response-writer pair.
//!
//! A [`Request`] is a fully read, normalized inbound message: method, path,
//! headers, raw body, and — after parameter parsing — the decoded parameter
//! map and uploaded files. A [`ResponseWriter`] is its paired outbound
//! channel, flushed exactly once; the session machinery may detach it from
//! the servicing thread (long-poll, WebSocket push, continuations) and flush
//! it later from a different one.

use crate::http::types::{default_reason, Method, ResponseKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A file received through a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// File name as reported by the client.
    pub client_filename: String,
    /// Content type of the part.
    pub content_type: String,
    /// The file payload.
    pub data: Vec<u8>,
}

/// A normalized inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    path_info: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    client_address: String,
    websocket_upgrade: bool,
    websocket_message: bool,
    params: HashMap<String, Vec<String>>,
    uploads: HashMap<String, Vec<UploadedFile>>,
    post_data_exceeded: usize,
}

impl Request {
    /// Starts building a request (primarily for embedding listeners/tests).
    #[must_use]
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            request: Self {
                method,
                path: path.into(),
                path_info: String::new(),
                query: String::new(),
                headers: Vec::new(),
                body: Vec::new(),
                client_address: "127.0.0.1".to_owned(),
                websocket_upgrade: false,
                websocket_message: false,
                params: HashMap::new(),
                uploads: HashMap::new(),
                post_data_exceeded: 0,
            },
        }
    }

    /// The request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// The request path (deployment path portion).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Trailing internal path info, if any.
    #[must_use]
    pub fn path_info(&self) -> &str {
        &self.path_info
    }

    /// The raw query string.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The raw body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The client's network address, as reported by the listener.
    #[must_use]
    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    /// Returns the first header with the given name (case-insensitive).
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value of a decoded parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Returns all values of a decoded parameter.
    #[must_use]
    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.params.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns the files uploaded under the given parameter name.
    #[must_use]
    pub fn uploaded_files(&self, name: &str) -> &[UploadedFile] {
        self.uploads.get(name).map_or(&[], Vec::as_slice)
    }

    /// Bytes by which accumulated form data exceeded the configured
    /// maximum, or 0 when within limits.
    #[must_use]
    pub const fn post_data_exceeded(&self) -> usize {
        self.post_data_exceeded
    }

    /// Whether this request asks for a WebSocket upgrade.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.websocket_upgrade
            || (self
                .header_value("Upgrade")
                .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
                && self
                    .header_value("Connection")
                    .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade")))
    }

    /// Whether this request is an inbound frame on an established socket.
    #[must_use]
    pub const fn is_websocket_message(&self) -> bool {
        self.websocket_message
    }

    pub(crate) fn insert_parameter(&mut self, name: String, value: String) {
        self.params.entry(name).or_default().push(value);
    }

    pub(crate) fn insert_upload(&mut self, name: String, file: UploadedFile) {
        self.uploads.entry(name).or_default().push(file);
    }

    pub(crate) fn set_post_data_exceeded(&mut self, by: usize) {
        self.post_data_exceeded = by;
    }
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Sets the raw query string (still subject to parameter parsing).
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.request.query = query.into();
        self
    }

    /// Appends a `name=value` pair to the query string, percent-encoding
    /// the value.
    #[must_use]
    pub fn param(mut self, name: &str, value: &str) -> Self {
        if !self.request.query.is_empty() {
            self.request.query.push('&');
        }
        self.request.query.push_str(name);
        self.request.query.push('=');
        self.request.query.push_str(&percent_encode(value));
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Sets the trailing internal path.
    #[must_use]
    pub fn path_info(mut self, path_info: impl Into<String>) -> Self {
        self.request.path_info = path_info.into();
        self
    }

    /// Sets the client address.
    #[must_use]
    pub fn client_address(mut self, address: impl Into<String>) -> Self {
        self.request.client_address = address.into();
        self
    }

    /// Marks the request as an inbound WebSocket message.
    #[must_use]
    pub fn websocket_message(mut self) -> Self {
        self.request.websocket_message = true;
        self
    }

    /// Marks the request as a WebSocket upgrade.
    #[must_use]
    pub fn websocket_upgrade(mut self) -> Self {
        self.request.websocket_upgrade = true;
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                use std::fmt::Write;
                write!(out, "%{b:02X}").expect("writing to string cannot fail");
            }
        }
    }
    out
}

/// A fully flushed response, as delivered to the embedding listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Content type.
    pub content_type: String,
    /// Response headers (Set-Cookie and friends).
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: String,
}

type Sink = Box<dyn FnOnce(FlushedResponse) + Send>;

/// Buffered response writer, flushed exactly once.
///
/// The writer may be detached from the thread that created it and flushed
/// later (long-poll responses, push updates, resource continuations). If it
/// is dropped without an explicit flush, whatever was written is flushed on
/// drop — the fail-safe that guarantees every request is terminated.
pub struct ResponseWriter {
    kind: ResponseKind,
    status: u16,
    content_type: String,
    headers: Vec<(String, String)>,
    body: String,
    sink: Option<Sink>,
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl ResponseWriter {
    /// Creates a writer of the given kind delivering into `sink` on flush.
    #[must_use]
    pub fn new(kind: ResponseKind, sink: impl FnOnce(FlushedResponse) + Send + 'static) -> Self {
        Self {
            kind,
            status: 200,
            content_type: String::new(),
            headers: Vec::new(),
            body: String::new(),
            sink: Some(Box::new(sink)),
        }
    }

    /// Creates a writer whose flushed response can be observed through the
    /// returned [`ResponseProbe`]. Intended for tests and embedding shims.
    #[must_use]
    pub fn probe(kind: ResponseKind) -> (Self, ResponseProbe) {
        let slot: Arc<Mutex<Option<FlushedResponse>>> = Arc::new(Mutex::new(None));
        let probe = ResponseProbe { slot: slot.clone() };
        let writer = Self::new(kind, move |flushed| {
            *slot.lock().expect("response probe lock poisoned") = Some(flushed);
        });
        (writer, probe)
    }

    /// The response kind this writer was created for.
    #[must_use]
    pub const fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Overrides the response kind (bootstrap upgrades a page writer to a
    /// script writer for the follow-up request).
    pub fn set_kind(&mut self, kind: ResponseKind) {
        self.kind = kind;
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Returns the current status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Sets the content type.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    /// Adds a response header.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Redirects to `url` (302 + Location).
    pub fn set_redirect(&mut self, url: impl Into<String>) {
        self.status = 302;
        self.headers.push(("Location".to_owned(), url.into()));
    }

    /// Appends text to the response body.
    pub fn write(&mut self, text: &str) {
        self.body.push_str(text);
    }

    /// Current body length in bytes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Flushes the response, consuming the writer.
    pub fn flush(mut self) {
        self.do_flush();
    }

    fn do_flush(&mut self) {
        if let Some(sink) = self.sink.take() {
            let flushed = FlushedResponse {
                status: self.status,
                reason: default_reason(self.status).to_owned(),
                content_type: std::mem::take(&mut self.content_type),
                headers: std::mem::take(&mut self.headers),
                body: std::mem::take(&mut self.body),
            };
            sink(flushed);
        }
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        self.do_flush();
    }
}

/// Observer handle for a [`ResponseWriter`] created with
/// [`ResponseWriter::probe`].
#[derive(Clone)]
pub struct ResponseProbe {
    slot: Arc<Mutex<Option<FlushedResponse>>>,
}

impl ResponseProbe {
    /// Whether the paired writer has flushed.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.slot
            .lock()
            .expect("response probe lock poisoned")
            .is_some()
    }

    /// Returns a clone of the flushed response, if any.
    #[must_use]
    pub fn get(&self) -> Option<FlushedResponse> {
        self.slot
            .lock()
            .expect("response probe lock poisoned")
            .clone()
    }
}

impl std::fmt::Debug for ResponseProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseProbe")
            .field("flushed", &self.is_flushed())
            .finish()
    }
}
