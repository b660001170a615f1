//! Weft: session rendering and event-dispatch core for server-side widget UIs.
//!
//! # Overview
//!
//! Weft renders stateful, event-driven user interfaces to HTML/JavaScript
//! over HTTP, giving server-side application code a desktop-like widget-tree
//! programming model. The crate is the framework *core*: it multiplexes
//! HTTP/WebSocket requests onto per-user sessions, tracks widget dirty state
//! across competing update sources (browser events, server pushes, resource
//! streaming), and serializes the minimal correct set of DOM mutations back
//! to the client while preserving strict ordering and security invariants.
//!
//! # Core Guarantees
//!
//! - **Session-level serialization**: exactly one thread executes against a
//!   session at a time; application code is single-threaded from its own
//!   point of view
//! - **Atomic update batches**: all DOM mutations from one event-processing
//!   pass are flushed as a single JavaScript block, never interleaved
//! - **Capability-checked requests**: every stateful request must present
//!   the session's unguessable id; update acknowledgements are validated
//!   against a monotonic sequence with a bounded backward window
//! - **Safe widget references**: dirty tracking is keyed by generation-
//!   checked handles, so a reference to a removed widget is a detectable
//!   no-op rather than undefined behavior
//! - **Learned client-side replays**: stateless event handlers are executed
//!   once, their DOM diff recorded and undone, and the captured script
//!   replayed client-side without a server round-trip
//!
//! # Module Structure
//!
//! - [`config`]: deployment configuration (timeouts, limits, tracking)
//! - [`controller`]: session table, request routing, expiry, worker pool
//! - [`error`]: error types and classification
//! - [`http`]: normalized request/response pair and parameter parsing
//! - [`render`]: dirty-widget tracking, DOM diffing, update batches
//! - [`resource`]: streamed resources and response continuations
//! - [`session`]: the per-client session state machine and handler lock
//! - [`signal`]: event-signal registry and dispatch metadata
//! - [`util`]: generation-checked arena, secure token generation
//! - [`widget`]: the handle-based widget tree
//! - [`websocket`]: RFC 6455 upgrade handling for established sessions

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod render;
pub mod resource;
pub mod session;
pub mod signal;
pub mod test_utils;
pub mod util;
pub mod websocket;
pub mod widget;

pub use config::{Configuration, SessionTracking};
pub use controller::Controller;
pub use error::{Error, ErrorKind, Result};
pub use http::{Method, Request, ResponseKind, ResponseWriter};
pub use session::{AppContext, Application, Environment, Handler, Session, SessionState};
pub use widget::{WidgetId, WidgetTree};

/// JavaScript namespace object the client runtime is addressed through.
///
/// Every emitted statement that calls into the client runtime is prefixed
/// with this class, e.g. `Weft._p_.setTitle(...)`.
pub const JS_CLASS: &str = "Weft";
