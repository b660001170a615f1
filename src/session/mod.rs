//! The per-client session state machine.
//!
//! One [`Session`] exists per browser tab, keyed by an unguessable id that
//! doubles as the CSRF capability token. The session owns the environment
//! snapshot, the widget tree, the signal registry, and the renderer, and it
//! routes every parsed request to resource streaming, signal processing, or
//! page/script rendering.
//!
//! # Locking
//!
//! All mutable session state lives behind one mutex, acquired by a
//! [`Handler`] for the duration of a request or callback: application code
//! is single-threaded from its own point of view. The event queue has its
//! own short-hold lock so any thread can enqueue work; queued events are
//! drained by the departing handler before the session lock is released.
//!
//! # Lifecycle
//!
//! States move strictly forward: `JustCreated` → `ExpectLoad` → `Loaded` →
//! `Dead`, with `Dead` absorbing. A session dies on explicit quit, idle
//! expiry, an unhandled application failure, or a detected hijack attempt
//! (user-agent or address change without cookie proof).
//!
//! # Suspended event loops
//!
//! A modal interaction suspends the current dispatch by storing an explicit
//! continuation on the session rather than blocking the servicing thread.
//! The next named-signal request for the session is first processed
//! normally, then resumes the most recent continuation with its event. If
//! the session is killed first, every outstanding continuation is resumed
//! with [`ResumeEvent::SessionKilled`] — a suspended wait never hangs.

pub mod env;
pub mod event;
pub mod handler;

pub use env::Environment;
pub use event::QueuedEvent;
pub use handler::{Handler, LockMode};

use crate::config::{Configuration, SessionTracking};
use crate::error::{Error, ErrorCategory, ErrorKind, Result};
use crate::http::{Method, Request, ResponseKind, ResponseWriter};
use crate::render::{AckState, PageState, Renderer, SlotKind};
use crate::resource::{Resource, ResourceContext, ResponseContinuation};
use crate::signal::{JsEvent, SignalId, SignalRegistry};
use crate::util::token::generate_token;
use crate::websocket;
use crate::widget::WidgetTree;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::controller::pool::PoolMonitor;

/// Session lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Created; the client has not yet completed bootstrap.
    JustCreated,
    /// Application instantiated, awaiting the client's load confirmation.
    ExpectLoad,
    /// Interactive.
    Loaded,
    /// Terminal and absorbing; all further requests are answered with a
    /// client-side reload.
    Dead,
}

/// The application callback interface.
///
/// Constructed exactly once per session through the factory; receives an
/// [`AppContext`] view of the session for every invocation.
pub trait Application: Send {
    /// Builds the initial widget tree and connects signals.
    fn start(&mut self, cx: &mut AppContext<'_>) -> Result<()>;

    /// Called when a request's post data exceeded the configured maximum.
    fn request_too_large(&mut self, _cx: &mut AppContext<'_>, _bytes: usize) {}

    /// Called when the client navigates to a new internal path.
    fn internal_path_changed(&mut self, _cx: &mut AppContext<'_>, _path: &str) {}

    /// Validates the response puzzle presented with the load signal.
    /// Only consulted when the deployment requires one.
    fn response_puzzle_ok(&mut self, _request: &Request) -> bool {
        true
    }
}

/// Constructs the application for a new session.
pub type AppFactory = Arc<dyn Fn(&Environment) -> Box<dyn Application> + Send + Sync>;

/// Why a suspended event loop was resumed.
pub enum ResumeEvent {
    /// A follow-up client event arrived.
    Event(JsEvent),
    /// The session was killed while the suspension was outstanding.
    SessionKilled,
}

impl std::fmt::Debug for ResumeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(e) => f.debug_tuple("Event").field(e).finish(),
            Self::SessionKilled => f.write_str("SessionKilled"),
        }
    }
}

/// A stored modal-loop continuation.
pub type Continuation = Box<dyn FnOnce(&mut AppContext<'_>, ResumeEvent) + Send>;

/// The session credential presented by a request, extracted once and
/// validated by one policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    url_id: Option<String>,
    cookie_id: Option<String>,
    proof: Option<String>,
}

/// Name of the session tracking cookie.
pub const TRACKING_COOKIE: &str = "weftsid";
/// Name of the secondary proof cookie used by combined tracking and the
/// address-change exception.
pub const PROOF_COOKIE: &str = "weftproof";

impl SessionCredential {
    /// Extracts the credential from a request.
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        let cookies = request.header_value("Cookie").unwrap_or("");
        Self {
            url_id: request.parameter("wtd").map(str::to_owned),
            cookie_id: cookie_value(cookies, TRACKING_COOKIE),
            proof: cookie_value(cookies, PROOF_COOKIE),
        }
    }

    /// Validates the credential against the session's current id under the
    /// configured tracking policy.
    #[must_use]
    pub fn validates(
        &self,
        tracking: SessionTracking,
        session_id: &str,
        expected_proof: Option<&str>,
    ) -> bool {
        let url_ok = self.url_id.as_deref() == Some(session_id);
        let cookie_ok = self.cookie_id.as_deref() == Some(session_id);
        match tracking {
            SessionTracking::Url => url_ok,
            SessionTracking::CookiesUrl => url_ok || cookie_ok,
            SessionTracking::Combined => {
                url_ok
                    && match expected_proof {
                        Some(proof) => self.proof.as_deref() == Some(proof),
                        None => true,
                    }
            }
        }
    }

    /// The proof-cookie value presented, if any.
    #[must_use]
    pub fn proof(&self) -> Option<&str> {
        self.proof.as_deref()
    }
}

fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').map(str::trim).find_map(|pair| {
        pair.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::to_owned)
    })
}

/// The view of a session handed to application callbacks.
pub struct AppContext<'a> {
    /// The widget tree.
    pub tree: &'a mut WidgetTree,
    /// The signal registry.
    pub signals: &'a mut SignalRegistry,
    /// Page-level state: title, internal path, quit, redirect.
    pub page: &'a mut PageState,
    renderer: &'a mut Renderer,
    suspensions: &'a mut Vec<Continuation>,
    resume_requests: &'a mut Vec<String>,
    resources: &'a mut HashMap<String, Box<dyn Resource>>,
    trigger_update: &'a mut bool,
    defer_count: &'a mut u32,
    regenerate_id: &'a mut bool,
    pool: Option<Arc<PoolMonitor>>,
    state: SessionState,
}

impl AppContext<'_> {
    /// Marks a widget as needing reconciliation.
    pub fn need_update(&mut self, widget: crate::widget::WidgetId) {
        self.renderer.need_update(widget);
    }

    /// The session's lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Suspends the current event dispatch, to be resumed by the next
    /// named-signal request for this session (a modal interaction).
    ///
    /// Fails with [`ErrorKind::NoIdleWorker`] when no worker would remain
    /// to service the resume — a capacity misconfiguration that must fail
    /// loudly rather than leave the client hanging.
    pub fn suspend(
        &mut self,
        continuation: impl FnOnce(&mut AppContext<'_>, ResumeEvent) + Send + 'static,
    ) -> Result<()> {
        if let Some(pool) = &self.pool {
            if pool.idle_workers() == 0 {
                return Err(Error::with_context(
                    ErrorKind::NoIdleWorker,
                    "all workers are busy; avoid suspended event loops near capacity",
                ));
            }
        }
        self.suspensions.push(Box::new(continuation));
        Ok(())
    }

    /// Requests a server push: the accumulated changes are flushed to the
    /// client over the open push channel when the current handler ends.
    pub fn trigger_update(&mut self) {
        *self.trigger_update = true;
    }

    /// Postpones the response for the current event pass. May nest.
    pub fn defer_rendering(&mut self) {
        *self.defer_count += 1;
    }

    /// Undoes one [`defer_rendering`](Self::defer_rendering); the stashed
    /// response is rendered when the count reaches zero.
    pub fn resume_rendering(&mut self) {
        *self.defer_count = self.defer_count.saturating_sub(1);
    }

    /// Exposes a streamed resource under `name`.
    pub fn expose_resource(&mut self, name: &str, resource: Box<dyn Resource>) {
        self.resources.insert(name.to_owned(), resource);
    }

    /// Resumes a resource's parked continuation (more data is available).
    pub fn resume_resource(&mut self, name: &str) {
        self.resume_requests.push(name.to_owned());
    }

    /// Rotates the session id after the next render (e.g. after login).
    pub fn request_new_session_id(&mut self) {
        *self.regenerate_id = true;
    }
}

pub(crate) struct SessionInner {
    pub(crate) state: SessionState,
    pub(crate) session_id: String,
    session_proof: Option<String>,
    config: Arc<Configuration>,
    factory: AppFactory,
    pub(crate) env: Environment,
    expires_at: Instant,
    pub(crate) renderer: Renderer,
    pub(crate) tree: WidgetTree,
    pub(crate) signals: SignalRegistry,
    pub(crate) page: PageState,
    resources: HashMap<String, Box<dyn Resource>>,
    resume_requests: Vec<String>,
    continuations: Vec<ResponseContinuation>,
    app: Option<Box<dyn Application>>,
    started: bool,
    async_response: Option<ResponseWriter>,
    async_parked_at: Option<Instant>,
    websocket_sink: Option<Box<dyn FnMut(String) + Send>>,
    ws_connected: bool,
    poll_requests_ignored: u32,
    deferred_response: Option<ResponseWriter>,
    defer_count: u32,
    suspensions: Vec<Continuation>,
    updates_pending: bool,
    trigger_update: bool,
    regenerate_id: bool,
    pool: Option<Arc<PoolMonitor>>,
}

impl SessionInner {
    pub(crate) fn app_context(&mut self) -> AppContext<'_> {
        AppContext {
            tree: &mut self.tree,
            signals: &mut self.signals,
            page: &mut self.page,
            renderer: &mut self.renderer,
            suspensions: &mut self.suspensions,
            resume_requests: &mut self.resume_requests,
            resources: &mut self.resources,
            trigger_update: &mut self.trigger_update,
            defer_count: &mut self.defer_count,
            regenerate_id: &mut self.regenerate_id,
            pool: self.pool.clone(),
            state: self.state,
        }
    }

    fn sync_dirty(&mut self) {
        self.renderer.sync_dirty(&mut self.tree, &mut self.signals);
    }

    fn take_async_response(&mut self) -> Option<ResponseWriter> {
        self.async_parked_at = None;
        self.async_response.take()
    }

    fn park_async_response(&mut self, response: Option<ResponseWriter>) {
        self.async_parked_at = response.as_ref().map(|_| Instant::now());
        self.async_response = response;
    }

    fn save_changes(&mut self) {
        self.renderer.save_changes(&mut self.tree, &mut self.page);
    }

    fn discard_changes(&mut self) {
        self.renderer.discard_changes(&mut self.tree, &mut self.page);
    }

    fn set_state(&mut self, state: SessionState, timeout: Duration) {
        if self.state == SessionState::Dead {
            return;
        }
        if state < self.state {
            tracing::warn!(from = ?self.state, to = ?state, "ignoring backward state transition");
            return;
        }
        self.state = state;
        self.expires_at = Instant::now() + timeout;
    }

    fn set_loaded(&mut self) {
        self.set_state(
            SessionState::Loaded,
            self.config.session_timeout_duration(),
        );
    }

    fn set_expect_load(&mut self) {
        if self.env.ajax() {
            self.set_state(
                SessionState::ExpectLoad,
                self.config.bootstrap_timeout_duration(),
            );
        } else {
            self.set_loaded();
        }
    }

    fn refresh_expiry(&mut self) {
        let timeout = if self.state == SessionState::Loaded {
            self.config.session_timeout_duration()
        } else {
            self.config.bootstrap_timeout_duration()
        };
        self.expires_at = Instant::now() + timeout;
    }

    /// Kills the session: terminal, absorbing, and wakes every outstanding
    /// suspension with a session-killed failure.
    pub(crate) fn kill(&mut self) {
        if self.state == SessionState::Dead {
            return;
        }
        self.state = SessionState::Dead;
        tracing::info!(session = %self.session_id, "session killed");

        while let Some(continuation) = self.suspensions.pop() {
            let mut cx = self.app_context();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                continuation(&mut cx, ResumeEvent::SessionKilled);
            }));
            if outcome.is_err() {
                tracing::debug!("suspension raised on session kill");
            }
        }

        for continuation in self.continuations.drain(..) {
            continuation.abort();
        }
        if let Some(response) = self.take_async_response() {
            response.flush();
        }
        self.websocket_sink = None;
        self.ws_connected = false;
    }

    fn start_application(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        let factory = self.factory.clone();
        let mut app = factory(&self.env);
        let outcome = {
            let mut cx = self.app_context();
            catch_unwind(AssertUnwindSafe(|| app.start(&mut cx)))
        };
        self.app = Some(app);
        self.sync_dirty();
        match outcome {
            Ok(result) => result,
            Err(panic) => Err(Error::with_context(
                ErrorKind::Application,
                panic_message(&panic),
            )),
        }
    }

    fn with_app<R>(
        &mut self,
        f: impl FnOnce(&mut dyn Application, &mut AppContext<'_>) -> R,
    ) -> Option<R> {
        let mut app = self.app.take()?;
        let result = {
            let mut cx = self.app_context();
            catch_unwind(AssertUnwindSafe(|| f(app.as_mut(), &mut cx)))
        };
        self.app = Some(app);
        self.sync_dirty();
        match result {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!("application callback panicked");
                None
            }
        }
    }

    fn session_query(&self) -> String {
        format!("?wtd={}", self.session_id)
    }

    /// Rotates the session id once something has been rendered.
    fn regenerate_session_id(&mut self) -> Option<String> {
        if !self.renderer.is_rendered() {
            return None;
        }
        let old = self.session_id.clone();
        self.session_id = generate_token(self.config.session_id_length);
        tracing::info!(old = %old, "new session id");

        let secure = self.env.url_scheme() == "https";
        if self.config.session_tracking != SessionTracking::Url {
            self.renderer
                .set_cookie(TRACKING_COOKIE, &self.session_id.clone(), secure);
        }
        let proof = generate_token(self.config.session_id_length);
        self.renderer.set_cookie(PROOF_COOKIE, &proof, secure);
        self.session_proof = Some(proof);
        Some(old)
    }

    fn drain_resource_resumes(&mut self) {
        while let Some(name) = {
            let mut requests = std::mem::take(&mut self.resume_requests);
            let next = if requests.is_empty() {
                None
            } else {
                Some(requests.remove(0))
            };
            self.resume_requests = requests;
            next
        } {
            let Some(position) = self
                .continuations
                .iter()
                .position(|c| c.resource_name() == name)
            else {
                continue;
            };
            let continuation = self.continuations.remove(position);
            let (resource_name, request, mut response) = continuation.into_parts();
            let Some(mut resource) = self.resources.remove(&resource_name) else {
                response.flush();
                continue;
            };
            let mut cx = ResourceContext::new(true);
            let outcome = resource.handle_request(&request, &mut response, &mut cx);
            if outcome.is_ok() && cx.continuation_requested() {
                self.continuations
                    .push(ResponseContinuation::new(resource_name.clone(), request, response));
            } else {
                response.flush();
            }
            self.resources.insert(resource_name, resource);
        }
    }

    fn push_updates(&mut self) {
        if self.state == SessionState::Dead {
            return;
        }
        if self.ws_connected && self.websocket_sink.is_some() {
            let update = {
                let Self {
                    renderer,
                    tree,
                    signals,
                    page,
                    ..
                } = self;
                renderer.assemble_update(tree, signals, page)
            };
            if let Some(sink) = &mut self.websocket_sink {
                sink(update);
            }
            self.updates_pending = false;
        } else if self.async_response.is_some() {
            let update = {
                let Self {
                    renderer,
                    tree,
                    signals,
                    page,
                    ..
                } = self;
                renderer.assemble_update(tree, signals, page)
            };
            let mut response = self.take_async_response().expect("checked above");
            response.set_content_type("text/javascript; charset=UTF-8");
            self.renderer.apply_cookies(&mut response);
            response.write(&update);
            response.flush();
            self.updates_pending = false;
        } else {
            // No channel open; the client's next poll collects the batch.
            self.updates_pending = true;
        }
    }
}

/// One logical client connection: state machine, widget tree, renderer.
pub struct Session {
    inner: Mutex<SessionInner>,
    handlers: Mutex<Vec<u64>>,
    next_handler_id: AtomicU64,
    event_queue: Mutex<VecDeque<QueuedEvent>>,
}

impl Session {
    /// Creates a session for its first request.
    #[must_use]
    pub fn new(
        session_id: String,
        config: Arc<Configuration>,
        factory: AppFactory,
        request: &Request,
    ) -> Self {
        let env = Environment::from_request(request);
        let mut renderer = Renderer::new(config.two_phase_threshold);

        let secure = env.url_scheme() == "https";
        if config.session_tracking != SessionTracking::Url {
            renderer.set_cookie(TRACKING_COOKIE, &session_id, secure);
        }
        let session_proof = if config.session_tracking == SessionTracking::Combined {
            let proof = generate_token(config.session_id_length);
            renderer.set_cookie(PROOF_COOKIE, &proof, secure);
            Some(proof)
        } else {
            None
        };

        let expires_at = Instant::now() + config.bootstrap_timeout_duration();
        tracing::info!(session = %session_id, agent = %env.user_agent(), "session created");

        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::JustCreated,
                session_id,
                session_proof,
                config,
                factory,
                env,
                expires_at,
                renderer,
                tree: WidgetTree::new(),
                signals: SignalRegistry::new(),
                page: PageState::new(),
                resources: HashMap::new(),
                resume_requests: Vec::new(),
                continuations: Vec::new(),
                app: None,
                started: false,
                async_response: None,
                async_parked_at: None,
                websocket_sink: None,
                ws_connected: false,
                poll_requests_ignored: 0,
                deferred_response: None,
                defer_count: 0,
                suspensions: Vec::new(),
                updates_pending: false,
                trigger_update: false,
                regenerate_id: false,
                pool: None,
            }),
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            event_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session lock poisoned")
    }

    pub(crate) fn try_lock_inner(&self) -> Option<MutexGuard<'_, SessionInner>> {
        self.inner.try_lock().ok()
    }

    pub(crate) fn next_handler_id(&self) -> u64 {
        self.next_handler_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_handler(&self, id: u64) {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .push(id);
    }

    pub(crate) fn deregister_handler(&self, id: u64) {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .retain(|h| *h != id);
    }

    /// Number of handlers currently holding or queued on the lock.
    #[must_use]
    pub fn locked_handler_count(&self) -> usize {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .len()
    }

    /// The session's current id.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.lock_inner().session_id.clone()
    }

    /// The session's lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock_inner().state
    }

    /// Whether the session is dead.
    ///
    /// Non-blocking: a session whose lock is held by an active handler is
    /// reported alive — it cannot have died without that handler noticing,
    /// and routing must never stall behind one busy session.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.try_lock_inner()
            .is_some_and(|inner| inner.state == SessionState::Dead)
    }

    /// Whether the session's expiry deadline has passed.
    ///
    /// Non-blocking: a session busy with a request just refreshed its
    /// deadline and reports unexpired.
    #[must_use]
    pub fn expired(&self, now: Instant) -> bool {
        self.try_lock_inner()
            .is_some_and(|inner| now >= inner.expires_at)
    }

    /// Injects the worker-pool monitor used by the suspension capacity
    /// check.
    pub fn set_pool_monitor(&self, monitor: Arc<PoolMonitor>) {
        self.lock_inner().pool = Some(monitor);
    }

    /// Attaches a WebSocket push sink (called by the embedding listener
    /// after a successful upgrade).
    pub fn connect_websocket(&self, sink: impl FnMut(String) + Send + 'static) {
        let mut inner = self.lock_inner();
        inner.websocket_sink = Some(Box::new(sink));
        inner.ws_connected = true;
        inner.poll_requests_ignored = 0;
    }

    /// Enqueues an event to run under the session lock; drained by the
    /// next departing handler, or immediately by [`Session::service_events`].
    pub fn queue_event(&self, event: QueuedEvent) {
        let mut queue = self.event_queue.lock().expect("event queue lock poisoned");
        queue.push_back(event);
        tracing::debug!(depth = queue.len(), "event queued");
    }

    /// Acquires a handler solely to drain the event queue (server push).
    pub fn service_events(&self) {
        let _handler = Handler::with_lock(self, LockMode::Take);
        // Dropping the handler drains the queue and pushes updates.
    }

    /// Closes a long-poll response that has been parked longer than the
    /// configured push timeout, so the client renews the connection rather
    /// than accumulating half-open ones. Non-blocking; returns `true` when
    /// a connection was renewed.
    pub fn renew_push_connection(&self, now: Instant) -> bool {
        let Some(mut inner) = self.try_lock_inner() else {
            return false;
        };
        let Some(parked_at) = inner.async_parked_at else {
            return false;
        };
        if now < parked_at + inner.config.server_push_timeout_duration() {
            return false;
        }
        if let Some(response) = inner.take_async_response() {
            tracing::debug!(session = %inner.session_id, "renewing idle push connection");
            response.flush();
            true
        } else {
            false
        }
    }

    /// Marks the session expired: takes the lock through the normal
    /// handler protocol and kills it. Returns `false` when the session is
    /// busy (it is skipped this sweep, never killed mid-flight).
    pub fn expire(&self) -> bool {
        let mut handler = Handler::with_lock(self, LockMode::Try);
        if handler.have_lock() {
            handler.inner().kill();
            true
        } else {
            false
        }
    }

    /// Handles one parsed request under `handler`'s lock.
    ///
    /// All failures raised by dispatch and render layers land here: the
    /// response is always terminated, security rejections are served with
    /// their status, and anything unexpected kills the session with a
    /// best-effort 500.
    pub fn handle_request(&self, handler: &mut Handler<'_>) {
        debug_assert!(handler.have_lock());

        match self.dispatch_request(handler) {
            Ok(()) => {}
            Err(e) => {
                let status = e.http_status();
                match e.kind().category() {
                    ErrorCategory::Security => {
                        tracing::warn!(security = true, error = %e, status, "request rejected");
                        if e.kind() == &ErrorKind::HijackDetected {
                            handler.inner().kill();
                        }
                    }
                    ErrorCategory::Transport => {
                        tracing::warn!(error = %e, status, "request rejected");
                    }
                    _ => {
                        tracing::error!(error = %e, "unhandled failure; killing session");
                        handler.inner().kill();
                    }
                }
                let mut response = handler.response.take();
                if let Some(rw) = response.as_mut() {
                    let message = if e.kind().is_security() {
                        "Forbidden".to_owned()
                    } else {
                        e.to_string()
                    };
                    handler.inner().renderer.serve_error(status, rw, &message);
                }
                if let Some(rw) = response {
                    rw.flush();
                }
                handler.request = None;
            }
        }
    }

    fn dispatch_request(&self, handler: &mut Handler<'_>) -> Result<()> {
        let request = handler
            .request
            .take()
            .ok_or_else(|| Error::with_context(ErrorKind::Internal, "handler without request"))?;

        let request_kind = request.parameter("request").unwrap_or("").to_owned();
        let is_resource = request_kind == "resource";

        if !request.method().allowed_for_session() && !is_resource {
            return Err(Error::with_context(
                ErrorKind::InvalidMethod,
                request.method().as_str(),
            ));
        }

        if request.method() == &Method::Options {
            return self.serve_preflight(handler, &request);
        }

        // A dead session answers every further request with a client-side
        // reload, never a blank failure.
        if handler.inner().state == SessionState::Dead {
            let mut response = handler.response.take();
            if let Some(rw) = response.as_mut() {
                handler.inner().renderer.let_reload_html(rw);
            }
            if let Some(rw) = response {
                rw.flush();
            }
            return Ok(());
        }

        // Possession, hijack, and lifecycle checks under the lock.
        {
            let inner = handler.inner();
            inner.env.note_cookies(request.header_value("Cookie").is_some());

            if inner.state != SessionState::JustCreated {
                let credential = SessionCredential::from_request(&request);
                if !credential.validates(
                    inner.config.session_tracking,
                    &inner.session_id,
                    inner.session_proof.as_deref(),
                ) {
                    return Err(Error::with_context(
                        ErrorKind::SessionIdMismatch,
                        "request does not carry this session's credential",
                    ));
                }
            }

            if !is_resource
                && matches!(
                    inner.state,
                    SessionState::ExpectLoad | SessionState::Loaded
                )
            {
                Self::check_hijack(inner, &request)?;
            }

            inner.refresh_expiry();
        }

        self.apply_cors(handler, &request);

        if request.is_websocket_upgrade() {
            return self.serve_websocket_upgrade(handler, &request);
        }

        let state = handler.inner().state;
        match state {
            SessionState::JustCreated => self.bootstrap(handler, &request, &request_kind),
            SessionState::ExpectLoad | SessionState::Loaded => match request_kind.as_str() {
                "script" => self.serve_script(handler, &request),
                "style" => Self::serve_style(handler),
                "jserror" => Self::serve_js_error_report(handler, &request),
                "resource" => self.serve_resource(handler, &request),
                _ => self.handle_stateful(handler, request),
            },
            SessionState::Dead => Ok(()),
        }
    }

    fn check_hijack(inner: &mut SessionInner, request: &Request) -> Result<()> {
        let agent = request.header_value("User-Agent").unwrap_or("");
        if agent != inner.env.user_agent() {
            tracing::warn!(
                security = true,
                old = %inner.env.user_agent(),
                new = %agent,
                "change of user-agent not allowed"
            );
            return Err(Error::new(ErrorKind::HijackDetected));
        }

        let address = request.client_address();
        if address != inner.env.client_address() {
            let proven = match &inner.session_proof {
                Some(proof) => {
                    SessionCredential::from_request(request).proof() == Some(proof.as_str())
                }
                None => false,
            };
            if !proven {
                tracing::warn!(
                    security = true,
                    old = %inner.env.client_address(),
                    new = %address,
                    "change of address not allowed"
                );
                return Err(Error::new(ErrorKind::HijackDetected));
            }
        }
        Ok(())
    }

    fn apply_cors(&self, handler: &mut Handler<'_>, request: &Request) {
        let Some(origin) = request.header_value("Origin").map(str::to_owned) else {
            return;
        };
        let inner_state = handler.inner().state;
        let possessed = inner_state == SessionState::JustCreated || {
            let inner = handler.inner();
            SessionCredential::from_request(request).validates(
                inner.config.session_tracking,
                &inner.session_id,
                inner.session_proof.as_deref(),
            )
        };
        if possessed {
            if let Some(rw) = handler.response.as_mut() {
                rw.add_header("Access-Control-Allow-Origin", origin);
                rw.add_header("Access-Control-Allow-Credentials", "true");
            }
        }
    }

    fn serve_preflight(&self, handler: &mut Handler<'_>, request: &Request) -> Result<()> {
        self.apply_cors(handler, request);
        if let Some(rw) = handler.response.as_mut() {
            rw.add_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS");
            rw.add_header("Access-Control-Max-Age", "1728000");
        }
        handler.flush_response();
        Ok(())
    }

    fn serve_websocket_upgrade(&self, handler: &mut Handler<'_>, request: &Request) -> Result<()> {
        {
            let inner = handler.inner();
            if inner.state == SessionState::JustCreated {
                return Err(Error::new(ErrorKind::PrematureUpgrade));
            }
        }
        let key = request
            .header_value("Sec-WebSocket-Key")
            .ok_or_else(|| {
                Error::with_context(ErrorKind::MalformedRequest, "missing Sec-WebSocket-Key")
            })?
            .to_owned();
        if let Some(rw) = handler.response.as_mut() {
            websocket::write_upgrade_response(rw, &key);
        }
        handler.flush_response();
        handler.inner().ws_connected = true;
        tracing::debug!("websocket upgrade accepted");
        Ok(())
    }

    fn bootstrap(&self, handler: &mut Handler<'_>, request: &Request, kind: &str) -> Result<()> {
        match kind {
            "script" => self.serve_script(handler, request),
            "style" => Self::serve_style(handler),
            _ => {
                let noscript = request.parameter("js").is_some_and(|v| v == "no");
                let progressive = handler.inner().config.progressive_boot;

                if noscript || progressive {
                    handler.inner().start_application()?;
                    let mut response = handler.response.take();
                    {
                        let inner = handler.inner();
                        if let Some(rw) = response.as_mut() {
                            let SessionInner {
                                renderer,
                                tree,
                                page,
                                ..
                            } = inner;
                            renderer.serve_main_page(tree, page, rw);
                        }
                        if progressive && !noscript {
                            inner.set_state(
                                SessionState::ExpectLoad,
                                inner.config.bootstrap_timeout_duration(),
                            );
                        } else {
                            inner.set_loaded();
                        }
                    }
                    if let Some(rw) = response {
                        rw.flush();
                    }
                    handler.request = None;
                } else {
                    let mut response = handler.response.take();
                    {
                        let inner = handler.inner();
                        if let Some(rw) = response.as_mut() {
                            let path = request.path().to_owned();
                            let query = inner.session_query();
                            let SessionInner {
                                renderer, page, ..
                            } = inner;
                            renderer.serve_bootstrap_page(page, rw, &path, &query);
                        }
                        // Remain JustCreated until the script request lands.
                        inner.refresh_expiry();
                    }
                    if let Some(rw) = response {
                        rw.flush();
                    }
                    handler.request = None;
                }
                Ok(())
            }
        }
    }

    fn serve_script(&self, handler: &mut Handler<'_>, request: &Request) -> Result<()> {
        {
            let inner = handler.inner();
            let presented = request.parameter("sid").unwrap_or("");
            if presented != inner.renderer.script_id().to_string() {
                return Err(Error::with_context(
                    ErrorKind::ScriptIdMismatch,
                    "script id does not match this session's page",
                ));
            }
            inner.env.enable_ajax();
            inner.renderer.enable_ajax();
        }

        handler.inner().start_application()?;

        let mut response = handler.response.take();
        {
            let inner = handler.inner();
            if let Some(rw) = response.as_mut() {
                rw.set_kind(ResponseKind::Script);
                let query = inner.session_query();
                let SessionInner {
                    renderer,
                    tree,
                    signals,
                    page,
                    ..
                } = inner;
                renderer.serve_main_script(tree, signals, page, rw, &query);
            }
            inner.set_expect_load();
        }
        if let Some(rw) = response {
            rw.flush();
        }
        handler.request = None;
        Ok(())
    }

    fn serve_style(handler: &mut Handler<'_>) -> Result<()> {
        let mut response = handler.response.take();
        {
            let inner = handler.inner();
            if let Some(rw) = response.as_mut() {
                let SessionInner { renderer, page, .. } = inner;
                renderer.serve_linked_css(page, rw);
            }
        }
        if let Some(rw) = response {
            rw.flush();
        }
        handler.request = None;
        Ok(())
    }

    fn serve_js_error_report(handler: &mut Handler<'_>, request: &Request) -> Result<()> {
        let report = request.parameter("err").unwrap_or("");
        tracing::error!(client_error = %report, "client-side error report");
        handler.flush_response();
        Ok(())
    }

    fn serve_resource(&self, handler: &mut Handler<'_>, request: &Request) -> Result<()> {
        let name = request
            .parameter("resource")
            .unwrap_or("")
            .to_owned();

        if name == "blank" {
            let mut response = handler.response.take();
            if let Some(rw) = response.as_mut() {
                rw.set_content_type("text/html");
                rw.write("<html><head><title>bhm</title></head><body>&#160;</body></html>");
            }
            if let Some(rw) = response {
                rw.flush();
            }
            handler.request = None;
            return Ok(());
        }

        let inner = handler.inner();
        let Some(mut resource) = inner.resources.remove(&name) else {
            tracing::error!(resource = %name, "resource not exposed");
            let mut response = handler.response.take();
            if let Some(rw) = response.as_mut() {
                rw.set_status(404);
                rw.set_content_type("text/html");
                rw.write("<html><body><h1>Nothing to say about that.</h1></body></html>");
            }
            if let Some(rw) = response {
                rw.flush();
            }
            handler.request = None;
            return Ok(());
        };

        let (taken_request, response) = handler.detach_request();
        let request_owned = taken_request.unwrap_or_else(|| request.clone());
        let Some(mut response) = response else {
            handler.inner().resources.insert(name, resource);
            return Ok(());
        };

        let mut cx = ResourceContext::new(false);
        let outcome = resource.handle_request(&request_owned, &mut response, &mut cx);

        let inner = handler.inner();
        if outcome.is_ok() && cx.continuation_requested() {
            inner.continuations.push(ResponseContinuation::new(
                name.clone(),
                request_owned,
                response,
            ));
        } else {
            response.flush();
        }
        inner.resources.insert(name, resource);
        outcome
    }

    fn handle_stateful(&self, handler: &mut Handler<'_>, request: Request) -> Result<()> {
        if request.post_data_exceeded() > 0 {
            let exceeded = request.post_data_exceeded();
            handler
                .inner()
                .with_app(|app, cx| app.request_too_large(cx, exceeded));
        }

        let signal = request.parameter("signal").map(str::to_owned);

        let Some(signal) = signal else {
            // A plain refresh of an established session: re-render.
            return self.render(handler);
        };

        // Ack validation guards every signal-carrying ajax request.
        let mut ack_state = AckState::Correct;
        {
            let inner = handler.inner();
            let needs_ack = inner.env.ajax() && !request.is_websocket_message();
            if needs_ack {
                let presented = request.parameter("ackId").and_then(|v| v.parse::<u32>().ok());
                match presented {
                    Some(id) => {
                        ack_state = inner.renderer.ack_update(id);
                        if ack_state == AckState::Bad {
                            return Err(Error::with_context(ErrorKind::InvalidAck, "stale ack id"));
                        }
                    }
                    None => {
                        return Err(Error::with_context(ErrorKind::InvalidAck, "missing ackId"));
                    }
                }
            }
        }

        if signal == "poll" {
            return self.handle_poll(handler, ack_state);
        }

        // A non-poll client event aborts the previous poll; discard the
        // parked response unless this is a websocket message racing the
        // socket's establishment.
        if !request.is_websocket_message() {
            if let Some(response) = handler.inner().take_async_response() {
                response.flush();
            }
        }

        // Suspensions outstanding from previous requests are resumable by
        // this one; anything the current dispatch suspends must wait for
        // the next request.
        let resumable_suspensions = handler.inner().suspensions.len();
        self.notify_signal(handler, &request)?;
        self.maybe_resume_suspension(handler, &request, resumable_suspensions);
        handler.inner().drain_resource_resumes();
        self.render(handler)
    }

    fn handle_poll(&self, handler: &mut Handler<'_>, ack_state: AckState) -> Result<()> {
        let inner = handler.inner();

        let synced = inner.renderer.js_synced();

        if ack_state != AckState::Correct && synced {
            tracing::debug!("ignoring poll with reordered ack");
            handler.flush_response();
            return Ok(());
        }

        if let Some(previous) = inner.take_async_response() {
            previous.flush();
        }

        if !inner.updates_pending && synced {
            if inner.ws_connected && inner.poll_requests_ignored < 2 {
                // Assume the socket carries pushes; ignore this poll.
                inner.poll_requests_ignored += 1;
                tracing::debug!(
                    ignored = inner.poll_requests_ignored,
                    "ignored poll request"
                );
                handler.flush_response();
            } else {
                if inner.ws_connected {
                    tracing::info!("discarding broken websocket");
                    inner.websocket_sink = None;
                    inner.ws_connected = false;
                }
                inner.poll_requests_ignored = 0;
                let (_, response) = handler.detach_request();
                handler.inner().park_async_response(response);
            }
            Ok(())
        } else {
            inner.poll_requests_ignored = 0;
            self.render(handler)
        }
    }

    fn notify_signal(&self, handler: &mut Handler<'_>, request: &Request) -> Result<()> {
        if handler.next_signal.is_none() {
            let inner = handler.inner();
            handler.signal_order =
                event::signal_processing_order(request, &inner.signals, &inner.tree);
            handler.next_signal = Some(0);
        }

        let order = handler.signal_order.clone();
        let start = handler.next_signal.unwrap_or(0);

        for (position, &index) in order.iter().enumerate().skip(start) {
            let se = event::signal_prefix(index);
            let Some(value) = event::signal_value(request, index).map(str::to_owned) else {
                break;
            };
            tracing::debug!(signal = %value, family = %se, "processing signal");

            match value.as_str() {
                "none" => {
                    handler.inner().renderer.set_visible_only(false);
                }
                "load" => {
                    let puzzle_required = handler.inner().config.require_response_puzzle;
                    if puzzle_required {
                        let ok = handler
                            .inner()
                            .with_app(|app, _| app.response_puzzle_ok(request))
                            .unwrap_or(false);
                        if ok {
                            handler.inner().set_loaded();
                        } else {
                            handler.inner().page.quit();
                        }
                    } else {
                        handler.inner().set_loaded();
                    }
                    handler.inner().renderer.set_visible_only(false);
                }
                "keepAlive" | "poll" => {}
                "hash" => {
                    let path = request
                        .parameter(&format!("{se}_"))
                        .unwrap_or("")
                        .to_owned();
                    let inner = handler.inner();
                    inner.page.set_internal_path(&path);
                    inner.with_app(|app, cx| app.internal_path_changed(cx, &path));
                    handler.next_signal = Some(position + 1);
                }
                _ => {
                    Self::propagate_form_values(handler.inner(), request, &se);

                    let discard_stateless = !request.is_websocket_message() && position == 0;
                    if discard_stateless {
                        handler.inner().save_changes();
                    }

                    handler.next_signal = Some(position + 1);

                    for kind in [
                        SignalDispatch::Learned,
                        SignalDispatch::AutoLearn,
                        SignalDispatch::Dynamic,
                    ] {
                        if kind == SignalDispatch::AutoLearn && request.post_data_exceeded() > 0 {
                            break;
                        }

                        let check_exposed = kind == SignalDispatch::Learned;
                        let decoded = {
                            let inner = handler.inner();
                            if value == "user" {
                                let object = request.parameter(&format!("{se}id"));
                                let name = request.parameter(&format!("{se}name"));
                                match (object, name) {
                                    (Some(object), Some(name)) => inner.signals.decode_user(
                                        object,
                                        name,
                                        check_exposed,
                                        &inner.tree,
                                    ),
                                    _ => None,
                                }
                            } else {
                                inner.signals.decode(&value, check_exposed, &inner.tree)
                            }
                        };

                        if let Some(id) = decoded {
                            self.process_signal(handler, id, &se, request, kind)?;
                        }

                        if kind == SignalDispatch::Learned && discard_stateless {
                            handler.inner().discard_changes();
                        }
                    }
                }
            }
        }

        handler.inner().signals.clear_just_removed();
        Ok(())
    }

    fn process_signal(
        &self,
        handler: &mut Handler<'_>,
        id: SignalId,
        se: &str,
        request: &Request,
        kind: SignalDispatch,
    ) -> Result<()> {
        let inner = handler.inner();
        match kind {
            SignalDispatch::Learned => {
                if let Some(mut slot) = inner.signals.take_stateless(id) {
                    if slot.is_learned() {
                        // Client already replayed the cached script; run the
                        // forward action so server state catches up.
                        let SessionInner {
                            renderer, tree, ..
                        } = inner;
                        renderer.replay_learned(&mut slot, tree);
                    }
                    inner.signals.restore_stateless(id, slot);
                }
            }
            SignalDispatch::AutoLearn => {
                if let Some(mut slot) = inner.signals.take_stateless(id) {
                    if !slot.is_learned() && slot.kind() == SlotKind::AutoLearn {
                        let SessionInner {
                            renderer,
                            tree,
                            page,
                            ..
                        } = inner;
                        renderer.learn(&mut slot, tree, page);
                    } else if !slot.is_learned() {
                        // A pre-learnable slot not yet learned: this is its
                        // real invocation, record but keep the effect.
                        let SessionInner {
                            renderer,
                            tree,
                            page,
                            ..
                        } = inner;
                        renderer.learn(&mut slot, tree, page);
                        slot.trigger(tree);
                    }
                    inner.signals.restore_stateless(id, slot);
                }
            }
            SignalDispatch::Dynamic => {
                if let Some(mut callback) = inner.signals.take_dynamic(id) {
                    let js_event = JsEvent::parse(request, se);
                    let outcome = {
                        let mut cx = inner.app_context();
                        catch_unwind(AssertUnwindSafe(|| callback(&mut cx, &js_event)))
                    };
                    inner.signals.restore_dynamic(id, callback);
                    inner.sync_dirty();
                    if outcome.is_err() {
                        return Err(Error::with_context(
                            ErrorKind::Application,
                            "event handler panicked",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn propagate_form_values(inner: &mut SessionInner, request: &Request, se: &str) {
        let focus = request.parameter(&format!("{se}focus")).map(str::to_owned);
        if let Some(focus) = focus {
            tracing::trace!(focus = %focus, "focus restored");
        }

        if request.post_data_exceeded() > 0 {
            return;
        }

        for (form_name, widget) in inner.tree.form_objects() {
            let enabled = inner.tree.get(widget).is_some_and(|n| n.is_enabled());
            if !enabled {
                continue;
            }
            if let Some(value) = request.parameter(&format!("{se}{form_name}")) {
                let value = value.to_owned();
                inner.tree.set_form_value(widget, &value);
            }
        }
    }

    fn maybe_resume_suspension(
        &self,
        handler: &mut Handler<'_>,
        request: &Request,
        resumable_suspensions: usize,
    ) {
        if resumable_suspensions == 0 {
            return;
        }
        let resumable = event::signal_value(request, 0)
            .is_some_and(|v| !matches!(v, "poll" | "keepAlive" | "none"));
        if !resumable {
            return;
        }
        let inner = handler.inner();
        if inner.suspensions.len() < resumable_suspensions {
            // Killed (and drained) during this pass.
            return;
        }
        // The most recent of the previously outstanding suspensions; one
        // pushed by the current dispatch stays for the next request.
        let continuation = inner.suspensions.remove(resumable_suspensions - 1);
        inner.set_loaded();
        let js_event = JsEvent::parse(request, "");
        let outcome = {
            let mut cx = inner.app_context();
            catch_unwind(AssertUnwindSafe(|| {
                continuation(&mut cx, ResumeEvent::Event(js_event));
            }))
        };
        inner.sync_dirty();
        if outcome.is_err() {
            tracing::error!("suspended event loop continuation panicked");
            inner.kill();
        }
    }

    fn render(&self, handler: &mut Handler<'_>) -> Result<()> {
        let mut response = handler.response.take();
        {
            let inner = handler.inner();

            if inner.page.has_quit() {
                inner.kill();
            }

            if inner.defer_count > 0 {
                // Application asked to postpone; stash the response.
                inner.deferred_response = response.take();
                handler.request = None;
                return Ok(());
            }

            if inner.regenerate_id {
                inner.regenerate_id = false;
                inner.regenerate_session_id();
            }

            if let Some(url) = inner.page.take_redirect() {
                if let Some(rw) = response.as_mut() {
                    rw.set_redirect(url);
                }
            } else if let Some(rw) = response.as_mut() {
                Self::render_response(inner, rw);
            }
            inner.updates_pending = false;
        }
        if let Some(rw) = response {
            rw.flush();
        }
        handler.request = None;
        Ok(())
    }

    fn render_response(inner: &mut SessionInner, rw: &mut ResponseWriter) {
        let query = format!("?wtd={}", inner.session_id);
        let SessionInner {
            renderer,
            tree,
            signals,
            page,
            ..
        } = inner;
        match rw.kind() {
            ResponseKind::Page => {
                renderer.serve_main_page(tree, page, rw);
            }
            ResponseKind::Script => {
                renderer.serve_main_script(tree, signals, page, rw, &query);
            }
            ResponseKind::Update => {
                rw.set_content_type("text/javascript; charset=UTF-8");
                let update = renderer.assemble_update(tree, signals, page);
                renderer.apply_cookies(rw);
                rw.write(&update);
            }
        }
    }

    /// Called by a departing handler while it still holds the lock: drains
    /// the event queue, then pushes or renders whatever is pending.
    pub(crate) fn finish_handler(&self, handler: &mut Handler<'_>) {
        self.drain_event_queue(handler);

        let mut leftover = handler.response.take();
        let inner = match handler.guard.as_deref_mut() {
            Some(inner) => inner,
            None => return,
        };

        if inner.trigger_update && inner.state != SessionState::Dead {
            inner.trigger_update = false;
            inner.push_updates();
        } else if inner.state != SessionState::Dead {
            if let Some(rw) = leftover.as_mut() {
                // Fail-safe: a response nothing served yet is rendered now.
                Self::render_response(inner, rw);
            }
        }
        if let Some(rw) = leftover {
            rw.flush();
        }

        // A deferred response whose defer count dropped to zero resumes.
        if inner.defer_count == 0 && inner.state != SessionState::Dead {
            if let Some(mut rw) = inner.deferred_response.take() {
                Self::render_response(inner, &mut rw);
                rw.flush();
            }
        }
    }

    fn drain_event_queue(&self, handler: &mut Handler<'_>) {
        loop {
            let event = {
                let mut queue = self.event_queue.lock().expect("event queue lock poisoned");
                queue.pop_front()
            };
            let Some(event) = event else {
                break;
            };
            tracing::debug!(session = %event.session_id, "running queued event");

            let inner = match handler.guard.as_deref_mut() {
                Some(inner) => inner,
                None => return,
            };
            if inner.state == SessionState::Dead {
                if let Some(fallback) = event.fallback {
                    fallback();
                }
                continue;
            }
            let function = event.function;
            let outcome = {
                let mut cx = inner.app_context();
                catch_unwind(AssertUnwindSafe(|| function(&mut cx)))
            };
            inner.sync_dirty();
            inner.drain_resource_resumes();
            if outcome.is_err() {
                tracing::error!("queued event panicked; killing session");
                inner.kill();
            } else if inner.page.has_quit() {
                inner.kill();
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handlers", &self.locked_handler_count())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalDispatch {
    Learned,
    AutoLearn,
    Dynamic,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_order_forward() {
        assert!(SessionState::JustCreated < SessionState::ExpectLoad);
        assert!(SessionState::ExpectLoad < SessionState::Loaded);
        assert!(SessionState::Loaded < SessionState::Dead);
    }

    #[test]
    fn credential_policies() {
        let request = crate::http::Request::builder(Method::Get, "/app")
            .header("Cookie", "weftsid=abc; weftproof=p1")
            .build();
        let mut request = request;
        crate::http::params::parse_request(&mut request, &Configuration::default())
            .expect("parse");
        let credential = SessionCredential::from_request(&request);

        // Cookie satisfies CookiesUrl but not Url-only tracking.
        assert!(credential.validates(SessionTracking::CookiesUrl, "abc", None));
        assert!(!credential.validates(SessionTracking::Url, "abc", None));
        // Combined needs the wtd parameter as well.
        assert!(!credential.validates(SessionTracking::Combined, "abc", Some("p1")));
        assert!(!credential.validates(SessionTracking::CookiesUrl, "other", None));
    }

    #[test]
    fn credential_combined_requires_both() {
        let mut request = crate::http::Request::builder(Method::Get, "/app")
            .param("wtd", "abc")
            .header("Cookie", "weftproof=p1")
            .build();
        crate::http::params::parse_request(&mut request, &Configuration::default())
            .expect("parse");
        let credential = SessionCredential::from_request(&request);
        assert!(credential.validates(SessionTracking::Combined, "abc", Some("p1")));
        assert!(!credential.validates(SessionTracking::Combined, "abc", Some("p2")));
        assert!(credential.validates(SessionTracking::Url, "abc", None));
    }

    #[test]
    fn cookie_parsing() {
        assert_eq!(
            cookie_value("a=1; weftsid=xyz; b=2", "weftsid"),
            Some("xyz".to_owned())
        );
        assert_eq!(cookie_value("a=1", "weftsid"), None);
    }
}
