//! The session handler: a scoped lock embodying "the right to act on a
//! session for the duration of one request or callback".
//!
//! A [`Handler`] acquires the session's mutex on construction (unless asked
//! not to) and registers itself in the session's handler list so other
//! threads can observe that the session is being serviced. Its drop drains
//! the session's queued events, pushes or renders any pending update, and
//! only then releases the lock — pending work for the session is never left
//! behind by a departing request.

use crate::http::{Request, ResponseWriter};
use crate::session::{Session, SessionInner};
use std::sync::MutexGuard;

/// How a handler acquires the session lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Block until the lock is held.
    Take,
    /// Acquire only if free; otherwise the handler holds no lock.
    Try,
    /// Do not acquire (observer handlers).
    NoLock,
}

/// RAII lock holder for one request or callback against a session.
pub struct Handler<'s> {
    pub(crate) session: &'s Session,
    pub(crate) guard: Option<MutexGuard<'s, SessionInner>>,
    pub(crate) id: u64,
    pub(crate) request: Option<Request>,
    pub(crate) response: Option<ResponseWriter>,
    /// Cursor into `signal_order` while a request's signals are processed.
    pub(crate) next_signal: Option<usize>,
    /// Precomputed processing order for the request's queued signals.
    pub(crate) signal_order: Vec<usize>,
}

impl<'s> Handler<'s> {
    /// Acquires the session lock and attaches a request/response pair.
    #[must_use]
    pub fn attach(session: &'s Session, request: Request, response: ResponseWriter) -> Self {
        let mut handler = Self::with_lock(session, LockMode::Take);
        handler.request = Some(request);
        handler.response = Some(response);
        handler
    }

    /// Acquires (or tries, or skips) the session lock without a request.
    #[must_use]
    pub fn with_lock(session: &'s Session, mode: LockMode) -> Self {
        let guard = match mode {
            LockMode::Take => Some(session.lock_inner()),
            LockMode::Try => session.try_lock_inner(),
            LockMode::NoLock => None,
        };
        let id = session.next_handler_id();
        if guard.is_some() {
            session.register_handler(id);
        }
        Self {
            session,
            guard,
            id,
            request: None,
            response: None,
            next_signal: None,
            signal_order: Vec::new(),
        }
    }

    /// Whether this handler owns the session lock.
    #[must_use]
    pub const fn have_lock(&self) -> bool {
        self.guard.is_some()
    }

    /// The session this handler acts on.
    #[must_use]
    pub const fn session(&self) -> &'s Session {
        self.session
    }

    /// Releases the lock early, deregistering from the handler list.
    pub fn unlock(&mut self) {
        if self.guard.take().is_some() {
            self.session.deregister_handler(self.id);
        }
    }

    /// The attached request, if any.
    #[must_use]
    pub const fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Whether a response is still attached (not yet flushed/detached).
    #[must_use]
    pub const fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Detaches the request/response pair (for long-poll parking,
    /// continuations, and deferred rendering).
    pub fn detach_request(&mut self) -> (Option<Request>, Option<ResponseWriter>) {
        (self.request.take(), self.response.take())
    }

    /// Replaces the request/response pair.
    pub fn set_request(&mut self, request: Option<Request>, response: Option<ResponseWriter>) {
        self.request = request;
        self.response = response;
    }

    /// Flushes the attached response, if any, exactly once.
    pub fn flush_response(&mut self) {
        if let Some(response) = self.response.take() {
            response.flush();
        }
        self.request = None;
    }

    pub(crate) fn inner(&mut self) -> &mut SessionInner {
        self.guard
            .as_deref_mut()
            .expect("handler does not hold the session lock")
    }
}

impl Drop for Handler<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.session.finish_handler(self);
            if self.guard.take().is_some() {
                self.session.deregister_handler(self.id);
            }
        }
        // The response writer's own drop flushes anything left attached.
    }
}

impl std::fmt::Debug for Handler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("locked", &self.guard.is_some())
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}
