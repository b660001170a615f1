//! The controller: session table, request routing, and expiry reaping.
//!
//! The controller owns the process-wide table of live sessions and routes
//! every inbound request to the right one, creating sessions for requests
//! that present no valid credential. The table has its own lock, disjoint
//! from any session's lock and held only for insert/erase/lookup — never
//! across a request-handling pass.
//!
//! There is deliberately no process-wide singleton: a [`Controller`] is an
//! explicitly constructed server context passed to request-handling entry
//! points, so deployments and tests can run several side by side.

pub mod pool;

use crate::config::{Configuration, SessionTracking};
use crate::error::ParseError;
use crate::http::params::parse_request;
use crate::http::{Request, ResponseWriter};
use crate::session::{AppFactory, Handler, Session, TRACKING_COOKIE};
use crate::util::token::generate_token;
use pool::WorkerPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Routes requests to sessions and reaps idle ones.
pub struct Controller {
    config: Arc<Configuration>,
    factory: AppFactory,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    pool: Option<WorkerPool>,
}

impl Controller {
    /// Creates a controller with a worker pool of `config.worker_threads`.
    #[must_use]
    pub fn new(mut config: Configuration, factory: AppFactory) -> Arc<Self> {
        config.normalize();
        let pool = WorkerPool::new(config.worker_threads);
        Arc::new(Self {
            config: Arc::new(config),
            factory,
            sessions: Mutex::new(HashMap::new()),
            pool: Some(pool),
        })
    }

    /// Creates a controller without worker threads; requests are handled
    /// on the calling thread. Intended for tests and embeddings that bring
    /// their own scheduling.
    #[must_use]
    pub fn single_threaded(mut config: Configuration, factory: AppFactory) -> Arc<Self> {
        config.normalize();
        Arc::new(Self {
            config: Arc::new(config),
            factory,
            sessions: Mutex::new(HashMap::new()),
            pool: None,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("session table lock poisoned")
            .len()
    }

    /// Looks up a live session by id.
    #[must_use]
    pub fn find_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("session table lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Schedules a request on the worker pool. Falls back to inline
    /// handling when the controller was built single-threaded.
    pub fn submit_request(self: &Arc<Self>, request: Request, response: ResponseWriter) {
        match &self.pool {
            Some(pool) => {
                let controller = Arc::clone(self);
                pool.submit(move || controller.handle_request(request, response));
            }
            None => self.handle_request(request, response),
        }
    }

    /// Handles one inbound request: parse, route, dispatch, clean up.
    pub fn handle_request(&self, mut request: Request, mut response: ResponseWriter) {
        if let Err(e) = parse_request(&mut request, &self.config) {
            Self::serve_parse_error(&mut response, &e);
            response.flush();
            return;
        }

        let routed_id = self.extract_session_id(&request);

        let (session, table_key) = {
            let mut sessions = self.sessions.lock().expect("session table lock poisoned");

            let live = routed_id
                .as_ref()
                .and_then(|id| sessions.get(id).cloned())
                .filter(|s| !s.is_dead());

            match live {
                Some(session) => {
                    let key = routed_id.expect("live session implies an id");
                    (session, key)
                }
                None => {
                    if request.is_websocket_upgrade() {
                        // A browser with an old session trying to reconnect
                        // (e.g. after a server restart).
                        tracing::info!(
                            security = true,
                            "websocket request for non-existing session rejected"
                        );
                        drop(sessions);
                        response.set_status(403);
                        response.flush();
                        return;
                    }

                    let mut session_id = generate_token(self.config.session_id_length);
                    while sessions.contains_key(&session_id) {
                        session_id = generate_token(self.config.session_id_length);
                    }

                    let session = Arc::new(Session::new(
                        session_id.clone(),
                        Arc::clone(&self.config),
                        Arc::clone(&self.factory),
                        &request,
                    ));
                    if let Some(pool) = &self.pool {
                        session.set_pool_monitor(pool.monitor());
                    }
                    sessions.insert(session_id.clone(), session.clone());
                    (session, session_id)
                }
            }
        };

        {
            let mut handler = Handler::attach(&session, request, response);
            if handler.inner().state != crate::session::SessionState::Dead {
                session.handle_request(&mut handler);
            }
        }

        if session.is_dead() {
            self.remove_session(&table_key);
        } else {
            let current_id = session.session_id();
            if current_id != table_key {
                self.rekey_session(&table_key, &current_id, &session);
            }
        }
    }

    /// Removes every expired session. A session busy with a request is
    /// skipped this sweep — it is never killed mid-flight.
    pub fn expire_sessions(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<(String, Arc<Session>)> = {
            let sessions = self.sessions.lock().expect("session table lock poisoned");
            sessions
                .iter()
                .map(|(id, s)| (id.clone(), s.clone()))
                .collect()
        };

        let mut reaped = 0;
        for (id, session) in candidates {
            if session.is_dead() {
                self.remove_session(&id);
                reaped += 1;
            } else if session.expired(now) && session.expire() {
                tracing::info!(session = %id, "session expired");
                self.remove_session(&id);
                reaped += 1;
            } else {
                session.renew_push_connection(now);
            }
        }
        reaped
    }

    /// Kills every session and clears the table (server shutdown).
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut table = self.sessions.lock().expect("session table lock poisoned");
            let drained = table.drain().map(|(_, s)| s).collect();
            drained
        };
        tracing::info!(count = sessions.len(), "shutdown: stopping sessions");
        for session in sessions {
            let mut handler = Handler::with_lock(&session, crate::session::LockMode::Take);
            handler.inner().kill();
        }
    }

    fn extract_session_id(&self, request: &Request) -> Option<String> {
        // Priority order: tracking cookie, then the wtd URL parameter.
        if self.config.session_tracking != SessionTracking::Url {
            let from_cookie = request.header_value("Cookie").and_then(|cookies| {
                cookies.split(';').map(str::trim).find_map(|pair| {
                    pair.strip_prefix(TRACKING_COOKIE)
                        .and_then(|rest| rest.strip_prefix('='))
                        .map(str::to_owned)
                })
            });
            if from_cookie.is_some() {
                return from_cookie;
            }
        }
        request.parameter("wtd").map(str::to_owned)
    }

    fn remove_session(&self, session_id: &str) {
        let removed = self
            .sessions
            .lock()
            .expect("session table lock poisoned")
            .remove(session_id);
        if removed.is_some() {
            tracing::debug!(session = %session_id, "session removed");
        }
    }

    fn rekey_session(&self, old_id: &str, new_id: &str, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.remove(old_id);
        sessions.insert(new_id.to_owned(), session.clone());
    }

    fn serve_parse_error(response: &mut ResponseWriter, error: &ParseError) {
        let status = match error {
            ParseError::BodyTooLarge { .. } | ParseError::FormDataTooLarge { .. } => 413,
            _ => 400,
        };
        tracing::error!(error = %error, "could not parse request");
        response.set_status(status);
        response.set_content_type("text/html");
        response.write("<title>Error occurred.</title><h2>Error occurred.</h2>Error parsing request: ");
        response.write(&crate::render::dom::html_escape(&error.to_string()));
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("sessions", &self.session_count())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
