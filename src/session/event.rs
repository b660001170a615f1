//! Queued application events and signal processing order.
//!
//! External threads talk to a session through its event queue: a queued
//! event is a closure run under the session lock by whichever handler next
//! drains the queue. The queue is guarded by its own lock, never held
//! across a request pass.
//!
//! This module also computes the per-request signal processing order. A
//! single request may carry several queued signals (`signal=`, `e1signal=`,
//! `e2signal=`, …); change-commit signals are rushed ahead of the rest so a
//! click handler cannot destroy a widget before that widget's own pending
//! change event is applied.

use crate::session::AppContext;
use crate::signal::{SignalRegistry, CHANGE_SIGNAL};
use crate::widget::WidgetTree;
use crate::http::Request;

/// A closure to run against a session, enqueued from any thread.
pub struct QueuedEvent {
    /// Session the event is addressed to (for table cleanup on death).
    pub session_id: String,
    /// The work to run under the session lock.
    pub function: Box<dyn FnOnce(&mut AppContext<'_>) + Send>,
    /// Fallback to run instead if the session is already dead.
    pub fallback: Option<Box<dyn FnOnce() + Send>>,
}

impl QueuedEvent {
    /// Creates a queued event for `session_id`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        function: impl FnOnce(&mut AppContext<'_>) + Send + 'static,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            function: Box::new(function),
            fallback: None,
        }
    }

    /// Attaches a fallback run when the session turns out to be dead.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl FnOnce() + Send + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

impl std::fmt::Debug for QueuedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedEvent")
            .field("session_id", &self.session_id)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Returns the signal value for the family with index `i` (the bare
/// `signal` parameter for 0, `e1signal`, `e2signal`, … beyond).
#[must_use]
pub fn signal_value(request: &Request, index: usize) -> Option<&str> {
    let name = format!("{}signal", signal_prefix(index));
    request.parameter(&name)
}

/// Parameter-family prefix for signal index `i`: empty for the first
/// signal, `e1`, `e2`, … for queued ones.
#[must_use]
pub fn signal_prefix(index: usize) -> String {
    if index == 0 {
        String::new()
    } else {
        format!("e{index}")
    }
}

/// Signal values that name protocol actions rather than connections.
#[must_use]
pub fn is_special_signal(value: &str) -> bool {
    matches!(value, "user" | "hash" | "none" | "poll" | "load" | "keepAlive")
}

/// Computes the order in which a request's signals are processed.
///
/// Signals bound to change semantics move ahead of everything else;
/// within a priority class, arrival order is preserved.
#[must_use]
pub fn signal_processing_order(
    request: &Request,
    signals: &SignalRegistry,
    tree: &WidgetTree,
) -> Vec<usize> {
    let mut high_priority = Vec::new();
    let mut normal_priority = Vec::new();

    let mut index = 0usize;
    loop {
        let Some(value) = signal_value(request, index) else {
            break;
        };
        if is_special_signal(value) {
            normal_priority.push(index);
        } else if let Some(id) = signals.decode(value, true, tree) {
            let is_change = signals.get(id).is_some_and(|c| c.name == CHANGE_SIGNAL);
            if is_change {
                high_priority.push(index);
            } else {
                normal_priority.push(index);
            }
        } else {
            // Not exposed (legitimately removed): keep the slot in the
            // order; dispatch will skip it again.
            normal_priority.push(index);
        }
        index += 1;
    }

    high_priority.extend(normal_priority);
    high_priority
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::params::parse_request;
    use crate::http::Method;
    use crate::Configuration;

    fn parsed(query: &str) -> Request {
        let mut request = Request::builder(Method::Post, "/app").query(query).build();
        parse_request(&mut request, &Configuration::default()).expect("parse");
        request
    }

    #[test]
    fn prefixes() {
        assert_eq!(signal_prefix(0), "");
        assert_eq!(signal_prefix(1), "e1");
        assert_eq!(signal_prefix(7), "e7");
    }

    #[test]
    fn change_signals_jump_the_queue() {
        let mut tree = WidgetTree::new();
        let text = tree.create(tree.root(), "input").expect("create");
        let button = tree.create(tree.root(), "button").expect("create");
        let mut signals = SignalRegistry::new();
        let click = signals.connect_dynamic(button, "click", |_, _| {});
        let change = signals.connect_dynamic(text, CHANGE_SIGNAL, |_, _| {});

        // Click arrives first, the change-commit second.
        let request = parsed(&format!(
            "signal={}&e1signal={}",
            click.encode(),
            change.encode()
        ));
        let order = signal_processing_order(&request, &signals, &tree);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn arrival_order_is_stable_within_class() {
        let mut tree = WidgetTree::new();
        let a = tree.create(tree.root(), "button").expect("create");
        let b = tree.create(tree.root(), "button").expect("create");
        let mut signals = SignalRegistry::new();
        let sa = signals.connect_dynamic(a, "click", |_, _| {});
        let sb = signals.connect_dynamic(b, "click", |_, _| {});

        let request = parsed(&format!(
            "signal={}&e1signal=load&e2signal={}",
            sa.encode(),
            sb.encode()
        ));
        let order = signal_processing_order(&request, &signals, &tree);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn unresolved_signals_keep_their_slot() {
        let tree = WidgetTree::new();
        let signals = SignalRegistry::new();
        let request = parsed("signal=s99");
        let order = signal_processing_order(&request, &signals, &tree);
        assert_eq!(order, vec![0]);
    }
}
