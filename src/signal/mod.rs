//! Event-signal registry and dispatch metadata.
//!
//! Every client-observable event handler is registered here as a
//! [`Connection`]: an owning widget, a signal name (`click`, `change`, …),
//! an optional stateless slot, and an optional dynamic handler. The
//! registry hands out opaque [`SignalId`]s that the renderer exposes to the
//! client; an id arriving in a request is decoded back through
//! [`SignalRegistry::decode`], which degrades to `None` for targets that
//! were legitimately removed between render and event delivery.

use crate::http::Request;
use crate::render::slot::StatelessSlot;
use crate::session::AppContext;
use crate::widget::{WidgetId, WidgetTree};
use std::collections::{HashMap, HashSet};

/// Signal name carried by blur-triggered form commits.
///
/// Connections with this name are rushed ahead of all other signals in a
/// request, so a click cannot destroy a widget before its own pending
/// change-commit is applied.
pub const CHANGE_SIGNAL: &str = "change";

/// Opaque identifier of an exposed signal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    /// Encodes the id the way it is exposed to the client.
    #[must_use]
    pub fn encode(self) -> String {
        format!("s{}", self.0)
    }

    /// Parses a client-presented signal id.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        text.strip_prefix('s')?.parse().ok().map(Self)
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A dynamic (always server-evaluated) event handler.
pub type DynamicFn = Box<dyn FnMut(&mut AppContext<'_>, &JsEvent) + Send>;

/// One exposed signal connection.
pub struct Connection {
    /// The widget this connection belongs to.
    pub owner: WidgetId,
    /// The signal name (`click`, `change`, …).
    pub name: String,
    pub(crate) stateless: Option<StatelessSlot>,
    pub(crate) dynamic: Option<DynamicFn>,
}

impl Connection {
    /// Whether this connection carries a stateless slot.
    #[must_use]
    pub const fn has_stateless(&self) -> bool {
        self.stateless.is_some()
    }

    /// Whether this connection carries a dynamic handler.
    #[must_use]
    pub const fn has_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    /// The stateless slot, if any.
    #[must_use]
    pub fn stateless(&self) -> Option<&StatelessSlot> {
        self.stateless.as_ref()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("stateless", &self.stateless.is_some())
            .field("dynamic", &self.dynamic.is_some())
            .finish()
    }
}

/// The session-scoped table of exposed signal connections.
#[derive(Default)]
pub struct SignalRegistry {
    connections: HashMap<u64, Connection>,
    next_id: u64,
    just_removed: HashSet<String>,
}

impl SignalRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns its exposed id.
    pub fn connect(&mut self, connection: Connection) -> SignalId {
        let id = self.next_id;
        self.next_id += 1;
        self.connections.insert(id, connection);
        SignalId(id)
    }

    /// Registers a dynamic handler for `owner`'s `name` signal.
    pub fn connect_dynamic(
        &mut self,
        owner: WidgetId,
        name: &str,
        handler: impl FnMut(&mut AppContext<'_>, &JsEvent) + Send + 'static,
    ) -> SignalId {
        self.connect(Connection {
            owner,
            name: name.to_owned(),
            stateless: None,
            dynamic: Some(Box::new(handler)),
        })
    }

    /// Registers a stateless slot for `owner`'s `name` signal.
    pub fn connect_stateless(
        &mut self,
        owner: WidgetId,
        name: &str,
        slot: StatelessSlot,
    ) -> SignalId {
        self.connect(Connection {
            owner,
            name: name.to_owned(),
            stateless: Some(slot),
            dynamic: None,
        })
    }

    /// Disconnects a signal; its id becomes a tombstone so a late event
    /// for it is skipped without an error log.
    pub fn disconnect(&mut self, id: SignalId) {
        if self.connections.remove(&id.0).is_some() {
            self.just_removed.insert(id.encode());
        }
    }

    /// Disconnects every signal owned by `widget`.
    pub fn disconnect_widget(&mut self, widget: WidgetId) {
        let doomed: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, c)| c.owner == widget)
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            self.connections.remove(&id);
            self.just_removed.insert(SignalId(id).encode());
        }
    }

    /// Returns the connection for an id, if still registered.
    #[must_use]
    pub fn get(&self, id: SignalId) -> Option<&Connection> {
        self.connections.get(&id.0)
    }

    /// Decodes a client-presented signal id.
    ///
    /// With `check_exposed`, the owner must still be attached under a
    /// render root and unstubbed. An unresolvable id is not an error — the
    /// target may have been removed between render and event firing — and
    /// is only logged when it was not a just-removed tombstone.
    #[must_use]
    pub fn decode(&self, encoded: &str, check_exposed: bool, tree: &WidgetTree) -> Option<SignalId> {
        let Some(id) = SignalId::parse(encoded) else {
            tracing::debug!(signal = %encoded, "undecodable signal id");
            return None;
        };
        let Some(connection) = self.connections.get(&id.0) else {
            if !self.just_removed.contains(encoded) {
                tracing::error!(signal = %encoded, "signal not exposed");
            }
            return None;
        };
        if check_exposed {
            let node = tree.get(connection.owner)?;
            if node.is_stubbed() || tree.depth_from_root(connection.owner) == 0 {
                return None;
            }
        }
        Some(id)
    }

    /// Decodes an object-addressed (`user`) signal by DOM id and name.
    #[must_use]
    pub fn decode_user(
        &self,
        object_dom_id: &str,
        name: &str,
        check_exposed: bool,
        tree: &WidgetTree,
    ) -> Option<SignalId> {
        let owner = tree.find_by_dom_id(object_dom_id)?;
        let id = self
            .connections
            .iter()
            .find(|(_, c)| c.owner == owner && c.name == name)
            .map(|(id, _)| SignalId(*id))?;
        self.decode(&id.encode(), check_exposed, tree)
    }

    /// Ids of connections whose slots are eligible for pre-learning:
    /// a pre-learnable, not-yet-learned slot on a live connection.
    #[must_use]
    pub fn prelearn_candidates(&self) -> Vec<SignalId> {
        let mut ids: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                c.stateless.as_ref().is_some_and(|s| {
                    s.kind() == crate::render::slot::SlotKind::PreLearn && !s.is_learned()
                })
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(SignalId).collect()
    }

    /// Resets the learned script of every slot owned by `widget`.
    pub fn invalidate_widget(&mut self, widget: WidgetId) {
        for connection in self.connections.values_mut() {
            if connection.owner == widget {
                if let Some(slot) = &mut connection.stateless {
                    slot.invalidate();
                }
            }
        }
    }

    /// Clears the just-removed tombstones; called after each request pass.
    pub fn clear_just_removed(&mut self) {
        self.just_removed.clear();
    }

    pub(crate) fn take_stateless(&mut self, id: SignalId) -> Option<StatelessSlot> {
        self.connections.get_mut(&id.0)?.stateless.take()
    }

    pub(crate) fn restore_stateless(&mut self, id: SignalId, slot: StatelessSlot) {
        if let Some(connection) = self.connections.get_mut(&id.0) {
            connection.stateless = Some(slot);
        }
    }

    pub(crate) fn take_dynamic(&mut self, id: SignalId) -> Option<DynamicFn> {
        self.connections.get_mut(&id.0)?.dynamic.take()
    }

    pub(crate) fn restore_dynamic(&mut self, id: SignalId, handler: DynamicFn) {
        if let Some(connection) = self.connections.get_mut(&id.0) {
            connection.dynamic = Some(handler);
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl std::fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("connections", &self.connections.len())
            .field("just_removed", &self.just_removed.len())
            .finish()
    }
}

/// A deserialized client-side event payload (mouse/key coordinates etc.),
/// read from the request's parameter families.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsEvent {
    /// Event type reported by the client (`click`, `keydown`, …).
    pub kind: String,
    /// Pointer X coordinate, document-relative.
    pub client_x: i32,
    /// Pointer Y coordinate, document-relative.
    pub client_y: i32,
    /// Key code for keyboard events.
    pub key_code: u32,
    /// Modifier keys held (alt, ctrl, meta, shift).
    pub alt: bool,
    /// Ctrl modifier.
    pub ctrl: bool,
    /// Meta modifier.
    pub meta: bool,
    /// Shift modifier.
    pub shift: bool,
}

impl JsEvent {
    /// Reads the event payload for the signal family with prefix `se`
    /// (empty for the first signal, `e1`, `e2`, … for queued ones).
    #[must_use]
    pub fn parse(request: &Request, se: &str) -> Self {
        let get = |name: &str| request.parameter(&format!("{se}{name}"));
        let int = |name: &str| get(name).and_then(|v| v.parse().ok()).unwrap_or(0);
        let flag = |name: &str| get(name).is_some_and(|v| v == "1" || v == "true");
        Self {
            kind: get("type").unwrap_or("").to_owned(),
            client_x: int("clientX"),
            client_y: int("clientY"),
            key_code: get("keyCode").and_then(|v| v.parse().ok()).unwrap_or(0),
            alt: flag("altKey"),
            ctrl: flag("ctrlKey"),
            meta: flag("metaKey"),
            shift: flag("shiftKey"),
        }
    }
}
