//! Stateless-slot command objects.
//!
//! A stateless slot is an event handler whose client-visible effect is a
//! fixed, input-independent DOM mutation. The renderer runs it once,
//! records the resulting JavaScript, and — for pre-learnable slots — undoes
//! the server-side effect again, leaving observable state untouched. The
//! cached script is then replayed client-side without a server round-trip.
//!
//! Slots are explicit command objects carrying a forward action, an
//! optional inverse action, and the cached script, invoked through this
//! module's interface rather than any pointer-identity comparison.

use crate::widget::WidgetTree;

/// A tree-mutating action owned by a slot.
pub type TreeFn = Box<dyn FnMut(&mut WidgetTree) + Send>;

/// When a slot's script may be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Has an inverse: learnable ahead of time, before any trigger.
    PreLearn,
    /// No inverse: learned on its first real invocation.
    AutoLearn,
}

/// A cacheable, input-independent event handler.
pub struct StatelessSlot {
    forward: TreeFn,
    undo: Option<TreeFn>,
    learned: Option<String>,
}

impl StatelessSlot {
    /// Creates an auto-learn slot: recorded on first invocation, no undo.
    #[must_use]
    pub fn new(forward: impl FnMut(&mut WidgetTree) + Send + 'static) -> Self {
        Self {
            forward: Box::new(forward),
            undo: None,
            learned: None,
        }
    }

    /// Creates a pre-learnable slot with an inverse action.
    ///
    /// The inverse must restore every piece of server-side state the
    /// forward action touches; the learn cycle is run-then-undo within one
    /// lock hold and must leave observable state unchanged.
    #[must_use]
    pub fn with_undo(
        forward: impl FnMut(&mut WidgetTree) + Send + 'static,
        undo: impl FnMut(&mut WidgetTree) + Send + 'static,
    ) -> Self {
        Self {
            forward: Box::new(forward),
            undo: Some(Box::new(undo)),
            learned: None,
        }
    }

    /// The slot's learning discipline.
    #[must_use]
    pub const fn kind(&self) -> SlotKind {
        if self.undo.is_some() {
            SlotKind::PreLearn
        } else {
            SlotKind::AutoLearn
        }
    }

    /// Whether a script has been recorded.
    #[must_use]
    pub const fn is_learned(&self) -> bool {
        self.learned.is_some()
    }

    /// The recorded script, if any.
    #[must_use]
    pub fn learned_js(&self) -> Option<&str> {
        self.learned.as_deref()
    }

    /// Forgets the recorded script. Called when the owning widget's state
    /// changes in a way that could alter it.
    pub fn invalidate(&mut self) {
        self.learned = None;
    }

    pub(crate) fn set_learned(&mut self, js: String) {
        self.learned = Some(js);
    }

    pub(crate) fn trigger(&mut self, tree: &mut WidgetTree) {
        (self.forward)(tree);
    }

    pub(crate) fn undo_trigger(&mut self, tree: &mut WidgetTree) {
        if let Some(undo) = &mut self.undo {
            undo(tree);
        }
    }
}

impl std::fmt::Debug for StatelessSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessSlot")
            .field("kind", &self.kind())
            .field("learned", &self.learned.is_some())
            .finish()
    }
}
