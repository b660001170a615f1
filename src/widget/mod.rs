//! The handle-based widget tree.
//!
//! Widgets are stored in a generation-checked arena and addressed through
//! [`WidgetId`] handles: a handle to a removed widget fails its generation
//! check and every operation on it degrades to a safe no-op. The tree keeps
//! two render roots — the main document root and a secondary dialog/overlay
//! root — and a widget's pending changes are only live while its ancestor
//! chain still reaches one of the two.
//!
//! Mutations do double duty: they update the server-side model *and* record
//! the equivalent [`DomOp`] on the widget, to be drained by the renderer
//! during reconciliation. Mutated widgets are pushed onto a touched list
//! that the renderer folds into its dirty set.

use crate::render::dom::{html_escape, DomOp};
use crate::util::arena::{Arena, Handle};
use std::collections::HashMap;

/// Generation-checked handle to a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WidgetId(Handle);

impl WidgetId {
    pub(crate) const fn handle(self) -> Handle {
        self.0
    }
}

/// One widget node.
#[derive(Debug)]
pub struct WidgetNode {
    dom_id: String,
    tag: String,
    parent: Option<WidgetId>,
    children: Vec<WidgetId>,
    text: String,
    attributes: Vec<(String, String)>,
    stubbed: bool,
    enabled: bool,
    form_object: bool,
    form_value: String,
    pending: Vec<DomOp>,
}

impl WidgetNode {
    fn new(dom_id: String, tag: String, parent: Option<WidgetId>) -> Self {
        Self {
            dom_id,
            tag,
            parent,
            children: Vec::new(),
            text: String::new(),
            attributes: Vec::new(),
            stubbed: false,
            enabled: true,
            form_object: false,
            form_value: String::new(),
            pending: Vec::new(),
        }
    }

    /// The widget's DOM element id.
    #[must_use]
    pub fn dom_id(&self) -> &str {
        &self.dom_id
    }

    /// The widget's current text content.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The widget's current value for an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The widget's form value (set by form-value propagation).
    #[must_use]
    pub fn form_value(&self) -> &str {
        &self.form_value
    }

    /// Whether the widget participates in form-value propagation.
    #[must_use]
    pub const fn is_form_object(&self) -> bool {
        self.form_object
    }

    /// Whether the widget is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the widget is a stub awaiting its real content.
    #[must_use]
    pub const fn is_stubbed(&self) -> bool {
        self.stubbed
    }
}

/// The widget tree: arena storage plus the two render roots.
pub struct WidgetTree {
    arena: Arena<WidgetNode>,
    root: WidgetId,
    dialog_root: WidgetId,
    touched: Vec<WidgetId>,
    next_dom_id: u64,
}

impl Default for WidgetTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetTree {
    /// Creates a tree with its two render roots.
    #[must_use]
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = WidgetId(arena.insert(WidgetNode::new(
            "weft-root".to_owned(),
            "div".to_owned(),
            None,
        )));
        let dialog_root = WidgetId(arena.insert(WidgetNode::new(
            "weft-cover".to_owned(),
            "div".to_owned(),
            None,
        )));
        Self {
            arena,
            root,
            dialog_root,
            touched: Vec::new(),
            next_dom_id: 0,
        }
    }

    /// The main document root.
    #[must_use]
    pub const fn root(&self) -> WidgetId {
        self.root
    }

    /// The secondary dialog/overlay root.
    #[must_use]
    pub const fn dialog_root(&self) -> WidgetId {
        self.dialog_root
    }

    /// Number of live widgets, roots included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether only the two roots exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.len() <= 2
    }

    /// Returns the node for a handle, or `None` if the handle is stale.
    #[must_use]
    pub fn get(&self, id: WidgetId) -> Option<&WidgetNode> {
        self.arena.get(id.0)
    }

    /// Creates a widget under `parent`. Returns `None` when the parent
    /// handle is stale.
    pub fn create(&mut self, parent: WidgetId, tag: &str) -> Option<WidgetId> {
        self.arena.get(parent.0)?;
        let dom_id = format!("w{}", self.next_dom_id);
        self.next_dom_id += 1;
        let id = WidgetId(
            self.arena
                .insert(WidgetNode::new(dom_id, tag.to_owned(), Some(parent))),
        );
        let html = self.render_html(id);
        let parent_node = self
            .arena
            .get_mut(parent.0)
            .expect("parent checked above");
        parent_node.children.push(id);
        parent_node.pending.push(DomOp::InsertChild {
            parent: parent_node.dom_id.clone(),
            html,
        });
        self.touched.push(parent);
        Some(id)
    }

    /// Removes a widget and its subtree from the arena, recording the
    /// client-side removal on its parent. Stale handles are a no-op.
    pub fn remove(&mut self, id: WidgetId) {
        if id == self.root || id == self.dialog_root {
            return;
        }
        let Some(node) = self.arena.get(id.0) else {
            return;
        };
        let dom_id = node.dom_id.clone();
        let parent = node.parent;

        if let Some(parent) = parent {
            if let Some(parent_node) = self.arena.get_mut(parent.0) {
                parent_node.children.retain(|c| *c != id);
                parent_node.pending.push(DomOp::Remove { id: dom_id });
                self.touched.push(parent);
            }
        }
        self.remove_subtree(id);
    }

    fn remove_subtree(&mut self, id: WidgetId) {
        if let Some(node) = self.arena.remove(id.0) {
            for child in node.children {
                self.remove_subtree(child);
            }
        }
    }

    /// Detaches a widget from its parent without removing it from the
    /// arena. The subtree stays alive but no longer reaches a render root,
    /// so its pending changes are discarded at the next reconciliation.
    pub fn detach(&mut self, id: WidgetId) {
        if id == self.root || id == self.dialog_root {
            return;
        }
        let Some(node) = self.arena.get_mut(id.0) else {
            return;
        };
        let Some(parent) = node.parent.take() else {
            return;
        };
        let dom_id = node.dom_id.clone();
        if let Some(parent_node) = self.arena.get_mut(parent.0) {
            parent_node.children.retain(|c| *c != id);
            parent_node.pending.push(DomOp::Remove { id: dom_id });
            self.touched.push(parent);
        }
    }

    /// Sets the widget's text content.
    pub fn set_text(&mut self, id: WidgetId, text: &str) {
        let Some(node) = self.arena.get_mut(id.0) else {
            return;
        };
        node.text = text.to_owned();
        let op = DomOp::SetHtml {
            id: node.dom_id.clone(),
            html: html_escape(text),
        };
        node.pending.push(op);
        self.touched.push(id);
    }

    /// Sets (or replaces) an attribute.
    pub fn set_attribute(&mut self, id: WidgetId, name: &str, value: &str) {
        let Some(node) = self.arena.get_mut(id.0) else {
            return;
        };
        match node.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_owned(),
            None => node.attributes.push((name.to_owned(), value.to_owned())),
        }
        let op = DomOp::SetAttribute {
            id: node.dom_id.clone(),
            name: name.to_owned(),
            value: value.to_owned(),
        };
        node.pending.push(op);
        self.touched.push(id);
    }

    /// Removes an attribute.
    pub fn remove_attribute(&mut self, id: WidgetId, name: &str) {
        let Some(node) = self.arena.get_mut(id.0) else {
            return;
        };
        node.attributes.retain(|(n, _)| n != name);
        let op = DomOp::RemoveAttribute {
            id: node.dom_id.clone(),
            name: name.to_owned(),
        };
        node.pending.push(op);
        self.touched.push(id);
    }

    /// Marks the widget as a form object (participates in form-value
    /// propagation).
    pub fn set_form_object(&mut self, id: WidgetId, form_object: bool) {
        if let Some(node) = self.arena.get_mut(id.0) {
            node.form_object = form_object;
        }
    }

    /// Enables or disables the widget. Disabled widgets do not receive
    /// propagated form values.
    pub fn set_enabled(&mut self, id: WidgetId, enabled: bool) {
        if let Some(node) = self.arena.get_mut(id.0) {
            node.enabled = enabled;
        }
    }

    /// Marks the widget as stubbed (placeholder not yet rendered for real).
    pub fn set_stubbed(&mut self, id: WidgetId, stubbed: bool) {
        if let Some(node) = self.arena.get_mut(id.0) {
            node.stubbed = stubbed;
        }
    }

    /// Server-side form value update; records no client-side mutation.
    pub fn set_form_value(&mut self, id: WidgetId, value: &str) {
        if let Some(node) = self.arena.get_mut(id.0) {
            node.form_value = value.to_owned();
        }
    }

    /// Depth of the widget counted from its render root (root itself is 1).
    ///
    /// Returns 0 when the handle is stale or the ancestor chain does not
    /// reach either render root — such a widget's pending changes are dead.
    #[must_use]
    pub fn depth_from_root(&self, id: WidgetId) -> usize {
        let mut depth = 1usize;
        let mut current = id;
        loop {
            let Some(node) = self.arena.get(current.0) else {
                return 0;
            };
            match node.parent {
                Some(parent) => {
                    current = parent;
                    depth += 1;
                }
                None => {
                    if current == self.root || current == self.dialog_root {
                        return depth;
                    }
                    return 0;
                }
            }
        }
    }

    /// Drains the widget's recorded mutations.
    pub fn drain_pending(&mut self, id: WidgetId) -> Vec<DomOp> {
        self.arena
            .get_mut(id.0)
            .map(|node| std::mem::take(&mut node.pending))
            .unwrap_or_default()
    }

    /// Discards the widget's recorded mutations without emitting them.
    pub fn mark_render_ok(&mut self, id: WidgetId) {
        if let Some(node) = self.arena.get_mut(id.0) {
            node.pending.clear();
        }
    }

    /// Takes the list of widgets mutated since the last call.
    pub fn take_touched(&mut self) -> Vec<WidgetId> {
        std::mem::take(&mut self.touched)
    }

    /// Renders the widget and its subtree as HTML.
    #[must_use]
    pub fn render_html(&self, id: WidgetId) -> String {
        let Some(node) = self.arena.get(id.0) else {
            return String::new();
        };
        let mut out = String::new();
        out.push('<');
        out.push_str(&node.tag);
        out.push_str(" id=\"");
        out.push_str(&html_escape(&node.dom_id));
        out.push('"');
        for (name, value) in &node.attributes {
            out.push(' ');
            out.push_str(&html_escape(name));
            out.push_str("=\"");
            out.push_str(&html_escape(value));
            out.push('"');
        }
        out.push('>');
        out.push_str(&html_escape(&node.text));
        for child in &node.children {
            out.push_str(&self.render_html(*child));
        }
        out.push_str("</");
        out.push_str(&node.tag);
        out.push('>');
        out
    }

    /// Collects `(form name, id)` pairs of enabled form objects under both
    /// render roots, in tree order.
    #[must_use]
    pub fn form_objects(&self) -> Vec<(String, WidgetId)> {
        let mut out = Vec::new();
        self.collect_form_objects(self.root, &mut out);
        self.collect_form_objects(self.dialog_root, &mut out);
        out
    }

    fn collect_form_objects(&self, id: WidgetId, out: &mut Vec<(String, WidgetId)>) {
        let Some(node) = self.arena.get(id.0) else {
            return;
        };
        if node.form_object {
            out.push((node.dom_id.clone(), id));
        }
        for child in &node.children {
            self.collect_form_objects(*child, out);
        }
    }

    /// Finds a live widget by its DOM id.
    #[must_use]
    pub fn find_by_dom_id(&self, dom_id: &str) -> Option<WidgetId> {
        self.arena
            .iter()
            .find(|(_, node)| node.dom_id == dom_id)
            .map(|(handle, _)| WidgetId(handle))
    }

    /// Snapshot of the tree's text content keyed by DOM id, for state
    /// comparisons in tests and slot-learning verification.
    #[must_use]
    pub fn text_snapshot(&self) -> HashMap<String, String> {
        self.arena
            .iter()
            .map(|(_, node)| (node.dom_id.clone(), node.text.clone()))
            .collect()
    }
}

impl std::fmt::Debug for WidgetTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetTree")
            .field("widgets", &self.arena.len())
            .field("touched", &self.touched.len())
            .finish()
    }
}
