//! Dirty-widget tracking, DOM diffing, and update serialization.
//!
//! The [`Renderer`] decides *what changed* and emits the minimal correct
//! client update. Dirty widgets are reconciled in tree-depth order
//! (shallowest first) so a removed container invalidates its descendants'
//! pending changes instead of emitting mutations for detached nodes. All
//! changes accumulated across one event-processing pass are flushed as one
//! atomic JavaScript block — the client never observes a torn DOM state.
//!
//! The renderer also owns the two per-session security counters: the
//! monotonically increasing update id the client must acknowledge (random
//! initial value, so a stolen session id alone cannot forge an ack) and the
//! random script id tying the bootstrap script to its page.
//!
//! - [`dom`]: [`DomOp`] and its JavaScript serialization
//! - [`slot`]: stateless-slot command objects and the learn protocol

pub mod dom;
pub mod slot;

pub use dom::{DomOp, Phase};
pub use slot::{SlotKind, StatelessSlot};

use crate::http::{ResponseKind, ResponseWriter};
use crate::signal::SignalRegistry;
use crate::util::token::random_u32;
use crate::widget::{WidgetId, WidgetTree};
use crate::JS_CLASS;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Verdict on a client-acknowledged update id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// The ack matches the last issued update id.
    Correct,
    /// The ack is within the backward-tolerance window (reordered poll).
    Reasonable,
    /// Stale, replayed, or forged — the request must be rejected.
    Bad,
}

/// How many updates an ack may lag behind before it is rejected.
///
/// One renewed poll plus one lost update survive reordering; anything
/// older — or any id at or past the batch currently being collected — is a
/// replay or a forgery.
pub const ACK_BACKWARD_WINDOW: u32 = 2;

/// Application-level page state the renderer serializes alongside widget
/// diffs: title, internal path, injected JavaScript, quit and redirect.
#[derive(Debug, Default)]
pub struct PageState {
    title: String,
    title_changed: bool,
    internal_path: String,
    internal_path_changed: bool,
    after_load_js: String,
    style_sheet: String,
    quit: bool,
    redirect: Option<String>,
}

impl PageState {
    /// Creates an empty page state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document title.
    pub fn set_title(&mut self, title: &str) {
        if self.title != title {
            self.title = title.to_owned();
            self.title_changed = true;
        }
    }

    /// The current document title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Sets the internal (bookmark/hash) path.
    pub fn set_internal_path(&mut self, path: &str) {
        if self.internal_path != path {
            self.internal_path = path.to_owned();
            self.internal_path_changed = true;
        }
    }

    /// The current internal path.
    #[must_use]
    pub fn internal_path(&self) -> &str {
        &self.internal_path
    }

    /// Appends one-shot JavaScript to run after the next update is applied.
    pub fn run_javascript(&mut self, js: &str) {
        self.after_load_js.push_str(js);
    }

    /// Sets the inline stylesheet served with the page.
    pub fn set_style_sheet(&mut self, css: &str) {
        self.style_sheet = css.to_owned();
    }

    /// The inline stylesheet.
    #[must_use]
    pub fn style_sheet(&self) -> &str {
        &self.style_sheet
    }

    /// Quits the application; the session dies after the current pass.
    pub fn quit(&mut self) {
        self.quit = true;
    }

    /// Whether the application has quit.
    #[must_use]
    pub const fn has_quit(&self) -> bool {
        self.quit
    }

    /// Redirects the client instead of rendering an update.
    pub fn set_redirect(&mut self, url: &str) {
        let url = if url.is_empty() { "?" } else { url };
        self.redirect = Some(url.to_owned());
    }

    /// Takes the pending redirect, if any.
    pub fn take_redirect(&mut self) -> Option<String> {
        self.redirect.take()
    }
}

/// The per-session renderer.
pub struct Renderer {
    ajax: bool,
    dirty: BTreeSet<WidgetId>,
    visible_only: bool,
    learning: bool,
    rendered: bool,
    collected: String,
    ack_id: u32,
    script_id: u32,
    two_phase_threshold: usize,
    cookies: Vec<String>,
    current_form_objects_list: String,
}

impl Renderer {
    /// Creates a renderer with random initial ack and script ids.
    #[must_use]
    pub fn new(two_phase_threshold: usize) -> Self {
        Self {
            ajax: false,
            dirty: BTreeSet::new(),
            visible_only: true,
            learning: false,
            rendered: false,
            collected: String::new(),
            ack_id: random_u32(),
            script_id: random_u32(),
            two_phase_threshold,
            cookies: Vec::new(),
            current_form_objects_list: String::new(),
        }
    }

    /// Enables fine-grained (ajax) rendering for this session.
    pub fn enable_ajax(&mut self) {
        self.ajax = true;
    }

    /// Whether fine-grained rendering is enabled.
    #[must_use]
    pub const fn is_ajax(&self) -> bool {
        self.ajax
    }

    /// The random script id tying the bootstrap script to this page.
    #[must_use]
    pub const fn script_id(&self) -> u32 {
        self.script_id
    }

    /// The update id the client is expected to acknowledge next.
    #[must_use]
    pub const fn expected_ack(&self) -> u32 {
        self.ack_id
    }

    /// Whether anything has been rendered to the client yet.
    #[must_use]
    pub const fn is_rendered(&self) -> bool {
        self.rendered
    }

    /// Include invisible changes in the next collection pass.
    pub fn set_visible_only(&mut self, visible_only: bool) {
        self.visible_only = visible_only;
    }

    /// Marks a widget as needing reconciliation. Only meaningful for ajax
    /// sessions; plain-HTML sessions always regenerate the full page.
    pub fn need_update(&mut self, widget: WidgetId) {
        if self.ajax {
            self.dirty.insert(widget);
        }
    }

    /// Unmarks a widget.
    pub fn done_update(&mut self, widget: WidgetId) {
        self.dirty.remove(&widget);
    }

    /// Number of widgets currently marked dirty.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Whether the client's DOM is fully in sync with the server tree.
    #[must_use]
    pub fn js_synced(&self) -> bool {
        self.dirty.is_empty() && self.collected.is_empty()
    }

    /// Folds widgets mutated by application code into the dirty set,
    /// invalidating the learned scripts of their slots. Not used for
    /// mutations made by slot execution itself — those flow through
    /// collection without invalidating the very script being recorded.
    pub fn sync_dirty(&mut self, tree: &mut WidgetTree, signals: &mut SignalRegistry) {
        for widget in tree.take_touched() {
            if !self.learning {
                signals.invalidate_widget(widget);
            }
            if self.ajax {
                self.dirty.insert(widget);
            } else {
                tree.mark_render_ok(widget);
            }
        }
    }

    /// Collects the dirty set into DOM operations, shallowest-first.
    ///
    /// Widgets whose ancestor chain no longer reaches a render root
    /// resolve to depth 0 and are discarded without emitting anything.
    pub fn collect_changes(&mut self, tree: &mut WidgetTree) -> Vec<DomOp> {
        // Slot executions mark widgets via the touched list only.
        for widget in tree.take_touched() {
            if self.ajax {
                self.dirty.insert(widget);
            } else {
                tree.mark_render_ok(widget);
            }
        }

        let mut depth_order: BTreeMap<usize, Vec<WidgetId>> = BTreeMap::new();
        for widget in std::mem::take(&mut self.dirty) {
            depth_order
                .entry(tree.depth_from_root(widget))
                .or_default()
                .push(widget);
        }

        let mut changes = Vec::new();
        for (depth, widgets) in depth_order {
            for widget in widgets {
                if depth == 0 {
                    // Detached or stale: drop its changes on the floor.
                    tree.mark_render_ok(widget);
                    continue;
                }
                if !self.learning && self.visible_only {
                    if let Some(node) = tree.get(widget) {
                        if node.is_stubbed() {
                            tree.mark_render_ok(widget);
                            continue;
                        }
                    }
                }
                changes.extend(tree.drain_pending(widget));
            }
        }
        changes
    }

    /// Collects changes and serializes them, removals first. Passing `None`
    /// discards the collected changes (used to throw away undo diffs).
    pub fn collect_js(
        &mut self,
        tree: &mut WidgetTree,
        page: &mut PageState,
        out: Option<&mut String>,
    ) {
        let changes = self.collect_changes(tree);

        if let Some(out) = out {
            for op in changes.iter().filter(|op| op.phase() == Phase::Delete) {
                op.as_javascript(out);
            }
            for op in changes.iter().filter(|op| op.phase() == Phase::Update) {
                op.as_javascript(out);
            }

            if page.title_changed {
                out.push_str(JS_CLASS);
                out.push_str("._p_.setTitle(");
                dom::js_string_literal(&page.title, out);
                out.push_str(");");
            }
            if page.internal_path_changed {
                out.push_str(JS_CLASS);
                out.push_str("._p_.setHash(");
                dom::js_string_literal(&page.internal_path, out);
                out.push_str(");");
            }
            out.push_str(&page.after_load_js);
        }
        page.after_load_js.clear();
        page.title_changed = false;
        page.internal_path_changed = false;
    }

    /// Saves pending changes aside (e.g. from resource completion), so a
    /// learned-signal replay can be discarded without losing them.
    pub fn save_changes(&mut self, tree: &mut WidgetTree, page: &mut PageState) {
        let mut saved = std::mem::take(&mut self.collected);
        self.collect_js(tree, page, Some(&mut saved));
        self.collected = saved;
    }

    /// Discards all currently collected changes.
    pub fn discard_changes(&mut self, tree: &mut WidgetTree, page: &mut PageState) {
        self.collect_js(tree, page, None);
    }

    /// Runs the learn cycle for a slot and returns the recorded script.
    ///
    /// Pre-learnable slots are triggered, recorded, and undone, leaving
    /// observable state unchanged; auto-learn slots keep their effect and
    /// the recorded script joins the current changes.
    pub fn learn(
        &mut self,
        slot: &mut StatelessSlot,
        tree: &mut WidgetTree,
        page: &mut PageState,
    ) -> String {
        self.save_changes(tree, page);

        let pre_learn = slot.kind() == SlotKind::PreLearn;
        if pre_learn {
            self.learning = true;
        }

        slot.trigger(tree);

        let mut js = String::new();
        self.collect_js(tree, page, Some(&mut js));

        if pre_learn {
            slot.undo_trigger(tree);
            self.collect_js(tree, page, None);
            self.learning = false;
        } else {
            self.collected.push_str(&js);
        }

        slot.set_learned(js.clone());
        js
    }

    /// Replays an already-learned slot server-side to keep state in sync;
    /// the resulting diff is discarded by the caller's save/discard dance
    /// because the client has already applied the cached script.
    pub fn replay_learned(&mut self, slot: &mut StatelessSlot, tree: &mut WidgetTree) {
        self.learning = true;
        slot.trigger(tree);
        self.learning = false;
    }

    /// Pre-learns every eligible slot: learnable, not yet learned, sender
    /// alive, unstubbed, and attached under a render root.
    pub fn pre_learn_stateless(
        &mut self,
        tree: &mut WidgetTree,
        signals: &mut SignalRegistry,
        page: &mut PageState,
    ) {
        if !self.ajax {
            return;
        }
        for id in signals.prelearn_candidates() {
            let Some(connection) = signals.get(id) else {
                continue;
            };
            let owner = connection.owner;
            let Some(node) = tree.get(owner) else {
                continue;
            };
            if node.is_stubbed() || tree.depth_from_root(owner) == 0 {
                continue;
            }
            let Some(mut slot) = signals.take_stateless(id) else {
                continue;
            };
            self.learn(&mut slot, tree, page);
            signals.restore_stateless(id, slot);
        }
    }

    /// Validates a client-acknowledged update id.
    ///
    /// Ids are monotonic per session and never reused; an ack equal to an
    /// id not yet flushed (in flight) wraps far outside the window and is
    /// rejected as a replay.
    pub fn ack_update(&mut self, id: u32) -> AckState {
        if id == self.ack_id {
            AckState::Correct
        } else {
            let behind = self.ack_id.wrapping_sub(id);
            if behind != 0 && behind <= ACK_BACKWARD_WINDOW {
                AckState::Reasonable
            } else {
                tracing::warn!(
                    security = true,
                    ack = id,
                    expected = self.ack_id,
                    "ack outside tolerance window"
                );
                AckState::Bad
            }
        }
    }

    /// Assembles one atomic update batch and stamps it with a fresh id.
    ///
    /// The batch contains every change accumulated across the pass: saved
    /// changes, widget diffs, pre-learning output, form-object updates,
    /// title/path changes, injected JavaScript, and the quit script.
    pub fn assemble_update(
        &mut self,
        tree: &mut WidgetTree,
        signals: &mut SignalRegistry,
        page: &mut PageState,
    ) -> String {
        let mut out = String::new();
        out.push('{');

        out.push_str(&std::mem::take(&mut self.collected));
        let mut body = String::new();
        self.collect_js(tree, page, Some(&mut body));
        out.push_str(&body);

        // Changes are recorded and cleared; now stateless code can be
        // learned and whatever that produced collected afterwards.
        self.pre_learn_stateless(tree, signals, page);

        out.push_str(&std::mem::take(&mut self.collected));
        let mut body = String::new();
        self.collect_js(tree, page, Some(&mut body));
        out.push_str(&body);

        let form_objects = Self::form_objects_list(tree);
        if form_objects != self.current_form_objects_list {
            self.current_form_objects_list.clone_from(&form_objects);
            let _ = write!(out, "{JS_CLASS}._p_.setFormObjects([{form_objects}]);");
        }

        if page.has_quit() {
            let _ = write!(out, "{JS_CLASS}._p_.quit();");
        }

        out.push('}');

        self.ack_id = self.ack_id.wrapping_add(1);
        let _ = write!(out, "{JS_CLASS}._p_.response({});", self.ack_id);
        self.rendered = true;
        out
    }

    fn form_objects_list(tree: &WidgetTree) -> String {
        let names: Vec<String> = tree
            .form_objects()
            .iter()
            .filter(|(_, id)| tree.get(*id).is_some_and(|n| n.is_enabled()))
            .map(|(name, _)| format!("'{name}'"))
            .collect();
        names.join(",")
    }

    /// Whether an inline update of `len` bytes should instead go through a
    /// follow-up update round-trip.
    #[must_use]
    pub const fn exceeds_two_phase_threshold(&self, len: usize) -> bool {
        len >= self.two_phase_threshold
    }

    /// Serves the bootstrap skeleton that probes script capability and
    /// fetches the main script.
    pub fn serve_bootstrap_page(
        &mut self,
        page: &PageState,
        rw: &mut ResponseWriter,
        path: &str,
        session_query: &str,
    ) {
        rw.set_content_type("text/html; charset=UTF-8");
        self.apply_cookies(rw);
        rw.write("<!DOCTYPE html><html><head><title>");
        rw.write(&dom::html_escape(page.title()));
        rw.write("</title><script>window.location.replace(\"");
        rw.write(path);
        rw.write(session_query);
        rw.write(&format!(
            "&request=script&sid={}\");</script>",
            self.script_id
        ));
        rw.write("<noscript><meta http-equiv=\"refresh\" content=\"0; url=");
        rw.write(path);
        rw.write(session_query);
        rw.write("&js=no\"></noscript></head><body></body></html>");
    }

    /// Serves the full-page HTML rendition (no-script clients).
    pub fn serve_main_page(
        &mut self,
        tree: &mut WidgetTree,
        page: &mut PageState,
        rw: &mut ResponseWriter,
    ) {
        rw.set_content_type("text/html; charset=UTF-8");
        self.apply_cookies(rw);
        rw.write("<!DOCTYPE html><html><head><title>");
        rw.write(&dom::html_escape(page.title()));
        rw.write("</title>");
        if !page.style_sheet().is_empty() {
            rw.write("<style>");
            rw.write(page.style_sheet());
            rw.write("</style>");
        }
        rw.write("</head><body>");
        rw.write(&tree.render_html(tree.root()));
        rw.write(&tree.render_html(tree.dialog_root()));
        rw.write("</body></html>");

        self.mark_all_render_ok(tree, page);
        self.rendered = true;
    }

    /// Serves the main application script (ajax clients), carrying the
    /// initial DOM, the form-object list, and the random ack seed.
    pub fn serve_main_script(
        &mut self,
        tree: &mut WidgetTree,
        signals: &mut SignalRegistry,
        page: &mut PageState,
        rw: &mut ResponseWriter,
        session_query: &str,
    ) {
        rw.set_content_type("text/javascript; charset=UTF-8");
        self.apply_cookies(rw);

        let mut out = String::new();
        let _ = write!(
            out,
            "{JS_CLASS}._p_.init(",
        );
        dom::js_string_literal(session_query, &mut out);
        let _ = write!(out, ",{},{});", self.script_id, self.ack_id);

        out.push_str(JS_CLASS);
        out.push_str("._p_.setTitle(");
        dom::js_string_literal(page.title(), &mut out);
        out.push_str(");");

        out.push_str(JS_CLASS);
        out.push_str("._p_.loadHtml(");
        let mut html = tree.render_html(tree.root());
        html.push_str(&tree.render_html(tree.dialog_root()));
        dom::js_string_literal(&html, &mut out);
        out.push_str(");");

        self.mark_all_render_ok(tree, page);

        // Learn whatever is learnable before the first event ever fires.
        self.pre_learn_stateless(tree, signals, page);
        let mut learned = std::mem::take(&mut self.collected);
        self.collect_js(tree, page, Some(&mut learned));
        if !self.exceeds_two_phase_threshold(learned.len()) {
            out.push_str(&learned);
        } else {
            self.collected = learned;
            let _ = write!(out, "{JS_CLASS}._p_.update();");
        }

        let form_objects = Self::form_objects_list(tree);
        if !form_objects.is_empty() {
            self.current_form_objects_list.clone_from(&form_objects);
            let _ = write!(out, "{JS_CLASS}._p_.setFormObjects([{form_objects}]);");
        }

        rw.write(&out);
        self.rendered = true;
    }

    /// Serves the linked stylesheet.
    pub fn serve_linked_css(&mut self, page: &PageState, rw: &mut ResponseWriter) {
        rw.set_content_type("text/css; charset=UTF-8");
        rw.write(page.style_sheet());
    }

    /// Serves a minimal error rendition matching the response kind.
    pub fn serve_error(&mut self, status: u16, rw: &mut ResponseWriter, message: &str) {
        rw.set_status(status);
        match rw.kind() {
            ResponseKind::Page => {
                rw.set_content_type("text/html; charset=UTF-8");
                rw.write("<html><head><title>Error occurred.</title></head><body><h2>Error occurred.</h2><p>");
                rw.write(&dom::html_escape(message));
                rw.write("</p></body></html>");
            }
            ResponseKind::Script | ResponseKind::Update => {
                rw.set_content_type("text/plain; charset=UTF-8");
                rw.write(message);
            }
        }
    }

    /// Emits the client-side reload script for killed-session recovery.
    pub fn let_reload_js(&mut self, rw: &mut ResponseWriter) {
        rw.set_content_type("text/plain; charset=UTF-8");
        rw.write("window.location.reload(true);");
    }

    /// Emits the reload wrapped in an HTML shell.
    pub fn let_reload_html(&mut self, rw: &mut ResponseWriter) {
        rw.set_content_type("text/html; charset=UTF-8");
        rw.write("<html><script type=\"text/javascript\">window.location.reload(true);</script><body></body></html>");
    }

    /// Queues a Set-Cookie header for the next served response.
    pub fn set_cookie(&mut self, name: &str, value: &str, secure: bool) {
        let mut cookie = format!("{name}={value}; Path=/; HttpOnly");
        if secure {
            cookie.push_str("; Secure");
        }
        self.cookies.push(cookie);
    }

    /// Adds queued cookies to the response.
    pub fn apply_cookies(&mut self, rw: &mut ResponseWriter) {
        for cookie in self.cookies.drain(..) {
            rw.add_header("Set-Cookie", cookie);
        }
    }

    fn mark_all_render_ok(&mut self, tree: &mut WidgetTree, page: &mut PageState) {
        for widget in tree.take_touched() {
            tree.mark_render_ok(widget);
        }
        for widget in std::mem::take(&mut self.dirty) {
            tree.mark_render_ok(widget);
        }
        page.title_changed = false;
        page.internal_path_changed = false;
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("ajax", &self.ajax)
            .field("dirty", &self.dirty.len())
            .field("rendered", &self.rendered)
            .finish_non_exhaustive()
    }
}
