//! DOM mutation operations and their JavaScript serialization.
//!
//! A [`DomOp`] is one reconciled client-side mutation. Ops are emitted in
//! two phases — removals first, then updates — so that a batch never
//! touches a node after an ancestor's removal statement.

use crate::JS_CLASS;

/// One client-side DOM mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomOp {
    /// Replace the inner HTML of the element.
    SetHtml {
        /// Target element id.
        id: String,
        /// New inner HTML.
        html: String,
    },
    /// Set an attribute on the element.
    SetAttribute {
        /// Target element id.
        id: String,
        /// Attribute name.
        name: String,
        /// Attribute value.
        value: String,
    },
    /// Remove an attribute from the element.
    RemoveAttribute {
        /// Target element id.
        id: String,
        /// Attribute name.
        name: String,
    },
    /// Insert a rendered child under the element.
    InsertChild {
        /// Parent element id.
        parent: String,
        /// Rendered HTML of the inserted subtree.
        html: String,
    },
    /// Remove the element (and its subtree).
    Remove {
        /// Target element id.
        id: String,
    },
}

/// Emission phase of a [`DomOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Removals, emitted before any update.
    Delete,
    /// Everything else.
    Update,
}

impl DomOp {
    /// The phase this op belongs to.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Remove { .. } => Phase::Delete,
            _ => Phase::Update,
        }
    }

    /// The element id the op targets.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::SetHtml { id, .. }
            | Self::SetAttribute { id, .. }
            | Self::RemoveAttribute { id, .. }
            | Self::Remove { id } => id,
            Self::InsertChild { parent, .. } => parent,
        }
    }

    /// Appends the op as one JavaScript statement.
    pub fn as_javascript(&self, out: &mut String) {
        match self {
            Self::SetHtml { id, html } => {
                out.push_str(JS_CLASS);
                out.push_str("._p_.setHtml(");
                js_string_literal(id, out);
                out.push(',');
                js_string_literal(html, out);
                out.push_str(");");
            }
            Self::SetAttribute { id, name, value } => {
                out.push_str(JS_CLASS);
                out.push_str("._p_.setAttr(");
                js_string_literal(id, out);
                out.push(',');
                js_string_literal(name, out);
                out.push(',');
                js_string_literal(value, out);
                out.push_str(");");
            }
            Self::RemoveAttribute { id, name } => {
                out.push_str(JS_CLASS);
                out.push_str("._p_.removeAttr(");
                js_string_literal(id, out);
                out.push(',');
                js_string_literal(name, out);
                out.push_str(");");
            }
            Self::InsertChild { parent, html } => {
                out.push_str(JS_CLASS);
                out.push_str("._p_.insert(");
                js_string_literal(parent, out);
                out.push(',');
                js_string_literal(html, out);
                out.push_str(");");
            }
            Self::Remove { id } => {
                out.push_str(JS_CLASS);
                out.push_str("._p_.remove(");
                js_string_literal(id, out);
                out.push_str(");");
            }
        }
    }
}

/// Appends `text` as a single-quoted JavaScript string literal.
pub fn js_string_literal(text: &str, out: &mut String) {
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Escaping closes an inline <script> context safely.
            '/' => out.push_str("\\/"),
            c if (c as u32) < 0x20 => {
                use std::fmt::Write;
                write!(out, "\\u{:04x}", c as u32).expect("writing to string cannot fail");
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

/// Escapes text for inclusion in HTML content or attribute values.
#[must_use]
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_is_delete_phase() {
        let op = DomOp::Remove { id: "w3".into() };
        assert_eq!(op.phase(), Phase::Delete);
        let op = DomOp::SetHtml {
            id: "w3".into(),
            html: "x".into(),
        };
        assert_eq!(op.phase(), Phase::Update);
    }

    #[test]
    fn javascript_emission() {
        let mut out = String::new();
        DomOp::SetHtml {
            id: "w1".into(),
            html: "<b>it's</b>".into(),
        }
        .as_javascript(&mut out);
        assert_eq!(out, "Weft._p_.setHtml('w1','<b>it\\'s<\\/b>');");

        let mut out = String::new();
        DomOp::Remove { id: "w9".into() }.as_javascript(&mut out);
        assert_eq!(out, "Weft._p_.remove('w9');");
    }

    #[test]
    fn string_literal_escapes_control_chars() {
        let mut out = String::new();
        js_string_literal("a\nb\u{1}", &mut out);
        assert_eq!(out, "'a\\nb\\u0001'");
    }

    #[test]
    fn html_escaping() {
        assert_eq!(
            html_escape(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }
}
