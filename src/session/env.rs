//! Environment snapshot taken at session creation.
//!
//! The environment captures what the framework learned about the client
//! from its first request: user agent, address, locale, cookie support,
//! and — once the bootstrap probe completes — script (ajax) capability.
//! The user agent and client address also back the anti-hijacking
//! invariant: a mid-session change of either, without cookie proof, kills
//! the session.

use crate::http::Request;

/// Immutable-after-bootstrap snapshot of the client environment.
#[derive(Debug, Clone)]
pub struct Environment {
    user_agent: String,
    client_address: String,
    locale: String,
    url_scheme: String,
    supports_cookies: bool,
    ajax: bool,
}

impl Environment {
    /// Captures the environment from a session's first request.
    #[must_use]
    pub fn from_request(request: &Request) -> Self {
        let locale = request
            .header_value("Accept-Language")
            .and_then(|v| v.split(',').next())
            .unwrap_or("en")
            .trim()
            .to_owned();
        Self {
            user_agent: request.header_value("User-Agent").unwrap_or("").to_owned(),
            client_address: request.client_address().to_owned(),
            locale,
            url_scheme: request
                .header_value("X-Forwarded-Proto")
                .unwrap_or("http")
                .to_owned(),
            supports_cookies: request.header_value("Cookie").is_some(),
            ajax: false,
        }
    }

    /// The user agent reported on the first request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The client address reported on the first request.
    #[must_use]
    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    /// The client's preferred locale.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// The URL scheme the client reached us through.
    #[must_use]
    pub fn url_scheme(&self) -> &str {
        &self.url_scheme
    }

    /// Whether the client sent cookies.
    #[must_use]
    pub const fn supports_cookies(&self) -> bool {
        self.supports_cookies
    }

    /// Whether the client proved it can run script.
    #[must_use]
    pub const fn ajax(&self) -> bool {
        self.ajax
    }

    /// Records a successful script-capability probe.
    pub fn enable_ajax(&mut self) {
        self.ajax = true;
    }

    pub(crate) fn note_cookies(&mut self, present: bool) {
        if present {
            self.supports_cookies = true;
        }
    }
}
