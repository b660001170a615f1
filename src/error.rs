//! Error types and error handling strategy.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Security rejections carry the HTTP status the request must fail with
//! - "Expected" outcomes (a missing signal target, an oversized upload) are
//!   modeled as results or skips, never as panics
//! - Everything raised by the dispatch and render layers propagates to a
//!   single top-level catch in the session's request handler
//!
//! # Error Categories
//!
//! - **Transport**: malformed requests, parse failures, oversized bodies
//! - **Security**: session/ack/origin validation failures
//! - **Lifecycle**: operations against dead or mis-ordered session states
//! - **Application**: failures raised by application callbacks
//! - **Internal**: framework bugs and invalid states

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    // === Transport ===
    /// The request method is not allowed for this path.
    InvalidMethod,
    /// The request body or parameters could not be parsed.
    MalformedRequest,
    /// The request body exceeded the configured maximum.
    PayloadTooLarge,

    // === Security ===
    /// A stateful request presented a session id that does not match.
    SessionIdMismatch,
    /// The acknowledged update id is outside the tolerated window.
    InvalidAck,
    /// The script id presented by a bootstrap follow-up does not match.
    ScriptIdMismatch,
    /// The client user agent or address changed without cookie proof.
    HijackDetected,
    /// A WebSocket upgrade was attempted before the session was established.
    PrematureUpgrade,

    // === Lifecycle ===
    /// The session is dead; no further requests are processed.
    SessionDead,
    /// A suspended event loop was resumed after its session was killed.
    SuspensionKilled,
    /// A state transition that may only move forward tried to move back.
    InvalidStateTransition,

    // === Resources / scheduling ===
    /// No worker would remain to service a suspended event loop's resume.
    NoIdleWorker,
    /// A named resource is not exposed by the application.
    ResourceNotExposed,
    /// An internal path requested on first load does not exist.
    InvalidPath,

    // === Application ===
    /// An application callback failed while starting or handling an event.
    Application,

    // === Internal ===
    /// Internal framework error (bug).
    Internal,
}

/// Coarse error category, used for logging and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or over-limit requests.
    Transport,
    /// Session possession, ack, and origin validation failures.
    Security,
    /// Dead sessions and mis-ordered lifecycle operations.
    Lifecycle,
    /// Failures raised by application callbacks.
    Application,
    /// Framework bugs.
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMethod | Self::MalformedRequest | Self::PayloadTooLarge => {
                ErrorCategory::Transport
            }
            Self::SessionIdMismatch
            | Self::InvalidAck
            | Self::ScriptIdMismatch
            | Self::HijackDetected
            | Self::PrematureUpgrade => ErrorCategory::Security,
            Self::SessionDead | Self::SuspensionKilled | Self::InvalidStateTransition => {
                ErrorCategory::Lifecycle
            }
            Self::NoIdleWorker | Self::ResourceNotExposed | Self::InvalidPath => {
                ErrorCategory::Internal
            }
            Self::Application => ErrorCategory::Application,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status a request failing with this kind is served.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidMethod | Self::MalformedRequest | Self::PayloadTooLarge => 400,
            Self::SessionIdMismatch
            | Self::InvalidAck
            | Self::ScriptIdMismatch
            | Self::HijackDetected
            | Self::PrematureUpgrade => 403,
            Self::InvalidPath | Self::ResourceNotExposed => 404,
            Self::SessionDead
            | Self::SuspensionKilled
            | Self::InvalidStateTransition
            | Self::NoIdleWorker
            | Self::Application
            | Self::Internal => 500,
        }
    }

    /// Returns `true` when the failure is a security-policy rejection.
    #[must_use]
    pub const fn is_security(&self) -> bool {
        matches!(self.category(), ErrorCategory::Security)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidMethod => "invalid request method",
            Self::MalformedRequest => "malformed request",
            Self::PayloadTooLarge => "request payload too large",
            Self::SessionIdMismatch => "session id mismatch",
            Self::InvalidAck => "invalid update acknowledgement",
            Self::ScriptIdMismatch => "script id mismatch",
            Self::HijackDetected => "session hijack detected",
            Self::PrematureUpgrade => "websocket upgrade before session established",
            Self::SessionDead => "session is dead",
            Self::SuspensionKilled => "session was killed during a suspended event loop",
            Self::InvalidStateTransition => "invalid session state transition",
            Self::NoIdleWorker => "no idle worker available",
            Self::ResourceNotExposed => "resource not exposed",
            Self::InvalidPath => "invalid internal path",
            Self::Application => "application error",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// The crate-wide error type: a kind plus optional human context.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates an error of the given kind with no extra context.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Creates an error of the given kind with context.
    #[must_use]
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
        }
    }

    /// Creates an application-category error from any displayable cause.
    #[must_use]
    pub fn application(cause: impl fmt::Display) -> Self {
        Self::with_context(ErrorKind::Application, cause.to_string())
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the attached context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns the HTTP status a request failing with this error is served.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}: {ctx}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing request parameters and bodies.
///
/// These are transport-level failures: they are reported inline in the HTTP
/// response and never escalate past the controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The request body exceeded the configured maximum size.
    #[error("request body of {size} bytes exceeds maximum of {max}")]
    BodyTooLarge {
        /// Observed body size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Accumulated form data exceeded the configured maximum size.
    #[error("form data exceeds maximum of {max} bytes")]
    FormDataTooLarge {
        /// Configured maximum.
        max: usize,
    },
    /// A multipart body was structurally invalid.
    #[error("malformed multipart body: {0}")]
    Multipart(String),
    /// A percent-escape sequence was truncated or not hex.
    #[error("invalid percent-encoding in {0}")]
    Escape(&'static str),
    /// The Content-Type header was missing or unusable for the body kind.
    #[error("unsupported content type: {0}")]
    ContentType(String),
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        let kind = match &e {
            ParseError::BodyTooLarge { .. } | ParseError::FormDataTooLarge { .. } => {
                ErrorKind::PayloadTooLarge
            }
            _ => ErrorKind::MalformedRequest,
        };
        Self::with_context(kind, e.to_string())
    }
}
