//! The central error type shared across `client-port-core` and `client-port`.
//!
//! User-input errors raise synchronously, remote errors carry whatever the
//! server sent back, and protocol sanity failures never reach here at all
//! (they become communication warnings instead).

use crate::patch::PatchError;
use std::sync::Arc;

/// A structural description of why a value failed schema validation.
///
/// Opaque beyond a human-readable message: the registry's validators are
/// themselves opaque, so there is nothing more structured to report here
/// without committing to one schema language.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationIssue(pub String);

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The opaque, wire-format error a server sends back for `rpcError`,
/// `channelError`, `signalError` and `writableSignalError`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
pub struct SerializedError {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_title: Option<String>,
}

/// The default, ready-to-use remote error produced when the caller of
/// [`crate::registry::Registry`]-consuming code doesn't supply its own
/// `ErrorDeserializer`. Carries the captured client stack (or an empty one,
/// per verbose-errors being off) alongside the server's payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", format_remote(.title, .cause.as_deref(), .stack.as_deref()))]
pub struct RemoteError {
    pub title: String,
    pub cause: Option<String>,
    pub suggestion: Option<String>,
    pub error_data: Option<serde_json::Value>,
    pub display_data: Option<serde_json::Value>,
    pub stack: String,
    pub root_title: Option<String>,
}

fn format_remote(title: &str, cause: Option<&str>, stack: &str) -> String {
    match (cause, stack.is_empty()) {
        (Some(cause), false) => format!("{title}: {cause}\n{stack}"),
        (Some(cause), true) => format!("{title}: {cause}"),
        (None, false) => format!("{title}\n{stack}"),
        (None, true) => title.to_string(),
    }
}

impl RemoteError {
    pub fn from_wire(err: SerializedError, stack: String) -> Self {
        Self {
            title: err.title,
            cause: err.cause,
            suggestion: err.suggestion,
            error_data: err.error_data,
            display_data: err.display_data,
            stack,
            root_title: err.root_title,
        }
    }
}

/// Raised when the transport collaborator reports it is terminally broken.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("the port was explicitly shut down")]
    Shutdown,
}

/// The central error type covering user-input, remote and protocol-level
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// User-input error: no endpoint is registered under this name.
    #[error("no such endpoint: {0}")]
    NoSuchEndpoint(String),
    /// User-input error: the outbound payload failed schema validation.
    #[error("invalid parameter for endpoint {endpoint}: {issue}")]
    InvalidParameter {
        endpoint: String,
        issue: ValidationIssue,
    },
    /// Registration error: a name was already registered.
    #[error("duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),
    /// A writable signal's upstream writer was invoked with no active
    /// subscription session.
    #[error("not subscribed")]
    NotSubscribed,
    /// Applying a patch list failed (bad path, type mismatch, etc).
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A remote error, deserialized by the caller-supplied `ErrorDeserializer`.
    /// Type-erased because the deserializer is free to produce any
    /// language-native error, not just [`RemoteError`].
    #[error("{0}")]
    Remote(Arc<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;
