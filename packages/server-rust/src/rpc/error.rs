//! Error taxonomy for broker RPC calls.
//!
//! `RpcError` is `Clone` because a single outcome is fanned out to every
//! observer of a call (see [`super::completion`]).

/// Errors surfaced by the correlation engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The broker could not be reached at startup. Fatal to the process.
    #[error("broker connection failed after {attempts} attempt(s): {reason}")]
    Connection { attempts: u32, reason: String },

    /// The request never left this process.
    #[error("failed to publish request to {destination}: {reason}")]
    Publish { destination: String, reason: String },

    /// The request was sent but no reply arrived before the deadline.
    #[error("no reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A token was registered twice. Indicates a broken token generator.
    #[error("correlation token {token} is already registered")]
    DuplicateToken { token: String },

    /// A reply body could not be decoded.
    #[error("malformed reply: {reason}")]
    MalformedReply { reason: String },

    /// The service is shutting down and no longer accepts or completes calls.
    #[error("classification service is shutting down")]
    Shutdown,
}

impl RpcError {
    /// Short machine-readable name, used in logs and HTTP error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Publish { .. } => "publish",
            Self::Timeout { .. } => "timeout",
            Self::DuplicateToken { .. } => "duplicate_token",
            Self::MalformedReply { .. } => "malformed_reply",
            Self::Shutdown => "shutdown",
        }
    }
}
