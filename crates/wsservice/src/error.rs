use thiserror::Error;

use crate::id::SessionId;

/// Error type produced by codecs. Codec failures are data, not control flow,
/// so any error type the application already has is accepted.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while resolving the service configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `ListenAddr` is absent or empty.
    #[error("service config is missing `ListenAddr`")]
    MissingListenAddr,

    /// A recognized key carries a value the service cannot run with.
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// The configuration document could not be parsed.
    #[error("malformed service config")]
    Malformed(#[from] serde_json::Error),
}

/// Errors surfaced by a transport listener or one of its connections.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The listener could not bind its address.
    #[error("failed to bind listener on '{addr}'")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection is closed, locally or by the peer.
    #[error("connection closed")]
    Closed,

    /// A read or write outlived its deadline.
    #[error("deadline expired")]
    Timeout,

    /// An outbound frame exceeds the configured maximum message length.
    #[error("message too long: {len} bytes (max {max})")]
    MessageTooLong { len: usize, max: usize },

    /// The outbound queue is full; the connection has been closed.
    #[error("write queue full")]
    WriteQueueFull,

    /// `listen` was called twice on a listener that can only serve once.
    #[error("listener already started")]
    AlreadyListening,

    /// An error from the WebSocket layer.
    #[error("websocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors returned to callers of `WsService::send_to`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SendError {
    /// No live session carries this identifier.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The codec rejected the outbound message.
    #[error("failed to encode message for session {session_id}")]
    Encode {
        session_id: SessionId,
        #[source]
        source: BoxError,
    },

    /// The transport refused or failed the write.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that abort `WsService::start`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport listener failed to start.
    #[error("failed to start listener")]
    Listen(#[source] TransportError),
}
