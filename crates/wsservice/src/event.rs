use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::id::SessionId;

/// Turns frames into application messages and back.
///
/// Both directions are keyed by session so stateful protocols can keep
/// per-session codec state.
pub trait Codec: Send + Sync + 'static {
    type Message: Send + 'static;

    fn decode(&self, session_id: SessionId, frame: &[u8]) -> Result<Self::Message, BoxError>;

    fn encode(&self, session_id: SessionId, message: &Self::Message) -> Result<Bytes, BoxError>;
}

/// Receives routed session events.
///
/// An error returned from a callback is logged and affects only the event
/// that produced it.
#[async_trait]
pub trait Processor: Codec {
    async fn on_connected(&self, session_id: SessionId) -> anyhow::Result<()>;

    async fn on_disconnected(&self, session_id: SessionId) -> anyhow::Result<()>;

    async fn on_message(
        &self,
        session_id: SessionId,
        message: Self::Message,
    ) -> anyhow::Result<()>;

    /// Called with the raw frame when it could not be decoded.
    async fn on_unknown(&self, session_id: SessionId, frame: Bytes) -> anyhow::Result<()>;
}

/// What happened to a session.
pub enum EventKind<M> {
    Connected,
    Disconnected,
    Decoded(M),
    Undecoded(Bytes),
}

impl<M> EventKind<M> {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Decoded(_) => "decoded",
            EventKind::Undecoded(_) => "undecoded",
        }
    }
}

impl<M> fmt::Debug for EventKind<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Undecoded(frame) => f.debug_tuple("Undecoded").field(&frame.len()).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// A session event on its way to the processor that must handle it.
pub struct ConnectionEvent<P: Processor> {
    pub session_id: SessionId,
    pub processor: Arc<P>,
    pub kind: EventKind<P::Message>,
}

impl<P: Processor> ConnectionEvent<P> {
    pub fn new(session_id: SessionId, processor: Arc<P>, kind: EventKind<P::Message>) -> Self {
        Self {
            session_id,
            processor,
            kind,
        }
    }
}

impl<P: Processor> fmt::Debug for ConnectionEvent<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvent")
            .field("session_id", &self.session_id)
            .field("kind", &self.kind)
            .finish()
    }
}
