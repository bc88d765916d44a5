//! A UTF-8 text codec whose callbacks forward events to a channel.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use wsservice::{BoxError, Codec, Processor, SessionId};

/// Session traffic forwarded by [`TextProcessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Connected(SessionId),
    Text(SessionId, String),
    Unknown(SessionId, Bytes),
    Disconnected(SessionId),
}

pub struct TextProcessor {
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl TextProcessor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        (Self { inbound }, rx)
    }

    fn forward(&self, event: Inbound) -> anyhow::Result<()> {
        self.inbound
            .send(event)
            .map_err(|_| anyhow::anyhow!("inbound channel closed"))
    }
}

impl Codec for TextProcessor {
    type Message = String;

    fn decode(&self, _: SessionId, frame: &[u8]) -> Result<String, BoxError> {
        Ok(std::str::from_utf8(frame)?.to_owned())
    }

    fn encode(&self, _: SessionId, message: &String) -> Result<Bytes, BoxError> {
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }
}

#[async_trait]
impl Processor for TextProcessor {
    async fn on_connected(&self, session_id: SessionId) -> anyhow::Result<()> {
        self.forward(Inbound::Connected(session_id))
    }

    async fn on_disconnected(&self, session_id: SessionId) -> anyhow::Result<()> {
        self.forward(Inbound::Disconnected(session_id))
    }

    async fn on_message(&self, session_id: SessionId, message: String) -> anyhow::Result<()> {
        self.forward(Inbound::Text(session_id, message))
    }

    async fn on_unknown(&self, session_id: SessionId, frame: Bytes) -> anyhow::Result<()> {
        self.forward(Inbound::Unknown(session_id, frame))
    }
}
