//! A processor that records every routed event.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use wsservice::{BoxError, Codec, Processor, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Connected(SessionId),
    Message(SessionId, String),
    Unknown(SessionId, Vec<u8>),
    Disconnected(SessionId),
}

pub struct Recorder {
    pub seen: mpsc::UnboundedSender<Seen>,
}

impl Recorder {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Seen>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (Self { seen }, rx)
    }
}

impl Codec for Recorder {
    type Message = String;

    fn decode(&self, _: SessionId, frame: &[u8]) -> Result<String, BoxError> {
        Ok(std::str::from_utf8(frame)?.to_string())
    }

    fn encode(&self, _: SessionId, message: &String) -> Result<Bytes, BoxError> {
        if message == "unencodable" {
            return Err("refused by codec".into());
        }
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }
}

#[async_trait]
impl Processor for Recorder {
    async fn on_connected(&self, id: SessionId) -> anyhow::Result<()> {
        self.seen.send(Seen::Connected(id))?;
        Ok(())
    }

    async fn on_disconnected(&self, id: SessionId) -> anyhow::Result<()> {
        self.seen.send(Seen::Disconnected(id))?;
        Ok(())
    }

    async fn on_message(&self, id: SessionId, message: String) -> anyhow::Result<()> {
        if message == "boom" {
            anyhow::bail!("handler rejected message");
        }
        self.seen.send(Seen::Message(id, message))?;
        Ok(())
    }

    async fn on_unknown(&self, id: SessionId, frame: Bytes) -> anyhow::Result<()> {
        self.seen.send(Seen::Unknown(id, frame.to_vec()))?;
        Ok(())
    }
}
