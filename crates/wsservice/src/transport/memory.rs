use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{
    CloseSignal, Connection, ConnectionSlots, Deadline, ListenOptions, Listener, ListenerHandle,
    NewAgent, serve_connection,
};
use crate::error::TransportError;

/// A dial request from a [`MemoryConnector`].
struct Dial {
    inbound: mpsc::UnboundedReceiver<Bytes>,
    accepted: oneshot::Sender<mpsc::Receiver<Bytes>>,
}

/// An in-process listener. Peers connect through a [`MemoryConnector`].
pub struct MemoryListener {
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Dial>>>,
    connector: MemoryConnector,
}

impl MemoryListener {
    pub fn new() -> Self {
        let (dials, incoming) = mpsc::unbounded_channel();
        Self {
            incoming: Mutex::new(Some(incoming)),
            connector: MemoryConnector { dials },
        }
    }

    pub fn connector(&self) -> MemoryConnector {
        self.connector.clone()
    }
}

impl Default for MemoryListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn listen(
        &self,
        options: ListenOptions,
        new_agent: NewAgent,
    ) -> Result<ListenerHandle, TransportError> {
        let mut incoming = self
            .incoming
            .lock()
            .take()
            .ok_or(TransportError::AlreadyListening)?;
        let slots = ConnectionSlots::new(options.max_conn_num);

        info!(addr = %options.addr, "Memory listener started");

        let task = tokio::spawn(async move {
            while let Some(dial) = incoming.recv().await {
                let Some(slot) = slots.try_acquire() else {
                    warn!(max_conn_num = slots.max(), "Too many connections, rejecting");
                    continue;
                };

                let (outbound, peer_rx) = mpsc::channel(options.pending_write_num.max(1));
                if dial.accepted.send(peer_rx).is_err() {
                    continue;
                }

                let conn: Arc<dyn Connection> = Arc::new(MemoryConnection {
                    inbound: tokio::sync::Mutex::new(dial.inbound),
                    outbound,
                    read_deadline: Deadline::default(),
                    closed: CloseSignal::new(),
                    max_msg_len: options.max_msg_len,
                });
                let new_agent = Arc::clone(&new_agent);

                tokio::spawn(async move {
                    let _slot = slot;
                    serve_connection(conn, &new_agent).await;
                });
            }
        });

        Ok(ListenerHandle::new(None, task))
    }
}

/// Dials a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    dials: mpsc::UnboundedSender<Dial>,
}

impl MemoryConnector {
    /// Open a connection. Fails with `Closed` if the listener is not running
    /// or rejected the connection.
    pub async fn connect(&self) -> Result<MemoryPeer, TransportError> {
        let (tx, inbound) = mpsc::unbounded_channel();
        let (accepted, reply) = oneshot::channel();

        self.dials
            .send(Dial { inbound, accepted })
            .map_err(|_| TransportError::Closed)?;
        let rx = reply.await.map_err(|_| TransportError::Closed)?;

        Ok(MemoryPeer { tx: Some(tx), rx })
    }
}

/// The remote end of an in-process connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryPeer {
    /// Send one frame to the server.
    pub fn send(&self, frame: impl Into<Bytes>) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(frame.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Receive the next frame written by the server. `None` once the server
    /// side is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    /// Hang up. The server sees `Closed` on its next read.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}

struct MemoryConnection {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    outbound: mpsc::Sender<Bytes>,
    read_deadline: Deadline,
    closed: CloseSignal,
    max_msg_len: usize,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn read_frame(&self) -> Result<Bytes, TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut inbound = self.inbound.lock().await;
        let frame = tokio::select! {
            frame = self.read_deadline.run(inbound.recv()) => {
                frame?.ok_or(TransportError::Closed)?
            }
            _ = self.closed.closed() => return Err(TransportError::Closed),
        };

        if frame.len() > self.max_msg_len {
            debug!(len = frame.len(), max = self.max_msg_len, "Inbound frame too long");
            self.close();
            return Err(TransportError::MessageTooLong {
                len: frame.len(),
                max: self.max_msg_len,
            });
        }
        Ok(frame)
    }

    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_msg_len {
            return Err(TransportError::MessageTooLong {
                len: frame.len(),
                max: self.max_msg_len,
            });
        }
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Write queue full, closing connection");
                self.close();
                Err(TransportError::WriteQueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn set_read_deadline(&self, timeout: Duration) {
        self.read_deadline.set(timeout);
    }

    // Queued writes complete immediately, so there is nothing to bound.
    fn set_write_deadline(&self, _timeout: Duration) {}

    fn close(&self) {
        if self.closed.close() {
            debug!("Closing memory connection");
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Agent;

    struct Echo {
        conn: Arc<dyn Connection>,
    }

    #[async_trait]
    impl Agent for Echo {
        async fn run(&self) {
            while let Ok(frame) = self.conn.read_frame().await {
                if self.conn.write_frame(frame).await.is_err() {
                    break;
                }
            }
        }

        async fn on_close(&self) {}
    }

    fn options(max_conn_num: usize, pending_write_num: usize) -> ListenOptions {
        ListenOptions {
            addr: "memory".to_string(),
            max_conn_num,
            pending_write_num,
            max_msg_len: 16,
        }
    }

    fn echo_agent() -> NewAgent {
        Arc::new(|conn| Some(Arc::new(Echo { conn }) as Arc<dyn Agent>))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let listener = MemoryListener::new();
        let _handle = listener.listen(options(4, 8), echo_agent()).await.unwrap();

        let mut peer = listener.connector().connect().await.unwrap();
        peer.send("hello").unwrap();

        assert_eq!(peer.recv().await.unwrap(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_listen_twice_rejected() {
        let listener = MemoryListener::new();
        let _handle = listener.listen(options(1, 1), echo_agent()).await.unwrap();

        let result = listener.listen(options(1, 1), echo_agent()).await;
        assert!(matches!(result, Err(TransportError::AlreadyListening)));
    }

    #[tokio::test]
    async fn test_capacity_rejects_extra_peer() {
        let listener = MemoryListener::new();
        let _handle = listener.listen(options(1, 1), echo_agent()).await.unwrap();
        let connector = listener.connector();

        let _first = connector.connect().await.unwrap();
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (outbound, _rx) = mpsc::channel(1);
        let (_tx, inbound) = mpsc::unbounded_channel();
        let conn = MemoryConnection {
            inbound: tokio::sync::Mutex::new(inbound),
            outbound,
            read_deadline: Deadline::default(),
            closed: CloseSignal::new(),
            max_msg_len: 4,
        };

        let result = conn.write_frame(Bytes::from_static(b"too long")).await;
        assert!(matches!(
            result,
            Err(TransportError::MessageTooLong { len: 8, max: 4 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_closes_connection() {
        let (outbound, _rx) = mpsc::channel(1);
        let (tx, inbound) = mpsc::unbounded_channel();
        let conn = MemoryConnection {
            inbound: tokio::sync::Mutex::new(inbound),
            outbound,
            read_deadline: Deadline::default(),
            closed: CloseSignal::new(),
            max_msg_len: 4,
        };

        tx.send(Bytes::from_static(b"fits")).unwrap();
        tx.send(Bytes::from_static(b"too long")).unwrap();

        assert_eq!(conn.read_frame().await.unwrap(), Bytes::from_static(b"fits"));
        assert!(matches!(
            conn.read_frame().await,
            Err(TransportError::MessageTooLong { len: 8, max: 4 })
        ));
        assert!(matches!(
            conn.read_frame().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_zero_write_queue_still_delivers() {
        let listener = MemoryListener::new();
        let _handle = listener.listen(options(1, 0), echo_agent()).await.unwrap();

        let mut peer = listener.connector().connect().await.unwrap();
        peer.send("one").unwrap();

        assert_eq!(peer.recv().await.unwrap(), Bytes::from("one"));
    }

    #[tokio::test]
    async fn test_full_queue_closes_connection() {
        let (outbound, _rx) = mpsc::channel(1);
        let (_tx, inbound) = mpsc::unbounded_channel();
        let conn = MemoryConnection {
            inbound: tokio::sync::Mutex::new(inbound),
            outbound,
            read_deadline: Deadline::default(),
            closed: CloseSignal::new(),
            max_msg_len: 64,
        };

        conn.write_frame(Bytes::from_static(b"a")).await.unwrap();
        let result = conn.write_frame(Bytes::from_static(b"b")).await;

        assert!(matches!(result, Err(TransportError::WriteQueueFull)));
        assert!(matches!(
            conn.read_frame().await,
            Err(TransportError::Closed)
        ));
    }
}
