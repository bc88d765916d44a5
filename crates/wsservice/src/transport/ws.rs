use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{WebSocketStream, accept_async_with_config};
use tracing::{debug, info, warn};

use super::{
    CloseSignal, Connection, ConnectionSlots, Deadline, ListenOptions, Listener, ListenerHandle,
    NewAgent, serve_connection,
};
use crate::error::TransportError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type WsStream = WebSocketStream<TcpStream>;

/// Serves WebSocket connections over plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsListener;

impl WsListener {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Listener for WsListener {
    async fn listen(
        &self,
        options: ListenOptions,
        new_agent: NewAgent,
    ) -> Result<ListenerHandle, TransportError> {
        let listener = TcpListener::bind(&options.addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: options.addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: options.addr.clone(),
                source,
            })?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(options.max_msg_len);
        ws_config.max_frame_size = Some(options.max_msg_len);
        let slots = ConnectionSlots::new(options.max_conn_num);

        info!(
            addr = %local_addr,
            max_conn_num = options.max_conn_num,
            pending_write_num = options.pending_write_num,
            max_msg_len = options.max_msg_len,
            "WebSocket listener started"
        );

        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let Some(slot) = slots.try_acquire() else {
                    warn!(peer = %peer, max_conn_num = slots.max(), "Too many connections, rejecting");
                    continue;
                };

                let new_agent = Arc::clone(&new_agent);
                let ws_config = ws_config.clone();
                let pending_write_num = options.pending_write_num;
                let max_msg_len = options.max_msg_len;

                tokio::spawn(async move {
                    let _slot = slot;
                    let handshake = tokio::time::timeout(
                        HANDSHAKE_TIMEOUT,
                        accept_async_with_config(stream, Some(ws_config)),
                    );
                    let ws = match handshake.await {
                        Ok(Ok(ws)) => ws,
                        Ok(Err(e)) => {
                            debug!(peer = %peer, error = %e, "WebSocket handshake failed");
                            return;
                        }
                        Err(_) => {
                            debug!(peer = %peer, "WebSocket handshake timed out");
                            return;
                        }
                    };

                    let conn: Arc<dyn Connection> =
                        Arc::new(WsConnection::new(ws, peer, pending_write_num, max_msg_len));
                    serve_connection(conn, &new_agent).await;
                });
            }
        });

        Ok(ListenerHandle::new(Some(local_addr), task))
    }
}

/// A WebSocket connection with a bounded outbound queue drained by a
/// dedicated writer task.
pub struct WsConnection {
    peer: SocketAddr,
    reader: Mutex<SplitStream<WsStream>>,
    writes: mpsc::Sender<Message>,
    read_deadline: Deadline,
    write_deadline: Arc<Deadline>,
    closed: Arc<CloseSignal>,
    max_msg_len: usize,
}

impl WsConnection {
    pub fn new(ws: WsStream, peer: SocketAddr, pending_write_num: usize, max_msg_len: usize) -> Self {
        let (sink, stream) = ws.split();
        let (writes, queue) = mpsc::channel(pending_write_num.max(1));
        let write_deadline = Arc::new(Deadline::default());
        let closed = Arc::new(CloseSignal::new());

        tokio::spawn(write_loop(
            sink,
            queue,
            Arc::clone(&write_deadline),
            Arc::clone(&closed),
            peer,
        ));

        Self {
            peer,
            reader: Mutex::new(stream),
            writes,
            read_deadline: Deadline::default(),
            write_deadline,
            closed,
            max_msg_len,
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn read_frame(&self) -> Result<Bytes, TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.reader.lock().await;
        let next = async {
            loop {
                match reader.next().await {
                    Some(Ok(Message::Binary(frame))) => return Ok(frame),
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Bytes::copy_from_slice(text.as_bytes()));
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                    // Ping, pong and raw frames are handled by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(TransportError::from(e)),
                }
            }
        };

        tokio::select! {
            result = self.read_deadline.run(next) => result.and_then(|frame| frame),
            _ = self.closed.closed() => Err(TransportError::Closed),
        }
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

        match self.writes.try_send(Message::Binary(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(peer = %self.peer, "Write queue full, closing connection");
                self.close();
                Err(TransportError::WriteQueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn set_read_deadline(&self, timeout: Duration) {
        self.read_deadline.set(timeout);
    }

    fn set_write_deadline(&self, timeout: Duration) {
        self.write_deadline.set(timeout);
    }

    fn close(&self) {
        if self.closed.close() {
            debug!(peer = %self.peer, "Closing WebSocket connection");
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::Receiver<Message>,
    deadline: Arc<Deadline>,
    closed: Arc<CloseSignal>,
    peer: SocketAddr,
) {
    loop {
        tokio::select! {
            biased;
            message = queue.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = send(&mut sink, &deadline, message).await {
                    debug!(peer = %peer, error = %e, "Write failed, closing connection");
                    closed.close();
                    return;
                }
            }
            _ = closed.closed() => break,
        }
    }

    // Flush what was queued before the close, then say goodbye.
    while let Ok(message) = queue.try_recv() {
        if send(&mut sink, &deadline, message).await.is_err() {
            return;
        }
    }
    let _ = send(&mut sink, &deadline, Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn send(
    sink: &mut SplitSink<WsStream, Message>,
    deadline: &Deadline,
    message: Message,
) -> Result<(), TransportError> {
    deadline.run(sink.send(message)).await??;
    Ok(())
}
