//! Transport seams consumed by the session core, and two listeners.
//!
//! The core never touches sockets. It sees a [`Connection`] that yields and
//! accepts whole frames, and hands each accepted connection to an [`Agent`]
//! built by the service. [`WsListener`] serves WebSocket over TCP;
//! [`MemoryListener`] serves in-process peers.

mod memory;
mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::error::TransportError;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use ws::{WsConnection, WsListener};

/// One live transport connection carrying discrete frames.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Wait for the next inbound frame. Fails once the connection is closed
    /// or the read deadline passes.
    async fn read_frame(&self) -> Result<Bytes, TransportError>;

    /// Queue one outbound frame.
    async fn write_frame(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Reads must complete within `timeout` from now.
    fn set_read_deadline(&self, timeout: Duration);

    /// Writes must complete within `timeout` from now.
    fn set_write_deadline(&self, timeout: Duration);

    /// Request the connection to close. Pending reads fail with `Closed`.
    fn close(&self);

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// The per-connection logic driven by a listener.
///
/// For every accepted connection the listener calls `run` once, closes the
/// connection when `run` returns, then calls `on_close` exactly once.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self);

    async fn on_close(&self);
}

/// Builds the agent for a freshly accepted connection. Returning `None`
/// rejects the connection.
pub type NewAgent = Arc<dyn Fn(Arc<dyn Connection>) -> Option<Arc<dyn Agent>> + Send + Sync>;

/// Limits a listener applies to the connections it serves.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub addr: String,
    pub max_conn_num: usize,
    /// Outbound frames queued per connection. Zero is treated as one.
    pub pending_write_num: usize,
    pub max_msg_len: usize,
}

impl From<&ServiceConfig> for ListenOptions {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            addr: config.listen_addr.clone(),
            max_conn_num: config.max_conn_num,
            pending_write_num: config.pending_write_num,
            max_msg_len: config.max_msg_len,
        }
    }
}

/// A source of connections.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Start accepting. Returns once the listener is ready; connections are
    /// served on background tasks.
    async fn listen(
        &self,
        options: ListenOptions,
        new_agent: NewAgent,
    ) -> Result<ListenerHandle, TransportError>;
}

/// A running accept loop. Dropping the handle stops accepting new
/// connections; connections already being served keep running.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn new(local_addr: Option<SocketAddr>, task: JoinHandle<()>) -> Self {
        Self { local_addr, task }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drive one accepted connection through its agent.
pub(crate) async fn serve_connection(conn: Arc<dyn Connection>, new_agent: &NewAgent) {
    let Some(agent) = new_agent(Arc::clone(&conn)) else {
        conn.close();
        return;
    };

    agent.run().await;
    conn.close();
    agent.on_close().await;
}

/// Counts connections currently served by one listener.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionSlots {
    active: Arc<AtomicUsize>,
    max: usize,
}

impl ConnectionSlots {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Take a slot, or `None` if the listener is at capacity.
    pub(crate) fn try_acquire(&self) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotGuard {
                active: Arc::clone(&self.active),
            })
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }
}

/// Releases its connection slot when dropped.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A resettable point in time after which an I/O operation fails.
#[derive(Debug, Default)]
pub(crate) struct Deadline {
    at: parking_lot::Mutex<Option<Instant>>,
}

impl Deadline {
    pub(crate) fn set(&self, timeout: Duration) {
        *self.at.lock() = Some(Instant::now() + timeout);
    }

    /// Run `fut` under the current deadline.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TransportError> {
        let at = *self.at.lock();
        match at {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| TransportError::Timeout),
            None => Ok(fut.await),
        }
    }
}

/// One-way latch signalling that a connection has been closed.
#[derive(Debug)]
pub(crate) struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    /// Trip the latch. Returns `true` on the first call only.
    pub(crate) fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the latch has been tripped.
    pub(crate) async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_respect_capacity() {
        let slots = ConnectionSlots::new(2);

        let first = slots.try_acquire().unwrap();
        let _second = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());

        drop(first);
        assert!(slots.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let deadline = Deadline::default();
        deadline.set(Duration::from_secs(60));

        let result = deadline.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reset_extends_window() {
        let deadline = Deadline::default();
        deadline.set(Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(900)).await;
        deadline.set(Duration::from_secs(1));

        let result = deadline
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_signal_trips_once() {
        let signal = Arc::new(CloseSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.closed().await })
        };

        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.is_closed());
        waiter.await.unwrap();
    }
}
