use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::event::{EventKind, Processor};
use crate::id::SessionId;
use crate::service::Shared;
use crate::transport::{Agent, Connection};

/// How long a session may stay silent before the transport fails its read.
pub const DEADLINE_WINDOW: Duration = Duration::from_secs(60);

/// Lifecycle of a session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// One live connection, owned by the service's registry.
pub struct Session<P: Processor> {
    id: SessionId,
    conn: Arc<dyn Connection>,
    service: Weak<Shared<P>>,
    state: AtomicU8,
}

impl<P: Processor> Session<P> {
    pub(crate) fn new(id: SessionId, conn: Arc<dyn Connection>, service: Weak<Shared<P>>) -> Self {
        Self {
            id,
            conn,
            service,
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn emit(&self, kind: EventKind<P::Message>) {
        if let Some(service) = self.service.upgrade() {
            service.emit(self.id, kind).await;
        }
    }
}

#[async_trait]
impl<P: Processor> Agent for Session<P> {
    /// Emit `Connected`, then turn every inbound frame into a routed event
    /// until the transport fails a read.
    async fn run(&self) {
        let Some(processor) = self.service.upgrade().map(|s| Arc::clone(&s.processor)) else {
            return;
        };
        if !self.transition(SessionState::Connecting, SessionState::Open) {
            return;
        }

        info!(session_id = %self.id, peer = ?self.conn.peer_addr(), "Session opened");
        self.emit(EventKind::Connected).await;

        loop {
            self.conn.set_read_deadline(DEADLINE_WINDOW);
            self.conn.set_write_deadline(DEADLINE_WINDOW);

            let frame = match self.conn.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(session_id = %self.id, error = %e, "Read loop ended");
                    break;
                }
            };

            match processor.decode(self.id, &frame) {
                Ok(message) => self.emit(EventKind::Decoded(message)).await,
                Err(e) => {
                    debug!(session_id = %self.id, len = frame.len(), error = %e, "Undecodable frame");
                    self.emit(EventKind::Undecoded(frame)).await;
                }
            }
        }

        self.transition(SessionState::Open, SessionState::Closing);
    }

    /// Emit `Disconnected`, then drop the registry entry. Runs its effects at
    /// most once per session.
    async fn on_close(&self) {
        let previous = SessionState::from_u8(
            self.state
                .swap(SessionState::Closed as u8, Ordering::AcqRel),
        );
        if previous == SessionState::Closed {
            return;
        }

        // A session that never opened never announced itself.
        if previous != SessionState::Connecting {
            self.emit(EventKind::Disconnected).await;
        }
        if let Some(service) = self.service.upgrade() {
            service.registry.remove(self.id);
        }

        info!(session_id = %self.id, "Session closed");
    }
}

impl<P: Processor> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("peer", &self.conn.peer_addr())
            .finish()
    }
}
