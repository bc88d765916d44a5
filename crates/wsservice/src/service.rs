use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::dispatch::{EventSender, event_bus};
use crate::error::{SendError, ServiceError};
use crate::event::{ConnectionEvent, EventKind, Processor};
use crate::id::{IdGenerator, SessionId};
use crate::registry::SessionRegistry;
use crate::session::{DEADLINE_WINDOW, Session, SessionState};
use crate::transport::{Agent, ListenOptions, Listener, ListenerHandle, NewAgent};

/// Depth of the event bus created by [`WsService::start`].
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// State shared between the service and its sessions.
pub(crate) struct Shared<P: Processor> {
    pub(crate) registry: SessionRegistry<Session<P>>,
    pub(crate) processor: Arc<P>,
    events: EventSender<P>,
}

impl<P: Processor> Shared<P> {
    pub(crate) async fn emit(&self, session_id: SessionId, kind: EventKind<P::Message>) {
        let event = ConnectionEvent::new(session_id, Arc::clone(&self.processor), kind);
        if self.events.send(event).await.is_err() {
            debug!(session_id = %session_id, "Event bus closed, dropping event");
        }
    }
}

/// Accepts connections, tracks them as sessions and routes their events.
pub struct WsService<P: Processor> {
    shared: Arc<Shared<P>>,
    listener: ListenerHandle,
    config: ServiceConfig,
}

impl<P: Processor> WsService<P> {
    /// Validate `config`, start `listener` and deliver events to `processor`
    /// through a bus drained by a spawned dispatcher.
    pub async fn start<L>(
        config: ServiceConfig,
        ids: IdGenerator,
        processor: Arc<P>,
        listener: &L,
    ) -> Result<Self, ServiceError>
    where
        L: Listener + ?Sized,
    {
        let (events, dispatcher) = event_bus(EVENT_QUEUE_DEPTH);
        let service = Self::start_with_events(config, ids, processor, listener, events).await?;
        tokio::spawn(dispatcher.run());

        Ok(service)
    }

    /// Like [`start`](Self::start), but events are pushed onto an
    /// externally owned bus.
    pub async fn start_with_events<L>(
        config: ServiceConfig,
        ids: IdGenerator,
        processor: Arc<P>,
        listener: &L,
        events: EventSender<P>,
    ) -> Result<Self, ServiceError>
    where
        L: Listener + ?Sized,
    {
        config.validate()?;

        let node = ids.node();
        let shared = Arc::new(Shared {
            registry: SessionRegistry::with_capacity(ids, config.max_conn_num),
            processor,
            events,
        });

        let weak = Arc::downgrade(&shared);
        let new_agent: NewAgent = Arc::new(move |conn| {
            let shared = weak.upgrade()?;
            let service = Arc::downgrade(&shared);
            let session = shared
                .registry
                .insert_with(|id| Session::new(id, conn, service));
            let agent: Arc<dyn Agent> = session;
            Some(agent)
        });

        let listener = listener
            .listen(ListenOptions::from(&config), new_agent)
            .await
            .map_err(ServiceError::Listen)?;

        info!(
            listen_addr = %config.listen_addr,
            local_addr = ?listener.local_addr(),
            node_id = %node,
            "Session service started"
        );

        Ok(Self {
            shared,
            listener,
            config,
        })
    }

    /// Encode `message` and queue it on the session's connection.
    pub async fn send_to(&self, id: SessionId, message: &P::Message) -> Result<(), SendError> {
        let session = self
            .shared
            .registry
            .lookup(id)
            .ok_or(SendError::SessionNotFound(id))?;

        let frame = self
            .shared
            .processor
            .encode(id, message)
            .map_err(|source| SendError::Encode {
                session_id: id,
                source,
            })?;

        let conn = session.connection();
        conn.set_write_deadline(DEADLINE_WINDOW);
        conn.write_frame(frame).await?;
        Ok(())
    }

    /// Ask the transport to close a session. The registry entry goes away
    /// when the session's disconnect is processed, not here.
    pub fn close_session(&self, id: SessionId) {
        if let Some(session) = self.shared.registry.lookup(id) {
            debug!(session_id = %id, "Closing session on request");
            session.connection().close();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.shared.registry.lookup(id).map(|session| session.state())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Stop accepting connections. Live sessions keep running.
    pub fn shutdown(&self) {
        info!(listen_addr = %self.config.listen_addr, "Session service stopped accepting");
        self.listener.shutdown();
    }
}
