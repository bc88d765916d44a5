//! Session management for message-stream servers.
//!
//! A [`WsService`] accepts connections from a [`Listener`], gives every
//! connection a cluster-unique [`SessionId`], and turns the connection's
//! lifecycle into events routed to a [`Processor`]:
//!
//! - `Connected` once the session is registered,
//! - `Decoded` / `Undecoded` for every inbound frame, in read order,
//! - exactly one `Disconnected` when the connection goes away.
//!
//! Outbound traffic goes through [`WsService::send_to`] keyed by session id.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod id;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;

pub use config::ServiceConfig;
pub use dispatch::{Dispatcher, EventSender, dispatch, event_bus};
pub use error::{BoxError, ConfigError, SendError, ServiceError, TransportError};
pub use event::{Codec, ConnectionEvent, EventKind, Processor};
pub use id::{Clock, IdGenerator, ManualClock, NodeId, SessionId, SystemClock, node_of};
pub use registry::SessionRegistry;
pub use service::WsService;
pub use session::{DEADLINE_WINDOW, Session, SessionState};
pub use transport::{
    Agent, Connection, ListenOptions, Listener, ListenerHandle, MemoryConnector, MemoryListener,
    MemoryPeer, NewAgent, WsListener,
};
