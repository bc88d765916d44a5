use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::event::{ConnectionEvent, EventKind, Processor};

/// Producer half of an event bus.
pub type EventSender<P> = mpsc::Sender<ConnectionEvent<P>>;

/// Create a bounded event bus holding at least one event. Events from one
/// sender are delivered in the order they were sent.
pub fn event_bus<P: Processor>(capacity: usize) -> (EventSender<P>, Dispatcher<P>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, Dispatcher { events: rx })
}

/// Route one event to the matching processor callback.
pub async fn dispatch<P: Processor>(event: ConnectionEvent<P>) -> anyhow::Result<()> {
    let ConnectionEvent {
        session_id,
        processor,
        kind,
    } = event;

    match kind {
        EventKind::Connected => processor.on_connected(session_id).await,
        EventKind::Disconnected => processor.on_disconnected(session_id).await,
        EventKind::Undecoded(frame) => processor.on_unknown(session_id, frame).await,
        EventKind::Decoded(message) => processor.on_message(session_id, message).await,
    }
}

/// Consumer half of an event bus.
pub struct Dispatcher<P: Processor> {
    events: mpsc::Receiver<ConnectionEvent<P>>,
}

impl<P: Processor> Dispatcher<P> {
    /// Deliver events until every sender is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let session_id = event.session_id;
            let kind = event.kind.name();

            match AssertUnwindSafe(dispatch(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(session_id = %session_id, event = kind, error = %e, "Processor failed to handle event");
                }
                Err(_) => {
                    error!(session_id = %session_id, event = kind, "Processor panicked while handling event");
                }
            }
        }

        debug!("Event bus closed, dispatcher stopping");
    }
}
