use tokio::sync::broadcast;
use tracing::trace;

use domain::events::SessionEvent;
use oekaki_application::{error::AppResult, ports::outgoing::events::EventsPort};

/// Fan-out of session events over a tokio broadcast channel. Lagging or
/// absent subscribers never block the drawing loop; send errors (no
/// receivers) are deliberately ignored.
pub struct TokioBroadcastEventsAdapter {
    sender: broadcast::Sender<SessionEvent>,
}

impl TokioBroadcastEventsAdapter {
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl EventsPort for TokioBroadcastEventsAdapter {
    fn publish(&self, event: SessionEvent) -> AppResult<()> {
        trace!("publishing {event:?}");
        self.sender.send(event).ok();
        Ok(())
    }
}
