use std::sync::Arc;

use domain::events::SessionEvent;

use crate::error::AppResult;

/// Fan-out of session events to the embedding UI (chat lines, connection
/// changes, catch-up progress, conflict resolutions).
pub trait EventsPort: Send + Sync {
    fn publish(&self, event: SessionEvent) -> AppResult<()>;
}

pub type DynEventsPort = Arc<dyn EventsPort>;
