use std::sync::Arc;

use crate::contracts::wire::WireMessage;
use crate::error::AppResult;

/// Outbound half of the session socket. `send` enqueues without blocking;
/// socket I/O happens on the adapter's own tasks so the drawing loop never
/// waits on the network.
pub trait TransportPort: Send + Sync {
    fn send(&self, message: &WireMessage) -> AppResult<()>;

    /// Ships several frames in one transport message. Used by the
    /// reconciler's coalescing window; receivers decode the frames in
    /// order, so pixel results match the uncoalesced sends.
    fn send_batch(&self, messages: &[WireMessage]) -> AppResult<()>;
}

pub type DynTransportPort = Arc<dyn TransportPort>;
