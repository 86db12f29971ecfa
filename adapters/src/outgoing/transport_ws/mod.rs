use tokio::sync::mpsc;

use oekaki_application::contracts::wire::WireMessage;
use oekaki_application::error::{AppError, AppResult};
use oekaki_application::ports::outgoing::transport::TransportPort;

use crate::wire::encode::{encode_batch, encode_message};

/// `TransportPort` over the socket's outbound byte queue. `send` is a
/// non-blocking enqueue; the write task owns the actual sink. A batch
/// concatenates its frames into one transport message so receivers apply
/// them back to back.
pub struct WsTransportAdapter {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    sender_slot: u16,
}

impl WsTransportAdapter {
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, sender_slot: u16) -> Self {
        Self {
            outbound,
            sender_slot,
        }
    }

    fn enqueue(&self, bytes: Vec<u8>) -> AppResult<()> {
        self.outbound
            .send(bytes)
            .map_err(|_| AppError::transport("socket write queue closed"))
    }
}

impl TransportPort for WsTransportAdapter {
    fn send(&self, message: &WireMessage) -> AppResult<()> {
        self.enqueue(encode_message(message, self.sender_slot))
    }

    fn send_batch(&self, messages: &[WireMessage]) -> AppResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.enqueue(encode_batch(messages, self.sender_slot))
    }
}
