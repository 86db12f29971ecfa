use serde::{Deserialize, Serialize};
use tracing::warn;

use oekaki_application::contracts::wire::InboundFrame;

use crate::wire::decode::decode_frames;

/// Optional relay envelope. Some deployments wrap the binary frames in a
/// JSON carrier bearing a server-assigned sequence number and timestamp;
/// when present those supersede the client's own ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: String,
    #[serde(default)]
    pub server_timestamp: Option<u64>,
    #[serde(default)]
    pub sequence_number: Option<u64>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeData {
    pub payload: Vec<u8>,
}

/// Decodes one inbound transport message, binary or enveloped JSON, into
/// frames tagged with any server ordering fields.
#[must_use]
pub fn decode_transport_text(text: &str) -> Vec<InboundFrame> {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => decode_frames(&envelope.data.payload)
            .into_iter()
            .map(|message| InboundFrame {
                message,
                server_seq: envelope.sequence_number,
                server_timestamp_ms: envelope.server_timestamp,
            })
            .collect(),
        Err(err) => {
            warn!("unparseable text transport message: {err}");
            Vec::new()
        }
    }
}

#[must_use]
pub fn decode_transport_binary(bytes: &[u8]) -> Vec<InboundFrame> {
    decode_frames(bytes)
        .into_iter()
        .map(InboundFrame::bare)
        .collect()
}
