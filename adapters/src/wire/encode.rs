use domain::color::Rgba;
use domain::participant::Participant;

use oekaki_application::contracts::wire::WireMessage;

use crate::wire::frame::{FrameType, LEN_COVERED_HEADER};

/// Serializes one message into a complete frame. `sender_slot` fills the
/// header's relay-assigned id; clients that have not been assigned one
/// send 0 and rely on the payload-level user ids.
#[must_use]
pub fn encode_message(message: &WireMessage, sender_slot: u16) -> Vec<u8> {
    let (frame_type, payload) = encode_payload(message);
    let mut out = Vec::with_capacity(payload.len() + 8);
    let len = (payload.len() + LEN_COVERED_HEADER) as u32;
    out.extend_from_slice(&len.to_be_bytes());
    out.push(frame_type.tag());
    out.push(0); // reserved
    out.extend_from_slice(&sender_slot.to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Concatenates several frames into one transport message. Receivers
/// decode them in order, so a coalesced batch is pixel-equal to the
/// individual sends.
#[must_use]
pub fn encode_batch(messages: &[WireMessage], sender_slot: u16) -> Vec<u8> {
    let mut out = Vec::new();
    for message in messages {
        out.extend_from_slice(&encode_message(message, sender_slot));
    }
    out
}

fn encode_payload(message: &WireMessage) -> (FrameType, Vec<u8>) {
    let mut buf = Vec::new();
    match message {
        WireMessage::Join {
            user_id,
            timestamp_ms,
        } => {
            put_str(&mut buf, user_id.as_str());
            buf.extend_from_slice(&timestamp_ms.to_be_bytes());
            (FrameType::Join, buf)
        }
        WireMessage::Leave {
            user_id,
            username,
            timestamp_ms,
        } => {
            put_str(&mut buf, user_id.as_str());
            put_str(&mut buf, username);
            buf.extend_from_slice(&timestamp_ms.to_be_bytes());
            (FrameType::Leave, buf)
        }
        WireMessage::Chat {
            user_id,
            username,
            message,
            timestamp_ms,
        } => {
            put_str(&mut buf, user_id.as_str());
            put_str(&mut buf, username);
            put_str(&mut buf, message);
            buf.extend_from_slice(&timestamp_ms.to_be_bytes());
            (FrameType::Chat, buf)
        }
        WireMessage::DrawLine {
            user_id,
            layer,
            from_x,
            from_y,
            to_x,
            to_y,
            size,
            brush,
            color,
        } => {
            put_str(&mut buf, user_id.as_str());
            buf.push(layer.to_wire());
            for coord in [from_x, from_y, to_x, to_y] {
                buf.extend_from_slice(&coord.to_be_bytes());
            }
            buf.push(*size);
            buf.push(brush.to_wire());
            put_rgba(&mut buf, *color);
            (FrameType::DrawLine, buf)
        }
        WireMessage::DrawPoint {
            user_id,
            layer,
            x,
            y,
            size,
            brush,
            color,
        } => {
            put_str(&mut buf, user_id.as_str());
            buf.push(layer.to_wire());
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
            buf.push(*size);
            buf.push(brush.to_wire());
            put_rgba(&mut buf, *color);
            (FrameType::DrawPoint, buf)
        }
        WireMessage::Fill {
            user_id,
            layer,
            x,
            y,
            color,
        } => {
            put_str(&mut buf, user_id.as_str());
            buf.push(layer.to_wire());
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
            put_rgba(&mut buf, *color);
            (FrameType::Fill, buf)
        }
        WireMessage::PointerUp { user_id } => {
            put_str(&mut buf, user_id.as_str());
            (FrameType::PointerUp, buf)
        }
        WireMessage::Snapshot {
            user_id,
            layer,
            png,
        } => {
            put_str(&mut buf, user_id.as_str());
            buf.push(layer.to_wire());
            buf.extend_from_slice(&(png.len() as u32).to_be_bytes());
            buf.extend_from_slice(png);
            (FrameType::Snapshot, buf)
        }
        WireMessage::Layers { participants } => {
            buf.extend_from_slice(&(participants.len() as u16).to_be_bytes());
            for Participant {
                user_id,
                username,
                joined_at_ms,
            } in participants
            {
                put_str(&mut buf, user_id.as_str());
                put_str(&mut buf, username);
                buf.extend_from_slice(&joined_at_ms.to_be_bytes());
            }
            (FrameType::Layers, buf)
        }
        WireMessage::SnapshotRequest { timestamp_ms } => {
            buf.extend_from_slice(&timestamp_ms.to_be_bytes());
            (FrameType::SnapshotRequest, buf)
        }
        WireMessage::EndSession { user_id, post_url } => {
            put_str(&mut buf, user_id.as_str());
            put_str(&mut buf, post_url);
            (FrameType::EndSession, buf)
        }
    }
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(usize::from(u16::MAX)) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes.get(..usize::from(len)).unwrap_or(bytes));
}

fn put_rgba(buf: &mut Vec<u8>, color: Rgba) {
    buf.extend_from_slice(&[color.r, color.g, color.b, color.a]);
}
