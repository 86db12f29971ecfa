use tracing::warn;

use domain::color::Rgba;
use domain::layer::LayerKind;
use domain::op::BrushKind;
use domain::participant::{Participant, UserId};

use oekaki_application::contracts::wire::WireMessage;
use oekaki_application::error::{AppError, AppResult};

use crate::wire::frame::{FrameType, LEN_COVERED_HEADER};

/// Walks a transport message and decodes every complete frame in it.
/// Unknown frame types are skipped; a structurally short frame aborts the
/// rest of the buffer (ProtocolError semantics: drop, log, continue).
#[must_use]
pub fn decode_frames(buffer: &[u8]) -> Vec<WireMessage> {
    let mut messages = Vec::new();
    let mut offset = 0usize;
    while offset < buffer.len() {
        match decode_one(buffer, offset) {
            Ok((consumed, message)) => {
                if let Some(message) = message {
                    messages.push(message);
                }
                offset += consumed;
            }
            Err(err) => {
                warn!("dropping malformed frame tail: {err}");
                break;
            }
        }
    }
    messages
}

fn decode_one(buffer: &[u8], offset: usize) -> AppResult<(usize, Option<WireMessage>)> {
    let mut reader = Reader::new(buffer, offset);
    let len = reader.u32()? as usize;
    if len < LEN_COVERED_HEADER {
        return Err(AppError::protocol(format!("frame length {len} too short")));
    }
    let tag = reader.u8()?;
    let _reserved = reader.u8()?;
    let _sender_slot = reader.u16()?;
    let payload_len = len - LEN_COVERED_HEADER;
    let payload = reader.bytes(payload_len)?;
    let consumed = 4 + len;

    let Some(frame_type) = FrameType::from_tag(tag) else {
        warn!("skipping unknown frame type {tag}");
        return Ok((consumed, None));
    };

    // a payload that fails to parse costs only its own frame; the next
    // frame boundary is already known from the length prefix
    let message = match decode_payload(frame_type, payload) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!("dropping undecodable {frame_type:?} frame: {err}");
            None
        }
    };
    Ok((consumed, message))
}

fn decode_payload(frame_type: FrameType, payload: &[u8]) -> AppResult<WireMessage> {
    let mut r = Reader::new(payload, 0);
    let message = match frame_type {
        FrameType::Join => WireMessage::Join {
            user_id: UserId::new(r.string()?),
            timestamp_ms: r.u64()?,
        },
        FrameType::Leave => WireMessage::Leave {
            user_id: UserId::new(r.string()?),
            username: r.string()?,
            timestamp_ms: r.u64()?,
        },
        FrameType::Chat => WireMessage::Chat {
            user_id: UserId::new(r.string()?),
            username: r.string()?,
            message: r.string()?,
            timestamp_ms: r.u64()?,
        },
        FrameType::DrawLine => WireMessage::DrawLine {
            user_id: UserId::new(r.string()?),
            layer: layer(r.u8()?)?,
            from_x: r.u16()?,
            from_y: r.u16()?,
            to_x: r.u16()?,
            to_y: r.u16()?,
            size: r.u8()?,
            brush: brush(r.u8()?)?,
            color: r.rgba()?,
        },
        FrameType::DrawPoint => WireMessage::DrawPoint {
            user_id: UserId::new(r.string()?),
            layer: layer(r.u8()?)?,
            x: r.u16()?,
            y: r.u16()?,
            size: r.u8()?,
            brush: brush(r.u8()?)?,
            color: r.rgba()?,
        },
        FrameType::Fill => WireMessage::Fill {
            user_id: UserId::new(r.string()?),
            layer: layer(r.u8()?)?,
            x: r.u16()?,
            y: r.u16()?,
            color: r.rgba()?,
        },
        FrameType::PointerUp => WireMessage::PointerUp {
            user_id: UserId::new(r.string()?),
        },
        FrameType::Snapshot => {
            let user_id = UserId::new(r.string()?);
            let layer = layer(r.u8()?)?;
            let png_len = r.u32()? as usize;
            let png = r.bytes(png_len)?.to_vec();
            WireMessage::Snapshot {
                user_id,
                layer,
                png,
            }
        }
        FrameType::Layers => {
            let count = r.u16()?;
            let mut participants = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let user_id = UserId::new(r.string()?);
                let username = r.string()?;
                let joined_at_ms = r.u64()?;
                participants.push(Participant::new(user_id, username, joined_at_ms));
            }
            WireMessage::Layers { participants }
        }
        FrameType::SnapshotRequest => WireMessage::SnapshotRequest {
            timestamp_ms: r.u64()?,
        },
        FrameType::EndSession => WireMessage::EndSession {
            user_id: UserId::new(r.string()?),
            post_url: r.string()?,
        },
    };
    Ok(message)
}

fn layer(byte: u8) -> AppResult<LayerKind> {
    Ok(LayerKind::from_wire(byte)?)
}

fn brush(byte: u8) -> AppResult<BrushKind> {
    Ok(BrushKind::from_wire(byte)?)
}

struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buffer: &'a [u8], offset: usize) -> Self {
        Self { buffer, offset }
    }

    fn bytes(&mut self, n: usize) -> AppResult<&'a [u8]> {
        let slice = self
            .buffer
            .get(self.offset..self.offset + n)
            .ok_or_else(|| AppError::protocol("frame shorter than declared"))?;
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> AppResult<u8> {
        Ok(self.bytes(1)?.first().copied().unwrap_or(0))
    }

    fn u16(&mut self) -> AppResult<u16> {
        let raw = self.bytes(2)?;
        Ok(u16::from_be_bytes(raw.try_into().unwrap_or([0; 2])))
    }

    fn u32(&mut self) -> AppResult<u32> {
        let raw = self.bytes(4)?;
        Ok(u32::from_be_bytes(raw.try_into().unwrap_or([0; 4])))
    }

    fn u64(&mut self) -> AppResult<u64> {
        let raw = self.bytes(8)?;
        Ok(u64::from_be_bytes(raw.try_into().unwrap_or([0; 8])))
    }

    fn rgba(&mut self) -> AppResult<Rgba> {
        let raw = self.bytes(4)?;
        Ok(Rgba::new(
            raw.first().copied().unwrap_or(0),
            raw.get(1).copied().unwrap_or(0),
            raw.get(2).copied().unwrap_or(0),
            raw.get(3).copied().unwrap_or(0),
        ))
    }

    fn string(&mut self) -> AppResult<String> {
        let len = usize::from(self.u16()?);
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| AppError::protocol("malformed UTF-8 in string field"))
    }
}
