use domain::color::Rgba;
use domain::coords::CanvasSize;
use domain::layer::LayerKind;
use domain::op::{BrushKind, OpPayload, Operation};
use domain::participant::{Participant, UserId};

/// One protocol message, already decoded into domain terms. The adapters
/// crate owns the byte-level framing; everything above it trades in these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Join {
        user_id: UserId,
        timestamp_ms: u64,
    },
    Leave {
        user_id: UserId,
        username: String,
        timestamp_ms: u64,
    },
    Chat {
        user_id: UserId,
        username: String,
        message: String,
        timestamp_ms: u64,
    },
    DrawLine {
        user_id: UserId,
        layer: LayerKind,
        from_x: u16,
        from_y: u16,
        to_x: u16,
        to_y: u16,
        size: u8,
        brush: BrushKind,
        color: Rgba,
    },
    DrawPoint {
        user_id: UserId,
        layer: LayerKind,
        x: u16,
        y: u16,
        size: u8,
        brush: BrushKind,
        color: Rgba,
    },
    Fill {
        user_id: UserId,
        layer: LayerKind,
        x: u16,
        y: u16,
        color: Rgba,
    },
    PointerUp {
        user_id: UserId,
    },
    Snapshot {
        user_id: UserId,
        layer: LayerKind,
        png: Vec<u8>,
    },
    Layers {
        participants: Vec<Participant>,
    },
    SnapshotRequest {
        timestamp_ms: u64,
    },
    EndSession {
        user_id: UserId,
        post_url: String,
    },
}

impl WireMessage {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Chat { .. } => "chat",
            Self::DrawLine { .. } => "draw-line",
            Self::DrawPoint { .. } => "draw-point",
            Self::Fill { .. } => "fill",
            Self::PointerUp { .. } => "pointerup",
            Self::Snapshot { .. } => "snapshot",
            Self::Layers { .. } => "layers",
            Self::SnapshotRequest { .. } => "snapshot-request",
            Self::EndSession { .. } => "end-session",
        }
    }

    #[must_use]
    pub fn sender(&self) -> Option<&UserId> {
        match self {
            Self::Join { user_id, .. }
            | Self::Leave { user_id, .. }
            | Self::Chat { user_id, .. }
            | Self::DrawLine { user_id, .. }
            | Self::DrawPoint { user_id, .. }
            | Self::Fill { user_id, .. }
            | Self::PointerUp { user_id }
            | Self::Snapshot { user_id, .. }
            | Self::EndSession { user_id, .. } => Some(user_id),
            Self::Layers { .. } | Self::SnapshotRequest { .. } => None,
        }
    }

    /// Wire rendering of a drawing operation. Snapshot payloads are moved
    /// as-is; non-drawing messages have no operation form.
    #[must_use]
    pub fn from_operation(op: &Operation) -> Option<Self> {
        let user_id = op.user_id.clone();
        match &op.payload {
            OpPayload::DrawPoint {
                layer,
                x,
                y,
                size,
                brush,
                color,
            } => Some(Self::DrawPoint {
                user_id,
                layer: *layer,
                x: *x,
                y: *y,
                size: *size,
                brush: *brush,
                color: *color,
            }),
            OpPayload::DrawLine {
                layer,
                from_x,
                from_y,
                to_x,
                to_y,
                size,
                brush,
                color,
            } => Some(Self::DrawLine {
                user_id,
                layer: *layer,
                from_x: *from_x,
                from_y: *from_y,
                to_x: *to_x,
                to_y: *to_y,
                size: *size,
                brush: *brush,
                color: *color,
            }),
            OpPayload::Fill { layer, x, y, color } => Some(Self::Fill {
                user_id,
                layer: *layer,
                x: *x,
                y: *y,
                color: *color,
            }),
            OpPayload::Snapshot { layer, png } => Some(Self::Snapshot {
                user_id,
                layer: *layer,
                png: png.clone(),
            }),
        }
    }

    /// Lifts a drawing message into an operation. Draw frames carry no
    /// timestamp on the wire, so the caller supplies one (envelope server
    /// timestamp when present, arrival time otherwise).
    #[must_use]
    pub fn to_operation(&self, sequence: u64, timestamp_ms: u64, canvas: CanvasSize) -> Option<Operation> {
        let payload = match self {
            Self::DrawPoint {
                layer,
                x,
                y,
                size,
                brush,
                color,
                ..
            } => Some(OpPayload::DrawPoint {
                layer: *layer,
                x: *x,
                y: *y,
                size: *size,
                brush: *brush,
                color: *color,
            }),
            Self::DrawLine {
                layer,
                from_x,
                from_y,
                to_x,
                to_y,
                size,
                brush,
                color,
                ..
            } => Some(OpPayload::DrawLine {
                layer: *layer,
                from_x: *from_x,
                from_y: *from_y,
                to_x: *to_x,
                to_y: *to_y,
                size: *size,
                brush: *brush,
                color: *color,
            }),
            Self::Fill { layer, x, y, color, .. } => Some(OpPayload::Fill {
                layer: *layer,
                x: *x,
                y: *y,
                color: *color,
            }),
            Self::Snapshot { layer, png, .. } => Some(OpPayload::Snapshot {
                layer: *layer,
                png: png.clone(),
            }),
            _ => None,
        }?;
        let user_id = self.sender()?.clone();
        Some(Operation::new(user_id, sequence, timestamp_ms, payload, canvas))
    }
}

/// A decoded inbound message plus the relay envelope fields that supersede
/// client-side ordering when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub message: WireMessage,
    pub server_seq: Option<u64>,
    pub server_timestamp_ms: Option<u64>,
}

impl InboundFrame {
    #[must_use]
    pub fn bare(message: WireMessage) -> Self {
        Self {
            message,
            server_seq: None,
            server_timestamp_ms: None,
        }
    }
}
