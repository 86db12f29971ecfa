use std::mem;

use domain::op::{BrushKind, OpPayload, Operation};

/// Outbound coalescing window: consecutive local line/dab ops on the same
/// layer with the same tool, whose endpoints chain within a few pixels,
/// ship as one transport batch. Constituents are kept individually so
/// rollback and remote application replay them one by one, which keeps
/// coalescing pixel-neutral.
pub struct CoalesceBuffer {
    window_ms: u64,
    shrunk_window_ms: u64,
    distance_px: u16,
    pending: Vec<Operation>,
    window_start_ms: u64,
    shrunk: bool,
}

impl CoalesceBuffer {
    #[must_use]
    pub fn new(window_ms: u64, distance_px: u16) -> Self {
        Self {
            window_ms,
            shrunk_window_ms: window_ms / 2,
            distance_px,
            pending: Vec::new(),
            window_start_ms: 0,
            shrunk: false,
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Predictive-conflict signal: halves the window so contended strokes
    /// reach the wire sooner.
    pub fn shrink_window(&mut self) {
        self.shrunk = true;
    }

    fn active_window_ms(&self) -> u64 {
        if self.shrunk {
            self.shrunk_window_ms
        } else {
            self.window_ms
        }
    }

    /// Queues a local op. Returns a batch that must be transmitted now:
    /// either the previous run (when the new op does not chain onto it) or
    /// the new op itself when it is not coalescible at all.
    pub fn push(&mut self, op: Operation, now_ms: u64) -> Option<Vec<Operation>> {
        if !is_coalescible(&op) {
            let mut flushed = self.take_pending();
            flushed.push(op);
            return Some(flushed);
        }

        let chains = self
            .pending
            .last()
            .is_some_and(|prev| chains_with(prev, &op, self.distance_px));

        if self.pending.is_empty() || chains {
            if self.pending.is_empty() {
                self.window_start_ms = now_ms;
            }
            self.pending.push(op);
            if now_ms.saturating_sub(self.window_start_ms) >= self.active_window_ms() {
                return Some(self.take_pending());
            }
            return None;
        }

        let flushed = self.take_pending();
        self.window_start_ms = now_ms;
        self.pending.push(op);
        Some(flushed)
    }

    /// Flushes when the window has elapsed; driven by the session tick.
    pub fn flush_due(&mut self, now_ms: u64) -> Option<Vec<Operation>> {
        if self.pending.is_empty()
            || now_ms.saturating_sub(self.window_start_ms) < self.active_window_ms()
        {
            return None;
        }
        Some(self.take_pending())
    }

    /// Unconditional flush (pointerup, shutdown, rollback).
    pub fn flush_all(&mut self) -> Option<Vec<Operation>> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take_pending())
    }

    fn take_pending(&mut self) -> Vec<Operation> {
        self.shrunk = false;
        mem::take(&mut self.pending)
    }
}

fn is_coalescible(op: &Operation) -> bool {
    matches!(
        op.payload,
        OpPayload::DrawLine { .. } | OpPayload::DrawPoint { .. }
    )
}

fn endpoints(op: &Operation) -> Option<((u16, u16), (u16, u16), u8, BrushKind)> {
    match &op.payload {
        OpPayload::DrawPoint {
            x, y, size, brush, ..
        } => Some(((*x, *y), (*x, *y), *size, *brush)),
        OpPayload::DrawLine {
            from_x,
            from_y,
            to_x,
            to_y,
            size,
            brush,
            ..
        } => Some(((*from_x, *from_y), (*to_x, *to_y), *size, *brush)),
        _ => None,
    }
}

fn chains_with(prev: &Operation, next: &Operation, distance_px: u16) -> bool {
    let (Some((_, prev_end, prev_size, prev_brush)), Some((next_start, _, next_size, next_brush))) =
        (endpoints(prev), endpoints(next))
    else {
        return false;
    };
    if prev.user_id != next.user_id
        || prev.payload.layer() != next.payload.layer()
        || prev_size != next_size
        || prev_brush != next_brush
    {
        return false;
    }
    let dx = i32::from(prev_end.0) - i32::from(next_start.0);
    let dy = i32::from(prev_end.1) - i32::from(next_start.1);
    dx * dx + dy * dy <= i32::from(distance_px) * i32::from(distance_px)
}
