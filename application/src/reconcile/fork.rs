use std::collections::{HashMap, VecDeque};

use domain::op::Operation;

/// One optimistically applied local operation awaiting its server echo.
/// `buffered` marks ops whose pixels still live in the stroke buffer
/// rather than on the layer (the stroke has not committed yet).
#[derive(Debug, Clone)]
pub struct PendingOp {
    pub op: Operation,
    pub buffered: bool,
}

/// The local fork: sent-but-unconfirmed local operations plus the remote
/// operations that interleaved with them. Materializes with the first
/// unconfirmed local op and dissolves when the queue drains.
#[derive(Debug)]
pub struct LocalFork {
    pub base_sequence: u64,
    pub local_ops: VecDeque<PendingOp>,
    pub remote_ops: Vec<Operation>,
    pub fallbehind: u32,
    pub starts_at_undo_point: bool,
    /// Predicted-conflict flags per local sequence, fed by the activity
    /// heat map. Instrumentation only.
    pub conflict_map: HashMap<u64, bool>,
}

impl LocalFork {
    #[must_use]
    pub fn new(base_sequence: u64, starts_at_undo_point: bool) -> Self {
        Self {
            base_sequence,
            local_ops: VecDeque::new(),
            remote_ops: Vec::new(),
            fallbehind: 0,
            starts_at_undo_point,
            conflict_map: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.local_ops.len()
    }

    pub fn push_local(&mut self, op: Operation, buffered: bool) {
        self.local_ops.push_back(PendingOp { op, buffered });
    }

    /// Confirmation matching: the echo must equal the queue head in kind,
    /// data, and target layer. Returns whether the head was confirmed.
    pub fn try_confirm(&mut self, echo: &Operation) -> bool {
        let matches = self
            .local_ops
            .front()
            .is_some_and(|pending| pending.op.matches_echo(echo));
        if matches {
            if let Some(confirmed) = self.local_ops.pop_front() {
                self.conflict_map.remove(&confirmed.op.sequence);
            }
        }
        matches
    }

    /// Flips every buffered op to layer-resident after a stroke commit.
    pub fn mark_stroke_committed(&mut self) {
        for pending in &mut self.local_ops {
            pending.buffered = false;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use domain::color::Rgba;
    use domain::coords::CanvasSize;
    use domain::layer::LayerKind;
    use domain::op::{BrushKind, OpPayload};
    use domain::participant::UserId;

    fn op(seq: u64, x: u16) -> Operation {
        Operation::new(
            UserId::new("me"),
            seq,
            seq * 10,
            OpPayload::DrawPoint {
                layer: LayerKind::Foreground,
                x,
                y: 0,
                size: 1,
                brush: BrushKind::Solid,
                color: Rgba::opaque(0, 0, 0),
            },
            CanvasSize::new(64, 64),
        )
    }

    #[test]
    fn echo_confirms_exactly_the_head() {
        let mut fork = LocalFork::new(1, false);
        fork.push_local(op(1, 5), false);
        fork.push_local(op(2, 9), false);

        // out-of-order echo does not confirm
        assert!(!fork.try_confirm(&op(99, 9)));
        assert_eq!(fork.len(), 2);

        assert!(fork.try_confirm(&op(50, 5)));
        assert!(fork.try_confirm(&op(51, 9)));
        assert!(fork.is_empty());
    }

    #[test]
    fn commit_clears_buffered_flags() {
        let mut fork = LocalFork::new(1, false);
        fork.push_local(op(1, 1), true);
        fork.push_local(op(2, 2), true);
        fork.mark_stroke_committed();
        assert!(fork.local_ops.iter().all(|p| !p.buffered));
    }
}
