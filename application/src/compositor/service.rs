use domain::coords::CanvasSize;
use domain::layer::{BYTES_PER_PIXEL, Layer, LayerKind};
use domain::participant::{Participant, UserId};

use crate::error::AppResult;
use crate::ports::outgoing::image_codec::DynImageCodecPort;

/// Per-user z band: 40 levels for background, 40 for foreground, 20
/// reserved, so recomputation on join/leave can never interleave two
/// users' layers.
const USER_BASE_Z: i32 = 1000;
const USER_BAND_Z: i32 = 100;
const FOREGROUND_OFFSET_Z: i32 = 40;

/// Stacks participant layer pairs and produces composited exports. Z order
/// is derived declaratively from join order; the earliest joiner renders
/// on top.
pub struct LayerCompositor {
    canvas: CanvasSize,
}

impl LayerCompositor {
    #[must_use]
    pub fn new(canvas: CanvasSize) -> Self {
        Self { canvas }
    }

    /// Full stacking order, ascending z. `participants` must already be
    /// sorted by join timestamp (the session controller keeps them that
    /// way).
    #[must_use]
    pub fn stack_order(participants: &[Participant]) -> Vec<(UserId, LayerKind, i32)> {
        let mut order: Vec<(UserId, LayerKind, i32)> = participants
            .iter()
            .enumerate()
            .flat_map(|(join_index, p)| {
                let base = USER_BASE_Z - (join_index as i32) * USER_BAND_Z;
                [
                    (p.user_id.clone(), LayerKind::Background, base),
                    (
                        p.user_id.clone(),
                        LayerKind::Foreground,
                        base + FOREGROUND_OFFSET_Z,
                    ),
                ]
            })
            .collect();
        order.sort_by_key(|(_, _, z)| *z);
        order
    }

    /// Flattens layers (given bottom-to-top) over a white background.
    /// Plain integer source-over; this path feeds exports and snapshots,
    /// not the convergence-critical layer blending.
    #[must_use]
    pub fn composite_rgba(&self, layers_bottom_up: &[&Layer]) -> Vec<u8> {
        let mut out = vec![255u8; self.canvas.pixel_count() * BYTES_PER_PIXEL];
        for layer in layers_bottom_up {
            for (dst, src) in out
                .chunks_exact_mut(BYTES_PER_PIXEL)
                .zip(layer.as_bytes().chunks_exact(BYTES_PER_PIXEL))
            {
                let sa = u32::from(src.get(3).copied().unwrap_or(0));
                if sa == 0 {
                    continue;
                }
                for ch in 0..3 {
                    let sc = u32::from(src.get(ch).copied().unwrap_or(0));
                    let dc = u32::from(dst.get(ch).copied().unwrap_or(0));
                    let blended = (sc * sa + dc * (255 - sa) + 127) / 255;
                    if let Some(out_ch) = dst.get_mut(ch) {
                        *out_ch = u8::try_from(blended.min(255)).unwrap_or(255);
                    }
                }
                // white base keeps the scratch opaque
            }
        }
        out
    }

    pub fn export_png(
        &self,
        layers_bottom_up: &[&Layer],
        codec: &DynImageCodecPort,
    ) -> AppResult<Vec<u8>> {
        let rgba = self.composite_rgba(layers_bottom_up);
        codec.encode_png(self.canvas, &rgba)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use domain::color::Rgba;

    fn participants() -> Vec<Participant> {
        vec![
            Participant::new(UserId::new("first"), "a", 100),
            Participant::new(UserId::new("second"), "b", 200),
            Participant::new(UserId::new("third"), "c", 300),
        ]
    }

    #[test]
    fn earliest_joiner_stacks_on_top() {
        let order = LayerCompositor::stack_order(&participants());
        assert_eq!(order.len(), 6);
        // ascending z: third's bg lowest, first's fg highest
        assert_eq!(order.first().unwrap().0, UserId::new("third"));
        assert_eq!(order.first().unwrap().2, 800);
        let top = order.last().unwrap();
        assert_eq!(top.0, UserId::new("first"));
        assert_eq!(top.1, LayerKind::Foreground);
        assert_eq!(top.2, 1040);
    }

    #[test]
    fn bands_never_interleave_users() {
        let order = LayerCompositor::stack_order(&participants());
        // both layers of each user are adjacent in the ascending order
        for pair in order.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!(pair[0].1, LayerKind::Background);
            assert_eq!(pair[1].1, LayerKind::Foreground);
        }
    }

    #[test]
    fn composite_over_white() {
        let size = CanvasSize::new(2, 1);
        let compositor = LayerCompositor::new(size);
        let mut below = Layer::new(size);
        let mut above = Layer::new(size);
        below.set_pixel(0, 0, Rgba::opaque(255, 0, 0));
        above.set_pixel(0, 0, Rgba::new(0, 0, 255, 255));
        let out = compositor.composite_rgba(&[&below, &above]);
        // top layer wins where opaque, untouched pixels stay white
        assert_eq!(&out[0..4], &[0, 0, 255, 255]);
        assert_eq!(&out[4..8], &[255, 255, 255, 255]);
    }

    #[test]
    fn transparent_layers_leave_white() {
        let size = CanvasSize::new(4, 4);
        let compositor = LayerCompositor::new(size);
        let empty = Layer::new(size);
        let out = compositor.composite_rgba(&[&empty, &empty]);
        assert!(out.iter().all(|&b| b == 255));
    }
}
