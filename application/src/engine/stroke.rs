use tracing::warn;

use domain::brush::BrushTable;
use domain::color::{Rgba, blend_pixel, erase_pixel};
use domain::coords::{CanvasSize, Rect};
use domain::layer::{Layer, LayerKind};
use domain::op::{BrushKind, OpPayload, Operation};
use domain::raster::{self, PaintMode};

use crate::contracts::input::ToolState;
use crate::error::AppResult;

/// Offscreen buffer holding one in-progress local stroke. Dabs accumulate
/// as a full-opacity coverage mask so overlapping samples inside a single
/// stroke never self-compound; the commit blits the mask once at the
/// stroke's opacity.
pub struct StrokeBuffer {
    buffer: Layer,
    active: bool,
    is_halftone: bool,
    is_eraser: bool,
    stroke_alpha: u8,
    target_layer: LayerKind,
    touched: Rect,
}

impl StrokeBuffer {
    #[must_use]
    pub fn new(canvas: CanvasSize) -> Self {
        Self {
            buffer: Layer::new(canvas),
            active: false,
            is_halftone: false,
            is_eraser: false,
            stroke_alpha: 255,
            target_layer: LayerKind::Foreground,
            touched: Rect::EMPTY,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn target_layer(&self) -> LayerKind {
        self.target_layer
    }

    pub fn begin(&mut self, tool: &ToolState) {
        self.buffer.clear();
        self.active = true;
        self.is_halftone = tool.brush == BrushKind::Halftone;
        self.is_eraser = tool.brush == BrushKind::Eraser;
        self.stroke_alpha = tool.color.a;
        self.target_layer = tool.layer;
        self.touched = Rect::EMPTY;
    }

    /// Draw primitives may arrive with the buffer inactive (missed
    /// pointerdown, capture glitch); the buffer re-initializes lazily and
    /// the stroke continues.
    pub fn ensure_active(&mut self, tool: &ToolState) {
        if !self.active {
            warn!("stroke buffer inactive during draw; re-initializing");
            self.begin(tool);
        }
    }

    pub fn draw_line(
        &mut self,
        table: &BrushTable,
        from: (u16, u16),
        to: (u16, u16),
        size: u8,
        brush: BrushKind,
        color: Rgba,
    ) -> AppResult<Rect> {
        let painted = raster::draw_line(
            &mut self.buffer,
            table,
            from,
            to,
            size,
            brush,
            color,
            PaintMode::MaskOnly,
        )?;
        self.touched = self.touched.union(&painted);
        Ok(painted)
    }

    /// Replays an already-built local operation into the buffer. Used by
    /// the reconciler when a remote op lands mid-stroke and the later half
    /// of the stroke has to be re-buffered.
    pub fn replay_op(&mut self, table: &BrushTable, op: &Operation) -> AppResult<()> {
        match &op.payload {
            OpPayload::DrawPoint {
                x, y, size, brush, color, ..
            } => {
                self.draw_line(table, (*x, *y), (*x, *y), *size, *brush, *color)?;
            }
            OpPayload::DrawLine {
                from_x,
                from_y,
                to_x,
                to_y,
                size,
                brush,
                color,
                ..
            } => {
                self.draw_line(table, (*from_x, *from_y), (*to_x, *to_y), *size, *brush, *color)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Blits the accumulated mask onto the target with
    /// `stroke_opacity * layer_opacity`, or full opacity for halftone
    /// strokes (their opacity is already encoded as pattern density).
    /// Deactivates the buffer and returns the committed bounds.
    pub fn commit(&mut self, target: &mut Layer, layer_opacity: f64) -> Rect {
        let effective = if self.is_halftone {
            (255.0 * layer_opacity).ceil().clamp(0.0, 255.0) as u8
        } else {
            (f64::from(self.stroke_alpha) * layer_opacity)
                .ceil()
                .clamp(0.0, 255.0) as u8
        };

        let bounds = self.touched.clamp_to(self.buffer.size());
        for y in bounds.top..bounds.bottom {
            for x in bounds.left..bounds.right {
                let (px, py) = (x as u16, y as u16);
                let src = self.buffer.pixel(px, py);
                if src.is_transparent() {
                    continue;
                }
                let dst = target.pixel(px, py);
                let out = if self.is_eraser {
                    erase_pixel(dst, effective)
                } else {
                    blend_pixel(dst, src.with_alpha(effective))
                };
                target.set_pixel(px, py, out);
            }
        }

        self.active = false;
        let committed = bounds;
        self.touched = Rect::EMPTY;
        committed
    }

    /// Discards the in-progress stroke without committing.
    pub fn abandon(&mut self) {
        self.buffer.clear();
        self.touched = Rect::EMPTY;
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use domain::layer::LayerKind;

    fn canvas() -> CanvasSize {
        CanvasSize::new(64, 64)
    }

    fn tool(brush: BrushKind, alpha: u8) -> ToolState {
        ToolState {
            brush,
            size: 3,
            color: Rgba::new(200, 40, 10, alpha),
            layer: LayerKind::Foreground,
        }
    }

    #[test]
    fn overlapping_dabs_commit_without_compounding() {
        let table = BrushTable::new();
        let mut buf = StrokeBuffer::new(canvas());
        let mut target = Layer::new(canvas());
        let t = tool(BrushKind::Solid, 128);

        buf.begin(&t);
        // two heavily overlapping segments of the same stroke
        buf.draw_line(&table, (10, 10), (20, 10), 5, t.brush, t.color).unwrap();
        buf.draw_line(&table, (12, 10), (18, 10), 5, t.brush, t.color).unwrap();
        buf.commit(&mut target, 1.0);

        assert_eq!(target.pixel(15, 10), Rgba::new(200, 40, 10, 128));
    }

    #[test]
    fn commit_equals_direct_draw_of_union_mask() {
        let table = BrushTable::new();
        let t = tool(BrushKind::Solid, 90);

        let mut via_buffer = Layer::new(canvas());
        let mut buf = StrokeBuffer::new(canvas());
        buf.begin(&t);
        buf.draw_line(&table, (5, 5), (30, 20), 7, t.brush, t.color).unwrap();
        buf.commit(&mut via_buffer, 1.0);

        let mut direct = Layer::new(canvas());
        raster::draw_line(
            &mut direct,
            &table,
            (5, 5),
            (30, 20),
            7,
            t.brush,
            t.color,
            PaintMode::Direct,
        )
        .unwrap();

        assert_eq!(via_buffer.as_bytes(), direct.as_bytes());
    }

    #[test]
    fn halftone_strokes_commit_at_full_opacity() {
        let table = BrushTable::new();
        let t = tool(BrushKind::Halftone, 255);
        let mut buf = StrokeBuffer::new(canvas());
        let mut target = Layer::new(canvas());

        buf.begin(&t);
        buf.draw_line(&table, (8, 8), (8, 8), 8, t.brush, t.color).unwrap();
        buf.commit(&mut target, 1.0);

        // pattern-selected pixels land fully opaque even though the tool
        // opacity would suggest otherwise
        let mut saw_pixel = false;
        for y in 0..16u16 {
            for x in 0..16u16 {
                let px = target.pixel(x, y);
                if !px.is_transparent() {
                    assert_eq!(px.a, 255);
                    saw_pixel = true;
                }
            }
        }
        assert!(saw_pixel);
    }

    #[test]
    fn eraser_stroke_commits_as_destination_out() {
        let table = BrushTable::new();
        let mut target = Layer::new(canvas());
        for y in 0..64u16 {
            for x in 0..64u16 {
                target.set_pixel(x, y, Rgba::opaque(50, 60, 70));
            }
        }
        let t = tool(BrushKind::Eraser, 255);
        let mut buf = StrokeBuffer::new(canvas());
        buf.begin(&t);
        buf.draw_line(&table, (10, 10), (10, 10), 1, t.brush, t.color).unwrap();
        buf.commit(&mut target, 1.0);

        assert_eq!(target.pixel(10, 10).a, 0);
        assert_eq!(target.pixel(11, 11).a, 255);
    }

    #[test]
    fn lazy_reinit_when_inactive() {
        let mut buf = StrokeBuffer::new(canvas());
        assert!(!buf.is_active());
        buf.ensure_active(&tool(BrushKind::Solid, 255));
        assert!(buf.is_active());
    }
}
