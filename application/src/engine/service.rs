use std::sync::Arc;
use tracing::trace;

use domain::brush::BrushTable;
use domain::color::Rgba;
use domain::coords::{CanvasSize, Rect};
use domain::layer::{Layer, LayerKind, LayerPair};
use domain::op::{BrushKind, OpPayload, Operation};
use domain::participant::UserId;
use domain::raster::{self, PaintMode};

use crate::error::AppResult;
use crate::ports::outgoing::surface::DynSurfacePort;

/// Deterministic rasterization front-end for one participant's layer pair.
/// Every client holds one engine per participant; identical operation
/// sequences produce bit-identical rasters on all of them.
pub struct DrawingEngine {
    canvas: CanvasSize,
    brush: Arc<BrushTable>,
    layers: LayerPair,
    dirty: [bool; 2],
    pan_x: f64,
    pan_y: f64,
    zoom: f64,
}

impl DrawingEngine {
    #[must_use]
    pub fn new(canvas: CanvasSize, brush: Arc<BrushTable>) -> Self {
        Self {
            canvas,
            brush,
            layers: LayerPair::new(canvas),
            dirty: [false; 2],
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }

    #[must_use]
    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    #[must_use]
    pub fn brush_table(&self) -> &Arc<BrushTable> {
        &self.brush
    }

    #[must_use]
    pub fn layer(&self, kind: LayerKind) -> &Layer {
        self.layers.layer(kind)
    }

    #[must_use]
    pub fn layers(&self) -> &LayerPair {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut LayerPair {
        self.dirty = [true; 2];
        &mut self.layers
    }

    /// Coordinates outside the canvas are clamped, never an error
    /// (BoundsFault semantics).
    fn clamp(&self, x: i32, y: i32) -> (u16, u16) {
        self.canvas.clamp(x, y)
    }

    pub fn draw_point(
        &mut self,
        kind: LayerKind,
        x: i32,
        y: i32,
        size: u8,
        brush: BrushKind,
        color: Rgba,
    ) -> AppResult<Rect> {
        let at = self.clamp(x, y);
        let painted = raster::draw_point(
            self.layers.layer_mut(kind),
            &self.brush,
            at,
            size,
            brush,
            color,
            PaintMode::Direct,
        )?;
        self.mark_dirty(kind, &painted);
        Ok(painted)
    }

    pub fn draw_line(
        &mut self,
        kind: LayerKind,
        from: (i32, i32),
        to: (i32, i32),
        size: u8,
        brush: BrushKind,
        color: Rgba,
    ) -> AppResult<Rect> {
        let from = self.clamp(from.0, from.1);
        let to = self.clamp(to.0, to.1);
        let painted = raster::draw_line(
            self.layers.layer_mut(kind),
            &self.brush,
            from,
            to,
            size,
            brush,
            color,
            PaintMode::Direct,
        )?;
        self.mark_dirty(kind, &painted);
        Ok(painted)
    }

    pub fn flood_fill(&mut self, kind: LayerKind, x: i32, y: i32, color: Rgba) -> AppResult<Rect> {
        let (x, y) = self.clamp(x, y);
        let painted = raster::flood_fill(self.layers.layer_mut(kind), x, y, color)?;
        self.mark_dirty(kind, &painted);
        Ok(painted)
    }

    /// Applies one raster operation directly to the layers at the
    /// operation's own opacity. Snapshot payloads are handled upstream
    /// (their PNG decode is an adapter concern) and are a no-op here.
    pub fn apply_operation(&mut self, op: &Operation) -> AppResult<Rect> {
        trace!("apply {}", op);
        match &op.payload {
            OpPayload::DrawPoint {
                layer,
                x,
                y,
                size,
                brush,
                color,
            } => self.draw_point(*layer, i32::from(*x), i32::from(*y), *size, *brush, *color),
            OpPayload::DrawLine {
                layer,
                from_x,
                from_y,
                to_x,
                to_y,
                size,
                brush,
                color,
            } => self.draw_line(
                *layer,
                (i32::from(*from_x), i32::from(*from_y)),
                (i32::from(*to_x), i32::from(*to_y)),
                *size,
                *brush,
                *color,
            ),
            OpPayload::Fill { layer, x, y, color } => {
                self.flood_fill(*layer, i32::from(*x), i32::from(*y), *color)
            }
            OpPayload::Snapshot { .. } => Ok(Rect::EMPTY),
        }
    }

    /// Replaces a layer's pixels wholesale (decoded authoritative snapshot).
    pub fn restore_layer(&mut self, kind: LayerKind, rgba: &[u8]) -> AppResult<()> {
        self.layers.layer_mut(kind).copy_from_bytes(rgba)?;
        self.queue_layer_update(kind);
        Ok(())
    }

    pub fn clear_layers(&mut self) {
        self.layers.clear();
        self.dirty = [true; 2];
    }

    pub fn queue_layer_update(&mut self, kind: LayerKind) {
        if let Some(flag) = self.dirty.get_mut(usize::from(kind.to_wire())) {
            *flag = true;
        }
    }

    fn mark_dirty(&mut self, kind: LayerKind, painted: &Rect) {
        if !painted.is_empty() {
            self.queue_layer_update(kind);
        }
    }

    /// Presents layers that changed since the last flush.
    pub fn present_dirty(&mut self, surface: &DynSurfacePort, user_id: &UserId) -> AppResult<()> {
        for kind in LayerKind::ALL {
            let idx = usize::from(kind.to_wire());
            if self.dirty.get(idx).copied().unwrap_or(false) {
                surface.present(user_id, kind, self.layers.layer(kind))?;
                if let Some(flag) = self.dirty.get_mut(idx) {
                    *flag = false;
                }
            }
        }
        Ok(())
    }

    /// Presents both layers right now, dirty or not. Used on catch-up
    /// boundaries where queued repaints would lag the authoritative state.
    pub fn present_all(&mut self, surface: &DynSurfacePort, user_id: &UserId) -> AppResult<()> {
        for kind in LayerKind::ALL {
            surface.present(user_id, kind, self.layers.layer(kind))?;
        }
        self.dirty = [false; 2];
        Ok(())
    }

    /// Pure transform state; never touches pixels.
    pub fn update_pan_offset(&mut self, dx: f64, dy: f64) {
        self.pan_x += dx / self.zoom;
        self.pan_y += dy / self.zoom;
    }

    /// Re-anchors the pan so the focus point stays put across a zoom step.
    pub fn adjust_pan_for_zoom(&mut self, new_zoom: f64, focus_x: f64, focus_y: f64) {
        if new_zoom <= 0.0 {
            return;
        }
        let scale = self.zoom / new_zoom;
        self.pan_x = focus_x - (focus_x - self.pan_x) * scale;
        self.pan_y = focus_y - (focus_y - self.pan_y) * scale;
        self.zoom = new_zoom;
    }

    #[must_use]
    pub fn transform(&self) -> (f64, f64, f64) {
        (self.zoom, self.pan_x, self.pan_y)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use domain::op::OpPayload;

    fn engine() -> DrawingEngine {
        DrawingEngine::new(CanvasSize::new(100, 50), Arc::new(BrushTable::new()))
    }

    #[test]
    fn out_of_bounds_coordinates_clamp_instead_of_erroring() {
        let mut e = engine();
        let rect = e
            .draw_point(
                LayerKind::Foreground,
                500,
                -20,
                1,
                BrushKind::Solid,
                Rgba::opaque(1, 2, 3),
            )
            .unwrap();
        assert!(!rect.is_empty());
        assert_eq!(e.layer(LayerKind::Foreground).pixel(99, 0), Rgba::opaque(1, 2, 3));
    }

    #[test]
    fn apply_operation_routes_by_payload() {
        let mut e = engine();
        let op = Operation::new(
            UserId::new("u"),
            1,
            0,
            OpPayload::Fill {
                layer: LayerKind::Background,
                x: 0,
                y: 0,
                color: Rgba::opaque(7, 7, 7),
            },
            e.canvas(),
        );
        e.apply_operation(&op).unwrap();
        assert_eq!(e.layer(LayerKind::Background).pixel(50, 25), Rgba::opaque(7, 7, 7));
        assert_eq!(e.layer(LayerKind::Foreground).pixel(50, 25), Rgba::TRANSPARENT);
    }

    #[test]
    fn zoom_adjustment_keeps_focus_stable() {
        let mut e = engine();
        e.update_pan_offset(10.0, 4.0);
        let before = e.transform();
        e.adjust_pan_for_zoom(2.0, 50.0, 25.0);
        let (zoom, px, py) = e.transform();
        assert!((zoom - 2.0).abs() < f64::EPSILON);
        // focus-relative offset halves when zoom doubles
        assert!(((50.0 - px) * 2.0 - (50.0 - before.1)).abs() < 1e-9);
        assert!(((25.0 - py) * 2.0 - (25.0 - before.2)).abs() < 1e-9);
    }
}
