use serde::{Deserialize, Serialize};
use std::fmt;

use crate::color::Rgba;
use crate::coords::{CanvasSize, Rect};
use crate::error::{DomainError, DomainResult};
use crate::layer::LayerKind;
use crate::participant::UserId;

/// Conservative bounds reported for a flood fill; the fill may touch more,
/// but concurrency treats it as layer-scoped through the indirect set.
pub const FILL_BOUNDS_EXTENT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrushKind {
    Solid,
    Halftone,
    Eraser,
    /// Tool selector: produces fill operations rather than dabs.
    Fill,
    /// Tool selector: pans the viewport, never writes pixels.
    Pan,
}

impl BrushKind {
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Solid => 0,
            Self::Halftone => 1,
            Self::Eraser => 2,
            Self::Fill => 3,
            Self::Pan => 4,
        }
    }

    pub fn from_wire(byte: u8) -> DomainResult<Self> {
        match byte {
            0 => Ok(Self::Solid),
            1 => Ok(Self::Halftone),
            2 => Ok(Self::Eraser),
            3 => Ok(Self::Fill),
            4 => Ok(Self::Pan),
            other => Err(DomainError::InvalidColorFormat(format!(
                "Unknown brush byte {other}"
            ))),
        }
    }

    /// Whether dabs of this brush write any pixels at all.
    #[must_use]
    pub fn paints(self) -> bool {
        !matches!(self, Self::Fill | Self::Pan)
    }
}

/// The payload of one canvas mutation. Confirmation matching compares
/// payloads structurally, so every field participates in `PartialEq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpPayload {
    DrawPoint {
        layer: LayerKind,
        x: u16,
        y: u16,
        size: u8,
        brush: BrushKind,
        color: Rgba,
    },
    DrawLine {
        layer: LayerKind,
        from_x: u16,
        from_y: u16,
        to_x: u16,
        to_y: u16,
        size: u8,
        brush: BrushKind,
        color: Rgba,
    },
    Fill {
        layer: LayerKind,
        x: u16,
        y: u16,
        color: Rgba,
    },
    /// Authoritative PNG layer state used for catch-up.
    Snapshot { layer: LayerKind, png: Vec<u8> },
}

impl OpPayload {
    #[must_use]
    pub fn layer(&self) -> LayerKind {
        match self {
            Self::DrawPoint { layer, .. }
            | Self::DrawLine { layer, .. }
            | Self::Fill { layer, .. }
            | Self::Snapshot { layer, .. } => *layer,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::DrawPoint { .. } => "draw-point",
            Self::DrawLine { .. } => "draw-line",
            Self::Fill { .. } => "fill",
            Self::Snapshot { .. } => "snapshot",
        }
    }

    /// The affected area used for spatial concurrency decisions.
    #[must_use]
    pub fn affected_area(&self, canvas: CanvasSize) -> AffectedArea {
        match self {
            Self::DrawPoint {
                layer, x, y, size, ..
            } => {
                let margin = (i32::from(*size) + 1) / 2;
                AffectedArea {
                    domain: EffectDomain::Drawing,
                    bounds: Rect::around(i32::from(*x), i32::from(*y), margin),
                    layer: Some(*layer),
                    indirect: None,
                }
            }
            Self::DrawLine {
                layer,
                from_x,
                from_y,
                to_x,
                to_y,
                size,
                ..
            } => {
                let margin = (i32::from(*size) + 1) / 2;
                AffectedArea {
                    domain: EffectDomain::Drawing,
                    bounds: Rect::spanning(
                        i32::from(*from_x),
                        i32::from(*from_y),
                        i32::from(*to_x),
                        i32::from(*to_y),
                    )
                    .expand(margin),
                    layer: Some(*layer),
                    indirect: None,
                }
            }
            Self::Fill { layer, x, y, .. } => AffectedArea {
                domain: EffectDomain::Drawing,
                bounds: Rect::new(
                    i32::from(*x) - FILL_BOUNDS_EXTENT,
                    i32::from(*y) - FILL_BOUNDS_EXTENT,
                    i32::from(*x) + FILL_BOUNDS_EXTENT,
                    i32::from(*y) + FILL_BOUNDS_EXTENT,
                ),
                layer: Some(*layer),
                indirect: Some(IndirectEffect {
                    affects_layers: vec![*layer],
                    affects_canvas: false,
                }),
            },
            Self::Snapshot { layer, .. } => AffectedArea {
                domain: EffectDomain::Layer,
                bounds: canvas.full_rect(),
                layer: Some(*layer),
                indirect: Some(IndirectEffect {
                    affects_layers: vec![*layer],
                    affects_canvas: false,
                }),
            },
        }
    }
}

/// A stamped, sequenced canvas mutation from one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub user_id: UserId,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub payload: OpPayload,
    pub affected: AffectedArea,
    pub priority: u8,
}

impl Operation {
    #[must_use]
    pub fn new(
        user_id: UserId,
        sequence: u64,
        timestamp_ms: u64,
        payload: OpPayload,
        canvas: CanvasSize,
    ) -> Self {
        let affected = payload.affected_area(canvas);
        Self {
            user_id,
            sequence,
            timestamp_ms,
            payload,
            affected,
            priority: 0,
        }
    }

    /// Confirmation matching: a server echo confirms a pending local op iff
    /// kind, data, and target layer are all equal.
    #[must_use]
    pub fn matches_echo(&self, echo: &Self) -> bool {
        self.payload == echo.payload
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {} on {}",
            self.user_id,
            self.sequence,
            self.payload.kind_name(),
            self.payload.layer()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectDomain {
    Drawing,
    Layer,
    Selection,
    Annotation,
    Transform,
}

/// How two effect domains decide concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatRule {
    /// Concurrent iff the bounds rectangles do not intersect.
    Spatial,
    /// Concurrent iff the ops target different layers.
    SameLayer,
    /// Always concurrent.
    Always,
}

/// Cross-domain compatibility table. `Spatial` pairs fall through to the
/// rectangle test, `SameLayer` pairs to the layer-id check.
#[must_use]
pub fn compatibility(a: EffectDomain, b: EffectDomain) -> CompatRule {
    use EffectDomain::{Annotation, Drawing, Layer, Selection, Transform};
    match (a, b) {
        (Drawing, Drawing)
        | (Drawing, Selection)
        | (Selection, Drawing)
        | (Drawing, Annotation)
        | (Annotation, Drawing)
        | (Selection, Selection)
        | (Annotation, Annotation) => CompatRule::Spatial,
        (Drawing, Layer)
        | (Layer, Drawing)
        | (Drawing, Transform)
        | (Transform, Drawing)
        | (Layer, Layer)
        | (Transform, Transform) => CompatRule::SameLayer,
        _ => CompatRule::Always,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectEffect {
    pub affects_layers: Vec<LayerKind>,
    pub affects_canvas: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedArea {
    pub domain: EffectDomain,
    pub bounds: Rect,
    pub layer: Option<LayerKind>,
    pub indirect: Option<IndirectEffect>,
}

impl AffectedArea {
    /// Indirect-effect overlap: canvas-wide effects collide with everything,
    /// otherwise the layer sets must share a member.
    #[must_use]
    pub fn indirect_overlaps(&self, other: &Self) -> bool {
        let canvas_wide = |area: &Self| {
            area.indirect
                .as_ref()
                .is_some_and(|eff| eff.affects_canvas)
        };
        if canvas_wide(self) || canvas_wide(other) {
            return true;
        }
        match (&self.indirect, &other.indirect) {
            (Some(a), Some(b)) => a
                .affects_layers
                .iter()
                .any(|layer| b.affects_layers.contains(layer)),
            _ => false,
        }
    }

    #[must_use]
    pub fn same_layer(&self, other: &Self) -> bool {
        match (self.layer, other.layer) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;

    fn canvas() -> CanvasSize {
        CanvasSize::new(200, 200)
    }

    #[test]
    fn line_bounds_expand_by_half_brush() {
        let payload = OpPayload::DrawLine {
            layer: LayerKind::Foreground,
            from_x: 10,
            from_y: 10,
            to_x: 20,
            to_y: 10,
            size: 5,
            brush: BrushKind::Solid,
            color: Rgba::opaque(0, 0, 0),
        };
        let area = payload.affected_area(canvas());
        assert_eq!(area.bounds, Rect::new(7, 7, 24, 14));
        assert_eq!(area.domain, EffectDomain::Drawing);
    }

    #[test]
    fn fill_reports_conservative_box_and_indirect_layer() {
        let payload = OpPayload::Fill {
            layer: LayerKind::Background,
            x: 50,
            y: 50,
            color: Rgba::opaque(1, 1, 1),
        };
        let area = payload.affected_area(canvas());
        assert_eq!(area.bounds.width(), 200);
        assert_eq!(area.bounds.height(), 200);
        let indirect = area.indirect.unwrap();
        assert_eq!(indirect.affects_layers, vec![LayerKind::Background]);
        assert!(!indirect.affects_canvas);
    }

    #[test]
    fn compatibility_table_spot_checks() {
        use EffectDomain::{Annotation, Drawing, Layer, Selection, Transform};
        assert_eq!(compatibility(Drawing, Drawing), CompatRule::Spatial);
        assert_eq!(compatibility(Drawing, Layer), CompatRule::SameLayer);
        assert_eq!(compatibility(Layer, Selection), CompatRule::Always);
        assert_eq!(compatibility(Transform, Drawing), CompatRule::SameLayer);
        assert_eq!(compatibility(Selection, Annotation), CompatRule::Always);
    }

    #[test]
    fn echo_matching_compares_payloads() {
        let user = UserId::new("u1");
        let payload = OpPayload::DrawPoint {
            layer: LayerKind::Foreground,
            x: 1,
            y: 2,
            size: 3,
            brush: BrushKind::Solid,
            color: Rgba::opaque(9, 9, 9),
        };
        let local = Operation::new(user.clone(), 1, 100, payload.clone(), canvas());
        let echo = Operation::new(user, 7, 250, payload, canvas());
        assert!(local.matches_echo(&echo));
    }
}
