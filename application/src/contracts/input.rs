use domain::color::Rgba;
use domain::layer::LayerKind;
use domain::op::BrushKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    /// Stroke cancelled by the platform (capture lost, surface left); the
    /// in-progress stroke commits as-is.
    Cancel,
}

/// A pointer/touch sample in client (viewport) coordinates, already merged
/// across input device kinds by the embedding shell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u32,
    pub phase: PointerPhase,
    pub client_x: f64,
    pub client_y: f64,
    pub timestamp_ms: u64,
}

/// Bounding rectangle of the interaction surface in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// The local user's active tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolState {
    pub brush: BrushKind,
    pub size: u8,
    pub color: Rgba,
    pub layer: LayerKind,
}

impl Default for ToolState {
    fn default() -> Self {
        Self {
            brush: BrushKind::Solid,
            size: 3,
            color: Rgba::opaque(0, 0, 0),
            layer: LayerKind::Foreground,
        }
    }
}
