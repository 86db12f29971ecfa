use std::sync::Arc;

use domain::layer::{Layer, LayerKind};
use domain::participant::UserId;

use crate::error::AppResult;

/// Presentation sink for composited output: one surface per participant
/// layer, stacked by the compositor's z order, plus the shared pan/zoom
/// transform and per-user cursor visibility.
pub trait SurfacePort: Send + Sync {
    fn present(&self, user_id: &UserId, kind: LayerKind, raster: &Layer) -> AppResult<()>;

    /// Full stacking order, ascending z. Recomputed whenever the
    /// participant set changes.
    fn set_stack_order(&self, order: &[(UserId, LayerKind, i32)]) -> AppResult<()>;

    fn set_transform(&self, zoom: f64, pan_x: f64, pan_y: f64) -> AppResult<()>;

    fn set_cursor_visible(&self, user_id: &UserId, visible: bool) -> AppResult<()>;

    /// Drops every surface owned by a departed participant.
    fn drop_participant(&self, user_id: &UserId) -> AppResult<()>;
}

pub type DynSurfacePort = Arc<dyn SurfacePort>;
