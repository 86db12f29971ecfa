use std::collections::HashMap;
use std::sync::Mutex;

use domain::layer::{Layer, LayerKind};
use domain::participant::UserId;
use oekaki_application::error::{AppError, AppResult};
use oekaki_application::ports::outgoing::surface::SurfacePort;

#[derive(Default)]
struct SurfaceState {
    rasters: HashMap<(UserId, LayerKind), Vec<u8>>,
    stack: Vec<(UserId, LayerKind, i32)>,
    transform: (f64, f64, f64),
    cursors: HashMap<UserId, bool>,
}

/// Headless presentation sink: retains the last presented raster per
/// participant layer plus the stacking order and transform. Serves the
/// headless client binary and the integration tests, where it stands in
/// for the browser's canvas elements.
pub struct MemorySurfaceAdapter {
    inner: Mutex<SurfaceState>,
}

impl MemorySurfaceAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SurfaceState {
                transform: (1.0, 0.0, 0.0),
                ..SurfaceState::default()
            }),
        }
    }

    fn locked<T>(&self, f: impl FnOnce(&mut SurfaceState) -> T) -> AppResult<T> {
        let mut guard = self.inner.lock().map_err(|_| AppError::Validation {
            message: "surface state poisoned".to_string(),
        })?;
        Ok(f(&mut guard))
    }

    #[must_use]
    pub fn raster(&self, user: &UserId, kind: LayerKind) -> Option<Vec<u8>> {
        self.locked(|state| state.rasters.get(&(user.clone(), kind)).cloned())
            .ok()
            .flatten()
    }

    #[must_use]
    pub fn stack(&self) -> Vec<(UserId, LayerKind, i32)> {
        self.locked(|state| state.stack.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn transform(&self) -> (f64, f64, f64) {
        self.locked(|state| state.transform)
            .unwrap_or((1.0, 0.0, 0.0))
    }

    #[must_use]
    pub fn cursor_visible(&self, user: &UserId) -> bool {
        self.locked(|state| state.cursors.get(user).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Default for MemorySurfaceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfacePort for MemorySurfaceAdapter {
    fn present(&self, user_id: &UserId, kind: LayerKind, raster: &Layer) -> AppResult<()> {
        self.locked(|state| {
            state
                .rasters
                .insert((user_id.clone(), kind), raster.as_bytes().to_vec());
        })
    }

    fn set_stack_order(&self, order: &[(UserId, LayerKind, i32)]) -> AppResult<()> {
        self.locked(|state| {
            state.stack = order.to_vec();
        })
    }

    fn set_transform(&self, zoom: f64, pan_x: f64, pan_y: f64) -> AppResult<()> {
        self.locked(|state| {
            state.transform = (zoom, pan_x, pan_y);
        })
    }

    fn set_cursor_visible(&self, user_id: &UserId, visible: bool) -> AppResult<()> {
        self.locked(|state| {
            state.cursors.insert(user_id.clone(), visible);
        })
    }

    fn drop_participant(&self, user_id: &UserId) -> AppResult<()> {
        self.locked(|state| {
            state.rasters.retain(|(user, _), _| user != user_id);
            state.cursors.remove(user_id);
            state.stack.retain(|(user, _, _)| user != user_id);
        })
    }
}
