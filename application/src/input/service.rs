use tracing::trace;

use domain::coords::CanvasSize;
use domain::op::BrushKind;

use crate::config::SessionSettings;
use crate::contracts::input::{ContainerRect, PointerEvent, PointerPhase, ToolState};

/// What a routed pointer sample means for the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouterAction {
    StrokeStart { x: u16, y: u16 },
    StrokeMove { from: (u16, u16), to: (u16, u16) },
    Fill { x: u16, y: u16 },
    PanBy { dx: f64, dy: f64 },
    StrokeEnd,
}

/// Turns raw pointer samples into canvas actions: coordinate conversion
/// (container rect, optional horizontal flip), move throttling, and the
/// one-active-pointer rule. Pointer capture itself lives in the embedding
/// shell; the router's contract is that a second pointer is ignored until
/// the first one is released.
pub struct InputRouter {
    canvas: CanvasSize,
    throttle_ms: u64,
    min_distance: f64,
    flip_horizontal: bool,
    active_pointer: Option<u32>,
    last_accept_ms: u64,
    last_client: (f64, f64),
    last_canvas: (u16, u16),
}

impl InputRouter {
    #[must_use]
    pub fn new(settings: &SessionSettings, flip_horizontal: bool) -> Self {
        Self {
            canvas: settings.canvas,
            throttle_ms: settings.move_throttle_ms,
            min_distance: settings.move_min_distance,
            flip_horizontal,
            active_pointer: None,
            last_accept_ms: 0,
            last_client: (0.0, 0.0),
            last_canvas: (0, 0),
        }
    }

    #[must_use]
    pub fn is_pointer_down(&self) -> bool {
        self.active_pointer.is_some()
    }

    /// Maps a client-space position onto integer canvas coordinates.
    #[must_use]
    pub fn to_canvas(&self, container: &ContainerRect, client_x: f64, client_y: f64) -> (u16, u16) {
        let width = container.width.max(1.0);
        let height = container.height.max(1.0);
        let fx = (client_x - container.left) / width * f64::from(self.canvas.width);
        let fy = (client_y - container.top) / height * f64::from(self.canvas.height);
        let (x, y) = self.canvas.clamp(fx.round() as i32, fy.round() as i32);
        if self.flip_horizontal {
            (self.canvas.width - 1 - x, y)
        } else {
            (x, y)
        }
    }

    pub fn route(
        &mut self,
        container: &ContainerRect,
        tool: &ToolState,
        event: &PointerEvent,
    ) -> Option<RouterAction> {
        match event.phase {
            PointerPhase::Down => self.route_down(container, tool, event),
            PointerPhase::Move => self.route_move(container, tool, event),
            PointerPhase::Up | PointerPhase::Cancel => self.route_up(event),
        }
    }

    fn route_down(
        &mut self,
        container: &ContainerRect,
        tool: &ToolState,
        event: &PointerEvent,
    ) -> Option<RouterAction> {
        if self.active_pointer.is_some() {
            trace!("ignoring secondary pointer {}", event.pointer_id);
            return None;
        }
        self.active_pointer = Some(event.pointer_id);
        self.last_accept_ms = event.timestamp_ms;
        self.last_client = (event.client_x, event.client_y);
        let (x, y) = self.to_canvas(container, event.client_x, event.client_y);
        self.last_canvas = (x, y);
        match tool.brush {
            BrushKind::Fill => Some(RouterAction::Fill { x, y }),
            BrushKind::Pan => None,
            _ => Some(RouterAction::StrokeStart { x, y }),
        }
    }

    fn route_move(
        &mut self,
        container: &ContainerRect,
        tool: &ToolState,
        event: &PointerEvent,
    ) -> Option<RouterAction> {
        if self.active_pointer != Some(event.pointer_id) {
            return None;
        }
        let elapsed = event.timestamp_ms.saturating_sub(self.last_accept_ms);
        if elapsed < self.throttle_ms {
            return None;
        }
        let dx = event.client_x - self.last_client.0;
        let dy = event.client_y - self.last_client.1;
        if (dx * dx + dy * dy).sqrt() < self.min_distance {
            return None;
        }
        self.last_accept_ms = event.timestamp_ms;
        self.last_client = (event.client_x, event.client_y);

        match tool.brush {
            BrushKind::Pan => Some(RouterAction::PanBy { dx, dy }),
            BrushKind::Fill => None,
            _ => {
                let from = self.last_canvas;
                let to = self.to_canvas(container, event.client_x, event.client_y);
                self.last_canvas = to;
                Some(RouterAction::StrokeMove { from, to })
            }
        }
    }

    fn route_up(&mut self, event: &PointerEvent) -> Option<RouterAction> {
        if self.active_pointer != Some(event.pointer_id) {
            return None;
        }
        self.active_pointer = None;
        Some(RouterAction::StrokeEnd)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings::new(CanvasSize::new(100, 50))
    }

    fn container() -> ContainerRect {
        ContainerRect {
            left: 10.0,
            top: 20.0,
            width: 200.0,
            height: 100.0,
        }
    }

    fn event(id: u32, phase: PointerPhase, x: f64, y: f64, ts: u64) -> PointerEvent {
        PointerEvent {
            pointer_id: id,
            phase,
            client_x: x,
            client_y: y,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn converts_container_coordinates_to_canvas() {
        let router = InputRouter::new(&settings(), false);
        // center of the container maps to the canvas center
        assert_eq!(router.to_canvas(&container(), 110.0, 70.0), (50, 25));
        assert_eq!(router.to_canvas(&container(), 10.0, 20.0), (0, 0));
        // outside the container clamps to the edge
        assert_eq!(router.to_canvas(&container(), 500.0, 500.0), (99, 49));
    }

    #[test]
    fn horizontal_flip_mirrors_x() {
        let router = InputRouter::new(&settings(), true);
        assert_eq!(router.to_canvas(&container(), 10.0, 20.0), (99, 0));
    }

    #[test]
    fn move_throttling_by_time_and_distance() {
        let mut router = InputRouter::new(&settings(), false);
        let tool = ToolState::default();
        let c = container();
        assert!(
            router
                .route(&c, &tool, &event(1, PointerPhase::Down, 50.0, 50.0, 0))
                .is_some()
        );
        // too soon
        assert!(
            router
                .route(&c, &tool, &event(1, PointerPhase::Move, 80.0, 50.0, 5))
                .is_none()
        );
        // late enough but barely moved
        assert!(
            router
                .route(&c, &tool, &event(1, PointerPhase::Move, 50.9, 50.0, 20))
                .is_none()
        );
        // accepted
        let action = router
            .route(&c, &tool, &event(1, PointerPhase::Move, 80.0, 50.0, 40))
            .unwrap();
        assert!(matches!(action, RouterAction::StrokeMove { .. }));
    }

    #[test]
    fn only_one_pointer_is_active() {
        let mut router = InputRouter::new(&settings(), false);
        let tool = ToolState::default();
        let c = container();
        assert!(
            router
                .route(&c, &tool, &event(1, PointerPhase::Down, 50.0, 50.0, 0))
                .is_some()
        );
        // a second touch is ignored entirely
        assert!(
            router
                .route(&c, &tool, &event(2, PointerPhase::Down, 60.0, 60.0, 1))
                .is_none()
        );
        assert!(
            router
                .route(&c, &tool, &event(2, PointerPhase::Up, 60.0, 60.0, 2))
                .is_none()
        );
        // the first pointer still ends its stroke
        assert_eq!(
            router.route(&c, &tool, &event(1, PointerPhase::Up, 50.0, 50.0, 3)),
            Some(RouterAction::StrokeEnd)
        );
        assert!(!router.is_pointer_down());
    }

    #[test]
    fn fill_tool_emits_single_operation() {
        let mut router = InputRouter::new(&settings(), false);
        let tool = ToolState {
            brush: BrushKind::Fill,
            ..ToolState::default()
        };
        let c = container();
        let action = router
            .route(&c, &tool, &event(1, PointerPhase::Down, 110.0, 70.0, 0))
            .unwrap();
        assert_eq!(action, RouterAction::Fill { x: 50, y: 25 });
        assert!(
            router
                .route(&c, &tool, &event(1, PointerPhase::Move, 150.0, 70.0, 50))
                .is_none()
        );
    }

    #[test]
    fn pan_tool_never_writes_pixels() {
        let mut router = InputRouter::new(&settings(), false);
        let tool = ToolState {
            brush: BrushKind::Pan,
            ..ToolState::default()
        };
        let c = container();
        assert!(
            router
                .route(&c, &tool, &event(1, PointerPhase::Down, 50.0, 50.0, 0))
                .is_none()
        );
        let action = router
            .route(&c, &tool, &event(1, PointerPhase::Move, 70.0, 55.0, 20))
            .unwrap();
        assert_eq!(action, RouterAction::PanBy { dx: 20.0, dy: 5.0 });
    }
}
