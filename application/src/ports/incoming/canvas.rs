use crate::contracts::input::{ContainerRect, PointerEvent, ToolState};
use crate::error::AppResult;

/// Driving side of the canvas: pointer input, tool selection, and the
/// undo/redo pair. All methods are synchronous; the caller serializes them
/// with inbound-frame handling on a single task.
pub trait CanvasInputUseCase {
    fn handle_pointer(&mut self, container: ContainerRect, event: PointerEvent) -> AppResult<()>;

    fn set_tool(&mut self, tool: ToolState);

    fn set_zoom(&mut self, zoom: f64, focus_x: f64, focus_y: f64) -> AppResult<()>;

    /// Returns whether a state was restored.
    fn undo(&mut self) -> AppResult<bool>;

    fn redo(&mut self) -> AppResult<bool>;
}

pub trait ChatUseCase {
    fn send_chat(&mut self, message: &str, now_ms: u64) -> AppResult<()>;
}
