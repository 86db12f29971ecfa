use crate::contracts::wire::InboundFrame;
use crate::error::AppResult;

/// Session lifecycle as driven by the transport adapter's run loop.
pub trait SessionInboundUseCase {
    /// Socket opened: send the join frame and enter catch-up.
    fn handle_open(&mut self, now_ms: u64) -> AppResult<()>;

    fn handle_frame(&mut self, frame: InboundFrame, now_ms: u64) -> AppResult<()>;

    /// Periodic tick driving the catch-up quiet timer and the rollback
    /// snapshot cadence.
    fn handle_quiet_tick(&mut self, now_ms: u64) -> AppResult<()>;

    fn handle_close(&mut self, reason: &str) -> AppResult<()>;
}
