use domain::coords::CanvasSize;

/// Runtime tuning for one drawing session, assembled from the loaded
/// `Config`.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub canvas: CanvasSize,
    /// History ring depth; full layer-pair copies.
    pub history_capacity: usize,
    /// Pooled raster buffers kept for history/rollback copies.
    pub buffer_pool_max: usize,
    /// Rollback snapshot cadence: whichever of the two fires first.
    pub snapshot_interval_ops: u64,
    pub snapshot_interval_ms: u64,
    pub snapshot_retain: usize,
    /// Remote ops tolerated inside a fork before a forced full rollback.
    pub max_fallbehind: u32,
    pub coalesce_window_ms: u64,
    pub coalesce_distance_px: u16,
    /// Pointer-move throttling.
    pub move_throttle_ms: u64,
    pub move_min_distance: f64,
    pub catchup_quiet_ms: u64,
    /// Rolling conflict-outcome window driving the adaptive strategy.
    pub strategy_window: usize,
    pub conflict_rate_timestamp: f64,
    pub conflict_rate_selective: f64,
    pub heatmap_cell_px: u16,
    pub rect_cache_entries: usize,
    pub max_chat_bytes: usize,
}

impl SessionSettings {
    #[must_use]
    pub fn new(canvas: CanvasSize) -> Self {
        Self {
            canvas,
            history_capacity: 30,
            buffer_pool_max: 8,
            snapshot_interval_ops: 50,
            snapshot_interval_ms: 5000,
            snapshot_retain: 5,
            max_fallbehind: 100,
            coalesce_window_ms: 50,
            coalesce_distance_px: 5,
            move_throttle_ms: 12,
            move_min_distance: 1.5,
            catchup_quiet_ms: 1000,
            strategy_window: 20,
            conflict_rate_timestamp: 0.6,
            conflict_rate_selective: 0.3,
            heatmap_cell_px: 50,
            rect_cache_entries: 1000,
            max_chat_bytes: 500,
        }
    }
}
