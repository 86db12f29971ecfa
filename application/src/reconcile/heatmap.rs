use domain::coords::{CanvasSize, Rect};

/// Coarse spatial activity counters (50px cells by default). An incoming
/// op landing in a hot cell preemptively flags buffered local ops as
/// likely conflicts and shrinks the coalescing window. Counters halve
/// once a second so heat reflects recent traffic.
pub struct ActivityHeatmap {
    cell_px: u16,
    cols: usize,
    rows: usize,
    counts: Vec<u32>,
    last_decay_ms: u64,
    hot_threshold: u32,
}

const DECAY_INTERVAL_MS: u64 = 1000;

impl ActivityHeatmap {
    #[must_use]
    pub fn new(canvas: CanvasSize, cell_px: u16, hot_threshold: u32) -> Self {
        let cell = usize::from(cell_px.max(1));
        let cols = usize::from(canvas.width).div_ceil(cell);
        let rows = usize::from(canvas.height).div_ceil(cell);
        Self {
            cell_px: cell_px.max(1),
            cols,
            rows,
            counts: vec![0; cols * rows],
            last_decay_ms: 0,
            hot_threshold,
        }
    }

    fn cells_of(&self, rect: &Rect) -> impl Iterator<Item = usize> {
        let cell = i32::from(self.cell_px);
        let c0 = (rect.left.max(0) / cell).min(self.cols as i32 - 1).max(0) as usize;
        let c1 = ((rect.right - 1).max(0) / cell).min(self.cols as i32 - 1).max(0) as usize;
        let r0 = (rect.top.max(0) / cell).min(self.rows as i32 - 1).max(0) as usize;
        let r1 = ((rect.bottom - 1).max(0) / cell).min(self.rows as i32 - 1).max(0) as usize;
        let cols = self.cols;
        (r0..=r1).flat_map(move |r| (c0..=c1).map(move |c| r * cols + c))
    }

    pub fn record(&mut self, rect: &Rect, now_ms: u64) {
        if rect.is_empty() {
            return;
        }
        self.maybe_decay(now_ms);
        let cells: Vec<usize> = self.cells_of(rect).collect();
        for idx in cells {
            if let Some(count) = self.counts.get_mut(idx) {
                *count = count.saturating_add(1);
            }
        }
    }

    #[must_use]
    pub fn is_hot(&self, rect: &Rect) -> bool {
        if rect.is_empty() {
            return false;
        }
        self.cells_of(rect)
            .any(|idx| self.counts.get(idx).copied().unwrap_or(0) >= self.hot_threshold)
    }

    fn maybe_decay(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_decay_ms) >= DECAY_INTERVAL_MS {
            for count in &mut self.counts {
                *count /= 2;
            }
            self.last_decay_ms = now_ms;
        }
    }
}
