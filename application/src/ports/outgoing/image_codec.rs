use std::sync::Arc;

use domain::coords::CanvasSize;

use crate::error::AppResult;

/// PNG codec for layer snapshots: straight alpha, 8 bits per channel.
/// Snapshots are decoded to RGBA and re-encoded on send, so byte-identical
/// PNGs across clients are explicitly not promised.
pub trait ImageCodecPort: Send + Sync {
    fn encode_png(&self, size: CanvasSize, rgba: &[u8]) -> AppResult<Vec<u8>>;
    fn decode_png(&self, png: &[u8]) -> AppResult<(CanvasSize, Vec<u8>)>;
}

pub type DynImageCodecPort = Arc<dyn ImageCodecPort>;
