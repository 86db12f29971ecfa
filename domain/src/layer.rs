use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::color::Rgba;
use crate::coords::{CanvasSize, Rect};
use crate::error::{DomainError, DomainResult};

pub const BYTES_PER_PIXEL: usize = 4;

/// Which of a participant's two layers an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Background,
    Foreground,
}

impl LayerKind {
    pub const ALL: [Self; 2] = [Self::Background, Self::Foreground];

    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::Foreground => 1,
        }
    }

    pub fn from_wire(byte: u8) -> DomainResult<Self> {
        match byte {
            0 => Ok(Self::Background),
            1 => Ok(Self::Foreground),
            other => Err(DomainError::InvalidCoordinates(format!(
                "Unknown layer byte {other}"
            ))),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => write!(f, "bg"),
            Self::Foreground => write!(f, "fg"),
        }
    }
}

/// A flat `W x H` straight-alpha RGBA raster, initially fully transparent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    size: CanvasSize,
    pixels: Vec<u8>,
}

impl Layer {
    #[must_use]
    pub fn new(size: CanvasSize) -> Self {
        Self {
            size,
            pixels: vec![0; size.pixel_count() * BYTES_PER_PIXEL],
        }
    }

    /// Wraps a pooled buffer; the buffer arrives cleared from the pool.
    #[must_use]
    pub fn from_pooled(size: CanvasSize, pixels: Vec<u8>) -> Self {
        Self { size, pixels }
    }

    #[must_use]
    pub fn size(&self) -> CanvasSize {
        self.size
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    fn offset(&self, x: u16, y: u16) -> Option<usize> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        Some((usize::from(y) * usize::from(self.size.width) + usize::from(x)) * BYTES_PER_PIXEL)
    }

    #[must_use]
    pub fn pixel(&self, x: u16, y: u16) -> Rgba {
        self.offset(x, y)
            .and_then(|i| self.pixels.get(i..i + BYTES_PER_PIXEL))
            .map_or(Rgba::TRANSPARENT, |px| {
                Rgba::new(
                    px.first().copied().unwrap_or(0),
                    px.get(1).copied().unwrap_or(0),
                    px.get(2).copied().unwrap_or(0),
                    px.get(3).copied().unwrap_or(0),
                )
            })
    }

    pub fn set_pixel(&mut self, x: u16, y: u16, color: Rgba) {
        let Some(i) = self.offset(x, y) else {
            return;
        };
        if let Some(px) = self.pixels.get_mut(i..i + BYTES_PER_PIXEL) {
            px.copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Overwrites this layer's contents from another raster of identical
    /// dimensions.
    pub fn copy_from(&mut self, other: &Self) -> DomainResult<()> {
        self.copy_from_bytes(&other.pixels)
    }

    pub fn copy_from_bytes(&mut self, bytes: &[u8]) -> DomainResult<()> {
        if bytes.len() != self.pixels.len() {
            return Err(DomainError::LayerSizeMismatch(format!(
                "Expected {} bytes, got {}",
                self.pixels.len(),
                bytes.len()
            )));
        }
        self.pixels.copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the rect's rows out into a contiguous buffer, used by the
    /// reconciler for selective-rollback read-backs.
    #[must_use]
    pub fn read_rect(&self, rect: Rect) -> Vec<u8> {
        let rect = rect.clamp_to(self.size);
        let row_bytes = rect.width() as usize * BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(rect.height() as usize * row_bytes);
        for y in rect.top..rect.bottom {
            let row = self
                .offset(rect.left as u16, y as u16)
                .and_then(|start| self.pixels.get(start..start + row_bytes));
            if let Some(row) = row {
                out.extend_from_slice(row);
            }
        }
        out
    }

    /// Writes back a buffer captured by `read_rect` over the same rect.
    pub fn write_rect(&mut self, rect: Rect, bytes: &[u8]) -> DomainResult<()> {
        let rect = rect.clamp_to(self.size);
        let row_bytes = rect.width() as usize * BYTES_PER_PIXEL;
        if bytes.len() != rect.height() as usize * row_bytes {
            return Err(DomainError::LayerSizeMismatch(format!(
                "Rect {rect} expects {} bytes, got {}",
                rect.height() as usize * row_bytes,
                bytes.len()
            )));
        }
        for (row_idx, y) in (rect.top..rect.bottom).enumerate() {
            let src = bytes.get(row_idx * row_bytes..(row_idx + 1) * row_bytes);
            let dst = self
                .offset(rect.left as u16, y as u16)
                .and_then(|start| self.pixels.get_mut(start..start + row_bytes));
            if let (Some(src), Some(dst)) = (src, dst) {
                dst.copy_from_slice(src);
            }
        }
        Ok(())
    }
}

/// The (background, foreground) raster duo every participant owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPair {
    pub background: Layer,
    pub foreground: Layer,
}

impl LayerPair {
    #[must_use]
    pub fn new(size: CanvasSize) -> Self {
        Self {
            background: Layer::new(size),
            foreground: Layer::new(size),
        }
    }

    #[must_use]
    pub fn layer(&self, kind: LayerKind) -> &Layer {
        match kind {
            LayerKind::Background => &self.background,
            LayerKind::Foreground => &self.foreground,
        }
    }

    pub fn layer_mut(&mut self, kind: LayerKind) -> &mut Layer {
        match kind {
            LayerKind::Background => &mut self.background,
            LayerKind::Foreground => &mut self.foreground,
        }
    }

    pub fn clear(&mut self) {
        self.background.clear();
        self.foreground.clear();
    }
}

/// Reusable raster buffers for history deep copies and rollback snapshots.
/// Full-layer copies are frequent (one per stroke), so exhausted pools fall
/// back to fresh allocations rather than blocking.
pub struct LayerBufferPool {
    buffers: Arc<ArrayQueue<Vec<u8>>>,
    buffer_len: usize,
}

impl LayerBufferPool {
    #[must_use]
    pub fn new(size: CanvasSize, max_pooled_buffers: usize) -> Self {
        Self {
            buffers: Arc::new(ArrayQueue::new(max_pooled_buffers.max(1))),
            buffer_len: size.pixel_count() * BYTES_PER_PIXEL,
        }
    }

    #[must_use]
    pub fn acquire(&self) -> Vec<u8> {
        if let Some(mut buffer) = self.buffers.pop() {
            buffer.clear();
            buffer.resize(self.buffer_len, 0);
            return buffer;
        }
        vec![0; self.buffer_len]
    }

    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.capacity() >= self.buffer_len {
            self.buffers.push(buffer).ok();
        }
    }
}
