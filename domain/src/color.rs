use serde::{Deserialize, Serialize};
use std::fmt;

/// Straight-alpha RGBA sample. Layers store these as 4 consecutive bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    #[must_use]
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }

    #[must_use]
    pub fn to_u32(&self) -> u32 {
        pack_rgba(self.r, self.g, self.b, self.a)
    }

    #[must_use]
    pub fn from_u32(rgba: u32) -> Self {
        Self {
            r: u8::try_from(rgba & 0xFF).unwrap_or(0),
            g: u8::try_from((rgba >> 8) & 0xFF).unwrap_or(0),
            b: u8::try_from((rgba >> 16) & 0xFF).unwrap_or(0),
            a: u8::try_from((rgba >> 24) & 0xFF).unwrap_or(0),
        }
    }

    #[must_use]
    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02X}{:02X}{:02X}{:02X}",
            self.r, self.g, self.b, self.a
        )
    }
}

#[inline]
#[must_use]
pub fn pack_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (u32::from(a) << 24) | (u32::from(b) << 16) | (u32::from(g) << 8) | u32::from(r)
}

/// Source-over blend with the convergence-critical rounding rule: channels
/// round toward the source (`ceil` when the source channel exceeds the
/// destination channel, `floor` otherwise) and the result alpha rounds up.
/// A zero-alpha source leaves the destination untouched.
///
/// Every client must produce bit-identical output from this function; it is
/// the reason independently accumulated layers converge.
#[must_use]
pub fn blend_pixel(dst: Rgba, src: Rgba) -> Rgba {
    if src.a == 0 {
        return dst;
    }

    let dst_alpha = f64::from(dst.a) / 255.0;
    let src_alpha = f64::from(src.a) / 255.0;
    let out_alpha = dst_alpha + src_alpha - dst_alpha * src_alpha;
    let src_weight = src_alpha.max(1.0 / 255.0);

    Rgba {
        r: blend_channel(dst.r, src.r, dst_alpha, src_weight, out_alpha),
        g: blend_channel(dst.g, src.g, dst_alpha, src_weight, out_alpha),
        b: blend_channel(dst.b, src.b, dst_alpha, src_weight, out_alpha),
        a: alpha_byte(out_alpha),
    }
}

fn blend_channel(dst_c: u8, src_c: u8, dst_alpha: f64, src_weight: f64, out_alpha: f64) -> u8 {
    let c0 = f64::from(dst_c) / 255.0;
    let c1 = f64::from(src_c) / 255.0;
    let mixed = (c1 * src_weight + c0 * dst_alpha * (1.0 - src_weight)) / out_alpha;
    let scaled = mixed * 255.0;
    let rounded = if src_c > dst_c {
        scaled.ceil()
    } else {
        scaled.floor()
    };
    rounded.clamp(0.0, 255.0) as u8
}

fn alpha_byte(out_alpha: f64) -> u8 {
    (out_alpha * 255.0).ceil().clamp(0.0, 255.0) as u8
}

/// Destination-out erase: scales the destination alpha down by the eraser
/// strength, color channels untouched. Pure integer math, floor division.
#[must_use]
pub fn erase_pixel(dst: Rgba, strength: u8) -> Rgba {
    let scaled = u16::from(dst.a) * (255 - u16::from(strength)) / 255;
    Rgba {
        a: u8::try_from(scaled).unwrap_or(0),
        ..dst
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;

    #[test]
    fn zero_alpha_source_is_a_no_op() {
        let dst = Rgba::new(12, 200, 7, 130);
        assert_eq!(blend_pixel(dst, Rgba::new(255, 255, 255, 0)), dst);
    }

    #[test]
    fn opaque_source_replaces_destination_exactly() {
        for dst in [
            Rgba::TRANSPARENT,
            Rgba::new(1, 2, 3, 4),
            Rgba::opaque(255, 255, 255),
        ] {
            let src = Rgba::opaque(90, 10, 250);
            assert_eq!(blend_pixel(dst, src), src);
        }
    }

    #[test]
    fn painting_on_transparent_keeps_source_channels() {
        let src = Rgba::new(17, 130, 200, 128);
        assert_eq!(blend_pixel(Rgba::TRANSPARENT, src), src);
    }

    #[test]
    fn alpha_accumulates_and_rounds_up() {
        let once = blend_pixel(Rgba::TRANSPARENT, Rgba::new(0, 0, 0, 128));
        let twice = blend_pixel(once, Rgba::new(0, 0, 0, 128));
        assert!(twice.a > once.a);
        assert_eq!(once.a, 128);
    }

    #[test]
    fn channel_rounding_is_biased_toward_source() {
        let dst = Rgba::new(0, 255, 100, 255);
        let src = Rgba::new(255, 0, 100, 1);
        let out = blend_pixel(dst, src);
        // r pulls up (ceil), g pulls down (floor), b is exact.
        assert!(out.r >= 1);
        assert!(out.g <= 254);
        assert_eq!(out.b, 100);
    }

    #[test]
    fn erase_scales_alpha_only() {
        let dst = Rgba::new(10, 20, 30, 200);
        let out = erase_pixel(dst, 255);
        assert_eq!(out, Rgba::new(10, 20, 30, 0));
        let half = erase_pixel(dst, 128);
        assert_eq!(half.r, 10);
        assert_eq!(half.a, 99);
    }

    #[test]
    fn pack_roundtrip() {
        let c = Rgba::new(1, 2, 3, 254);
        assert_eq!(Rgba::from_u32(c.to_u32()), c);
    }
}
