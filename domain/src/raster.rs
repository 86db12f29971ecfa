use crate::brush::{BrushTable, tone_level};
use crate::color::{Rgba, blend_pixel, erase_pixel};
use crate::coords::Rect;
use crate::error::DomainResult;
use crate::layer::Layer;
use crate::op::BrushKind;

/// How a primitive writes pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintMode {
    /// Straight-alpha blend at the operation's opacity. Used for remote
    /// operations, replays, and fills.
    Direct,
    /// Coverage-only write (RGB at alpha 255) into a stroke buffer; the
    /// buffer is blitted once with the stroke's opacity on commit.
    MaskOnly,
}

/// Draws a Bresenham line of disc dabs. The whole call accumulates one
/// union coverage mask and blends each covered pixel exactly once, so a
/// segment never compounds with itself. Identical endpoints degenerate to
/// a single dab.
#[allow(clippy::too_many_arguments)]
pub fn draw_line(
    layer: &mut Layer,
    table: &BrushTable,
    from: (u16, u16),
    to: (u16, u16),
    size: u8,
    brush: BrushKind,
    color: Rgba,
    mode: PaintMode,
) -> DomainResult<Rect> {
    if !brush.paints() {
        return Ok(Rect::EMPTY);
    }
    let mask = table.mask(usize::from(size))?;
    let canvas = layer.size();

    let bbox = Rect::spanning(
        i32::from(from.0),
        i32::from(from.1),
        i32::from(to.0),
        i32::from(to.1),
    )
    .expand(i32::from(size))
    .clamp_to(canvas);
    if bbox.is_empty() {
        return Ok(Rect::EMPTY);
    }

    let cov_w = bbox.width() as usize;
    let mut coverage = vec![false; cov_w * bbox.height() as usize];
    let mut painted = Rect::EMPTY;

    let mut stamp = |cx: i32, cy: i32| {
        let half = i32::from(size) / 2;
        let s = i32::from(size);
        for my in 0..s {
            for mx in 0..s {
                let on = mask
                    .get((my * s + mx) as usize)
                    .copied()
                    .unwrap_or(false);
                if !on {
                    continue;
                }
                let px = cx - half + mx;
                let py = cy - half + my;
                if px < bbox.left || px >= bbox.right || py < bbox.top || py >= bbox.bottom {
                    continue;
                }
                let idx = (py - bbox.top) as usize * cov_w + (px - bbox.left) as usize;
                if let Some(cell) = coverage.get_mut(idx) {
                    *cell = true;
                }
            }
        }
    };

    bresenham(
        i32::from(from.0),
        i32::from(from.1),
        i32::from(to.0),
        i32::from(to.1),
        &mut stamp,
    );

    let level = tone_level(color.a);
    for (idx, _) in coverage.iter().enumerate().filter(|(_, on)| **on) {
        let x = bbox.left + (idx % cov_w) as i32;
        let y = bbox.top + (idx / cov_w) as i32;
        let (px, py) = (x as u16, y as u16);
        if brush == BrushKind::Halftone && !table.tone_sample(level, px, py) {
            continue;
        }
        paint_pixel(layer, px, py, brush, color, mode);
        painted = painted.union(&Rect::new(x, y, x + 1, y + 1));
    }

    Ok(painted)
}

/// A single dab.
pub fn draw_point(
    layer: &mut Layer,
    table: &BrushTable,
    at: (u16, u16),
    size: u8,
    brush: BrushKind,
    color: Rgba,
    mode: PaintMode,
) -> DomainResult<Rect> {
    draw_line(layer, table, at, at, size, brush, color, mode)
}

/// Four-connected scanline flood fill from `(x, y)`, matching exactly the
/// 4-byte tuple under the seed pixel. The matched set is collected first
/// and blended afterwards, so the fill color can never re-match itself.
pub fn flood_fill(layer: &mut Layer, x: u16, y: u16, color: Rgba) -> DomainResult<Rect> {
    let canvas = layer.size();
    if !canvas.contains(i32::from(x), i32::from(y)) {
        return Ok(Rect::EMPTY);
    }

    let target = layer.pixel(x, y);
    let width = usize::from(canvas.width);
    let height = usize::from(canvas.height);
    let mut member = vec![false; width * height];
    let mut spans = vec![(x, y)];
    let mut painted = Rect::EMPTY;

    let matches = |layer: &Layer, member: &[bool], px: u16, py: u16| {
        let idx = usize::from(py) * width + usize::from(px);
        !member.get(idx).copied().unwrap_or(true) && layer.pixel(px, py) == target
    };

    while let Some((sx, sy)) = spans.pop() {
        if !matches(layer, &member, sx, sy) {
            continue;
        }
        let mut x0 = sx;
        while x0 > 0 && matches(layer, &member, x0 - 1, sy) {
            x0 -= 1;
        }
        let mut x1 = sx;
        while usize::from(x1) + 1 < width && matches(layer, &member, x1 + 1, sy) {
            x1 += 1;
        }
        for px in x0..=x1 {
            if let Some(cell) = member.get_mut(usize::from(sy) * width + usize::from(px)) {
                *cell = true;
            }
            if sy > 0 && matches(layer, &member, px, sy - 1) {
                spans.push((px, sy - 1));
            }
            if usize::from(sy) + 1 < height && matches(layer, &member, px, sy + 1) {
                spans.push((px, sy + 1));
            }
        }
        painted = painted.union(&Rect::new(
            i32::from(x0),
            i32::from(sy),
            i32::from(x1) + 1,
            i32::from(sy) + 1,
        ));
    }

    for (idx, _) in member.iter().enumerate().filter(|(_, on)| **on) {
        let px = (idx % width) as u16;
        let py = (idx / width) as u16;
        let blended = blend_pixel(layer.pixel(px, py), color);
        layer.set_pixel(px, py, blended);
    }

    Ok(painted)
}

fn paint_pixel(layer: &mut Layer, x: u16, y: u16, brush: BrushKind, color: Rgba, mode: PaintMode) {
    match mode {
        PaintMode::MaskOnly => {
            layer.set_pixel(x, y, Rgba::opaque(color.r, color.g, color.b));
        }
        PaintMode::Direct => {
            let dst = layer.pixel(x, y);
            let out = match brush {
                BrushKind::Eraser => erase_pixel(dst, color.a),
                // halftone encodes opacity as pattern density; selected
                // cells land at full coverage
                BrushKind::Halftone => blend_pixel(dst, Rgba::opaque(color.r, color.g, color.b)),
                _ => blend_pixel(dst, color),
            };
            layer.set_pixel(x, y, out);
        }
    }
}

fn bresenham(x0: i32, y0: i32, x1: i32, y1: i32, plot: &mut impl FnMut(i32, i32)) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);
    loop {
        plot(x, y);
        if x == x1 && y == y1 {
            break;
        }
        let doubled = 2 * err;
        if doubled >= dy {
            err += dy;
            x += sx;
        }
        if doubled <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use crate::coords::CanvasSize;

    fn setup() -> (Layer, BrushTable) {
        (Layer::new(CanvasSize::new(100, 50)), BrushTable::new())
    }

    #[test]
    fn single_dab_paints_plus_shape_at_op_alpha() {
        let (mut layer, table) = setup();
        let color = Rgba::new(255, 0, 0, 128);
        draw_point(
            &mut layer,
            &table,
            (10, 10),
            3,
            BrushKind::Solid,
            color,
            PaintMode::Direct,
        )
        .unwrap();
        assert_eq!(layer.pixel(10, 10), color);
        assert_eq!(layer.pixel(9, 10), color);
        assert_eq!(layer.pixel(10, 9), color);
        // cleared corners stay transparent
        assert_eq!(layer.pixel(9, 9), Rgba::TRANSPARENT);
        assert_eq!(layer.pixel(11, 11), Rgba::TRANSPARENT);
    }

    #[test]
    fn line_does_not_compound_within_one_call() {
        let (mut layer, table) = setup();
        let color = Rgba::new(0, 0, 255, 128);
        // heavy overlap between consecutive dabs; a compounding
        // implementation would darken interior pixels past alpha 128
        draw_line(
            &mut layer,
            &table,
            (10, 10),
            (20, 10),
            5,
            BrushKind::Solid,
            color,
            PaintMode::Direct,
        )
        .unwrap();
        assert_eq!(layer.pixel(15, 10).a, 128);
        assert_eq!(layer.pixel(12, 10).a, 128);
    }

    #[test]
    fn degenerate_line_equals_point() {
        let (mut a, table) = setup();
        let (mut b, _) = setup();
        let color = Rgba::new(3, 7, 9, 200);
        draw_line(
            &mut a,
            &table,
            (30, 20),
            (30, 20),
            7,
            BrushKind::Solid,
            color,
            PaintMode::Direct,
        )
        .unwrap();
        draw_point(
            &mut b,
            &table,
            (30, 20),
            7,
            BrushKind::Solid,
            color,
            PaintMode::Direct,
        )
        .unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn halftone_dabs_tile_without_seams() {
        let (mut layer, table) = setup();
        let color = Rgba::new(0, 0, 0, 255);
        draw_point(
            &mut layer,
            &table,
            (8, 8),
            8,
            BrushKind::Halftone,
            color,
            PaintMode::Direct,
        )
        .unwrap();
        draw_point(
            &mut layer,
            &table,
            (12, 8),
            8,
            BrushKind::Halftone,
            color,
            PaintMode::Direct,
        )
        .unwrap();
        // every painted pixel agrees with the global pattern, including
        // the overlap column at x=12
        let level = tone_level(255);
        for y in 5..12u16 {
            for x in 5..17u16 {
                let px = layer.pixel(x, y);
                if !px.is_transparent() {
                    assert!(table.tone_sample(level, x, y), "seam at ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn mask_mode_writes_full_alpha() {
        let (mut layer, table) = setup();
        let color = Rgba::new(10, 20, 30, 77);
        draw_point(
            &mut layer,
            &table,
            (10, 10),
            1,
            BrushKind::Solid,
            color,
            PaintMode::MaskOnly,
        )
        .unwrap();
        assert_eq!(layer.pixel(10, 10), Rgba::opaque(10, 20, 30));
    }

    #[test]
    fn eraser_reduces_alpha() {
        let (mut layer, table) = setup();
        layer.set_pixel(10, 10, Rgba::opaque(5, 5, 5));
        draw_point(
            &mut layer,
            &table,
            (10, 10),
            1,
            BrushKind::Eraser,
            Rgba::new(0, 0, 0, 255),
            PaintMode::Direct,
        )
        .unwrap();
        assert_eq!(layer.pixel(10, 10).a, 0);
    }

    #[test]
    fn pan_and_fill_selectors_paint_nothing() {
        let (mut layer, table) = setup();
        for brush in [BrushKind::Pan, BrushKind::Fill] {
            let rect = draw_point(
                &mut layer,
                &table,
                (10, 10),
                5,
                brush,
                Rgba::opaque(1, 1, 1),
                PaintMode::Direct,
            )
            .unwrap();
            assert!(rect.is_empty());
        }
        assert!(layer.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn flood_fill_stays_inside_boundary() {
        let mut layer = Layer::new(CanvasSize::new(100, 50));
        // a 1px box from (5,5) to (15,15)
        let wall = Rgba::opaque(0, 0, 0);
        for i in 5..=15u16 {
            layer.set_pixel(i, 5, wall);
            layer.set_pixel(i, 15, wall);
            layer.set_pixel(5, i, wall);
            layer.set_pixel(15, i, wall);
        }
        let fill = Rgba::opaque(200, 100, 50);
        flood_fill(&mut layer, 10, 10, fill).unwrap();
        assert_eq!(layer.pixel(10, 10), fill);
        assert_eq!(layer.pixel(6, 6), fill);
        assert_eq!(layer.pixel(14, 14), fill);
        // the wall and the outside stay untouched
        assert_eq!(layer.pixel(5, 10), wall);
        assert_eq!(layer.pixel(4, 10), Rgba::TRANSPARENT);
        assert_eq!(layer.pixel(16, 10), Rgba::TRANSPARENT);
    }

    #[test]
    fn flood_fill_blends_partial_alpha_once() {
        let mut layer = Layer::new(CanvasSize::new(100, 50));
        let fill = Rgba::new(100, 100, 100, 128);
        flood_fill(&mut layer, 0, 0, fill).unwrap();
        // the whole transparent canvas matches; each pixel blended once
        assert_eq!(layer.pixel(0, 0), fill);
        assert_eq!(layer.pixel(99, 49), fill);
    }

    #[test]
    fn identical_op_sequences_yield_identical_rasters() {
        let table = BrushTable::new();
        let ops: Vec<(u16, u16, u16, u16, u8, BrushKind, Rgba)> = vec![
            (5, 5, 40, 30, 3, BrushKind::Solid, Rgba::new(255, 0, 0, 90)),
            (40, 30, 8, 44, 7, BrushKind::Halftone, Rgba::new(0, 255, 0, 180)),
            (0, 0, 99, 49, 5, BrushKind::Solid, Rgba::new(0, 0, 255, 255)),
            (20, 20, 60, 20, 9, BrushKind::Eraser, Rgba::new(0, 0, 0, 200)),
        ];
        let mut a = Layer::new(CanvasSize::new(100, 50));
        let mut b = Layer::new(CanvasSize::new(100, 50));
        for layer in [&mut a, &mut b] {
            for &(x0, y0, x1, y1, size, brush, color) in &ops {
                draw_line(
                    layer,
                    &table,
                    (x0, y0),
                    (x1, y1),
                    size,
                    brush,
                    color,
                    PaintMode::Direct,
                )
                .unwrap();
            }
        }
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
