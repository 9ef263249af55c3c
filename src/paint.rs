//! Freehand paint surfaces — the inpainting mask and the pose-sketch overlay.
//!
//! The accumulated point list is the authoritative state; the bitmap is a
//! derived view, fully recomputed whenever the point list or the surface
//! pixel size changes.  Points are stored *normalized* to the surface, so a
//! stroke replayed after a container resize lands on the same fractional
//! position rather than the same absolute pixel.
//!
//! Mask strokes paint translucent white; eraser segments subtract alpha
//! (destination-out).  Sketch strokes paint an opaque pen color and have no
//! eraser.

use image::RgbaImage;

/// Alpha of mask paint (translucent white, `rgba(255,255,255,0.7)`).
pub const MASK_ALPHA: f32 = 0.7;

pub const BRUSH_SIZE_MIN: f32 = 5.0;
pub const BRUSH_SIZE_MAX: f32 = 50.0;
pub const DEFAULT_BRUSH_SIZE: f32 = 30.0;

/// Pose pen palette (green default, then red / blue / yellow / white).
pub const PEN_COLORS: [[u8; 4]; 5] = [
    [0x22, 0xc5, 0x5e, 255],
    [0xef, 0x44, 0x44, 255],
    [0x3b, 0x82, 0xf6, 255],
    [0xea, 0xb3, 0x08, 255],
    [0xff, 0xff, 0xff, 255],
];

/// How a stroke segment is composited.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StrokeStyle {
    /// Mask paint; `eraser` segments subtract instead of adding.
    Mask { eraser: bool },
    /// Sketch pen with an explicit color.
    Pen { color: [u8; 4] },
}

/// One recorded point.  `nx`/`ny` are fractions of the surface size;
/// `start` marks the beginning of a disconnected subpath so separate
/// strokes are never linked by an implicit segment.
#[derive(Clone, Copy, Debug)]
pub struct StrokePoint {
    pub nx: f32,
    pub ny: f32,
    pub brush_size: f32,
    pub start: bool,
    pub style: StrokeStyle,
}

#[derive(Clone, Default)]
pub struct PaintSurface {
    points: Vec<StrokePoint>,
}

impl PaintSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Record the first point of a new stroke.  `x`/`y` are pixels relative
    /// to the surface, `surface_w`/`surface_h` its current on-screen size.
    pub fn begin_stroke(
        &mut self,
        x: f32,
        y: f32,
        brush_size: f32,
        style: StrokeStyle,
        surface_w: f32,
        surface_h: f32,
    ) {
        self.push_point(x, y, brush_size, style, surface_w, surface_h, true);
    }

    /// Record a continuation point of the active stroke.
    pub fn extend_stroke(
        &mut self,
        x: f32,
        y: f32,
        brush_size: f32,
        style: StrokeStyle,
        surface_w: f32,
        surface_h: f32,
    ) {
        self.push_point(x, y, brush_size, style, surface_w, surface_h, false);
    }

    #[allow(clippy::too_many_arguments)]
    fn push_point(
        &mut self,
        x: f32,
        y: f32,
        brush_size: f32,
        style: StrokeStyle,
        surface_w: f32,
        surface_h: f32,
        start: bool,
    ) {
        if surface_w <= 0.0 || surface_h <= 0.0 {
            return;
        }
        self.points.push(StrokePoint {
            nx: x / surface_w,
            ny: y / surface_h,
            brush_size,
            start,
            style,
        });
    }

    /// Replay every recorded point into a fresh bitmap of the given size.
    ///
    /// Each segment begins a new path at a `start` flag; mask segments
    /// toggle between normal paint and subtractive erase based on their own
    /// style.
    pub fn render(&self, width: u32, height: u32) -> RgbaImage {
        let mut out = RgbaImage::new(width, height);
        if width == 0 || height == 0 {
            return out;
        }
        let w = width as f32;
        let h = height as f32;

        let mut prev: Option<(f32, f32)> = None;
        for point in &self.points {
            let px = point.nx * w;
            let py = point.ny * h;
            let radius = point.brush_size / 2.0;
            if point.start {
                stamp_segment(&mut out, (px, py), (px, py), radius, point.style);
            } else if let Some((ax, ay)) = prev {
                stamp_segment(&mut out, (ax, ay), (px, py), radius, point.style);
            }
            prev = Some((px, py));
        }
        out
    }
}

/// Draw one thick round-capped segment (a degenerate segment is a dot).
fn stamp_segment(
    out: &mut RgbaImage,
    a: (f32, f32),
    b: (f32, f32),
    radius: f32,
    style: StrokeStyle,
) {
    let r = radius.max(0.5);
    let (w, h) = out.dimensions();
    let min_x = ((a.0.min(b.0) - r).floor().max(0.0)) as u32;
    let min_y = ((a.1.min(b.1) - r).floor().max(0.0)) as u32;
    let max_x = ((a.0.max(b.0) + r).ceil() as i64).clamp(0, w as i64) as u32;
    let max_y = ((a.1.max(b.1) + r).ceil() as i64).clamp(0, h as i64) as u32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let d = dist_to_segment(x as f32 + 0.5, y as f32 + 0.5, a, b);
            // 1 px anti-aliased edge
            let cov = (r + 0.5 - d).clamp(0.0, 1.0);
            if cov <= 0.0 {
                continue;
            }
            let px = out.get_pixel_mut(x, y);
            match style {
                StrokeStyle::Mask { eraser: true } => {
                    // destination-out: remove alpha where the brush covers
                    px.0[3] = (px.0[3] as f32 * (1.0 - cov)).round() as u8;
                }
                StrokeStyle::Mask { eraser: false } => {
                    blend_over(px, [255, 255, 255, 255], cov * MASK_ALPHA);
                }
                StrokeStyle::Pen { color } => {
                    blend_over(px, color, cov * color[3] as f32 / 255.0);
                }
            }
        }
    }
}

/// Source-over blend of `color` at coverage `alpha` onto `dst`.
fn blend_over(dst: &mut image::Rgba<u8>, color: [u8; 4], alpha: f32) {
    let sa = alpha.clamp(0.0, 1.0);
    let da = dst.0[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        dst.0 = [0, 0, 0, 0];
        return;
    }
    for c in 0..3 {
        let sc = color[c] as f32;
        let dc = dst.0[c] as f32;
        dst.0[c] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round() as u8;
    }
    dst.0[3] = (out_a * 255.0).round() as u8;
}

fn dist_to_segment(px: f32, py: f32, a: (f32, f32), b: (f32, f32)) -> f32 {
    let (ax, ay) = a;
    let (bx, by) = b;
    let abx = bx - ax;
    let aby = by - ay;
    let len_sq = abx * abx + aby * aby;
    if len_sq <= f32::EPSILON {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    let t = (((px - ax) * abx + (py - ay) * aby) / len_sq).clamp(0.0, 1.0);
    let cx = ax + t * abx;
    let cy = ay + t * aby;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}
