//! Geometry mapper — conversions between the *logical canvas space* (the
//! fixed-resolution pixel grid of the output image) and the *visual viewport
//! space* (the on-screen, resizable stage the canvas is "contain"-fitted
//! into).
//!
//! Everything here is pure and stateless; the interaction controller and the
//! egui shell recompute a [`StageLayout`] whenever the container resizes or
//! the aspect ratio changes.

use egui::{Pos2, Vec2};

/// Base dimension of the logical canvas: the longer edge is always this many
/// pixels, the shorter edge is derived from the aspect ratio.
pub const BASE_CANVAS_DIM: u32 = 1024;

/// Padding margin (px) kept between the stage and its container on each axis.
pub const STAGE_PADDING: f32 = 64.0;

// ============================================================================
// ASPECT RATIO
// ============================================================================

/// Output aspect ratio.  `Original` carries the source image's native ratio
/// for the single-image editor's "Original" crop preset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AspectRatio {
    Square,
    Landscape4x3,
    Landscape16x9,
    Portrait3x4,
    Portrait9x16,
    Original(f32),
}

impl AspectRatio {
    /// Width / height.
    pub fn ratio(&self) -> f32 {
        match self {
            AspectRatio::Square => 1.0,
            AspectRatio::Landscape4x3 => 4.0 / 3.0,
            AspectRatio::Landscape16x9 => 16.0 / 9.0,
            AspectRatio::Portrait3x4 => 3.0 / 4.0,
            AspectRatio::Portrait9x16 => 9.0 / 16.0,
            AspectRatio::Original(r) => *r,
        }
    }

    pub fn label(&self) -> String {
        match self {
            AspectRatio::Square => "1:1".to_string(),
            AspectRatio::Landscape4x3 => "4:3".to_string(),
            AspectRatio::Landscape16x9 => "16:9".to_string(),
            AspectRatio::Portrait3x4 => "3:4".to_string(),
            AspectRatio::Portrait9x16 => "9:16".to_string(),
            AspectRatio::Original(_) => "Original".to_string(),
        }
    }

    /// The fixed presets offered in the UI (`Original` is added contextually
    /// by the single-image editor).
    pub fn presets() -> &'static [AspectRatio] {
        &[
            AspectRatio::Square,
            AspectRatio::Landscape4x3,
            AspectRatio::Landscape16x9,
            AspectRatio::Portrait3x4,
            AspectRatio::Portrait9x16,
        ]
    }

    /// Logical canvas size: the longer edge is [`BASE_CANVAS_DIM`], the other
    /// edge follows the ratio.
    pub fn canvas_size(&self) -> (u32, u32) {
        let r = self.ratio();
        if r > 1.0 {
            let w = BASE_CANVAS_DIM;
            let h = (BASE_CANVAS_DIM as f32 / r).round().max(1.0) as u32;
            (w, h)
        } else {
            let w = (BASE_CANVAS_DIM as f32 * r).round().max(1.0) as u32;
            let h = BASE_CANVAS_DIM;
            (w, h)
        }
    }
}

// ============================================================================
// STAGE LAYOUT — contain-fitted visual rectangle
// ============================================================================

/// The visual stage rectangle: the largest rectangle with the canvas aspect
/// ratio that fits the container minus [`STAGE_PADDING`], centered.
///
/// An *inactive* layout (zero visual size) is returned for degenerate
/// containers; callers skip dependent rendering until a valid layout is
/// observed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageLayout {
    pub visual_w: f32,
    pub visual_h: f32,
    pub canvas_w: u32,
    pub canvas_h: u32,
}

impl StageLayout {
    /// Compute the contain fit of `ratio` inside a `container_w × container_h`
    /// area.  Never divides by zero: degenerate inputs yield an inactive
    /// layout.
    pub fn compute(container_w: f32, container_h: f32, ratio: AspectRatio) -> Self {
        let (canvas_w, canvas_h) = ratio.canvas_size();
        let target = ratio.ratio();

        let avail_w = container_w - STAGE_PADDING;
        let avail_h = container_h - STAGE_PADDING;
        if avail_w <= 0.0 || avail_h <= 0.0 || target <= 0.0 || canvas_w == 0 {
            return Self {
                visual_w: 0.0,
                visual_h: 0.0,
                canvas_w,
                canvas_h,
            };
        }

        // Branch on the padded area's ratio; the raw container ratio can
        // disagree with it and overflow the margin.
        let avail_ratio = avail_w / avail_h;
        let (visual_w, visual_h) = if avail_ratio > target {
            // Available area wider than target — constrained by height.
            (avail_h * target, avail_h)
        } else {
            (avail_w, avail_w / target)
        };

        Self {
            visual_w,
            visual_h,
            canvas_w,
            canvas_h,
        }
    }

    /// Whether the layout has a usable on-screen size.
    pub fn is_active(&self) -> bool {
        self.visual_w > 0.0 && self.visual_h > 0.0 && self.canvas_w > 0
    }

    /// Visual pixels per logical canvas pixel.  Zero for inactive layouts.
    pub fn visual_scale(&self) -> f32 {
        if !self.is_active() {
            return 0.0;
        }
        self.visual_w / self.canvas_w as f32
    }

    /// Convert a screen-space pointer delta into a logical canvas delta.
    /// Returns `None` while the layout is inactive.
    pub fn screen_delta_to_canvas(&self, delta: Vec2) -> Option<Vec2> {
        let s = self.visual_scale();
        if s <= 0.0 {
            return None;
        }
        Some(delta / s)
    }

    /// Convert a position relative to the stage's top-left corner (visual px)
    /// into logical canvas coordinates.
    pub fn screen_to_canvas(&self, pos: Pos2) -> Option<Pos2> {
        let s = self.visual_scale();
        if s <= 0.0 {
            return None;
        }
        Some(Pos2::new(pos.x / s, pos.y / s))
    }
}
