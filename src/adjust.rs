//! Non-destructive single-image adjustment and crop engine.
//!
//! Operates on one source bitmap plus a viewfinder whose aspect ratio can
//! differ from the source's native ratio.  The adjustment record (color
//! filters, rotation, zoom, pan) lives outside the layer model and has no
//! history stack; it resets to neutral on apply or cancel.
//!
//! Output resolution follows the *source*: width is the source's native
//! width, height derives from the crop ratio.  Pan is recorded in on-screen
//! viewport pixels and rescaled by `output_width / viewport_width` before
//! baking, so the export matches the live preview regardless of zoom level.
//!
//! Color filters use multiplicative percentage semantics (100 = neutral)
//! and apply in the fixed order brightness → contrast → saturation, with
//! per-stage clamping.

use egui::Vec2;
use image::RgbaImage;
use rayon::prelude::*;

use crate::compositor::sample_bilinear;
use crate::error::FlattenError;

pub const ADJUST_PERCENT_MIN: f32 = 0.0;
pub const ADJUST_PERCENT_MAX: f32 = 200.0;
pub const ZOOM_MIN: f32 = 0.1;
pub const ZOOM_MAX: f32 = 10.0;

/// Keyboard nudge steps: arrows pan, +/- zoom.
pub const PAN_KEY_STEP: f32 = 10.0;
pub const ZOOM_KEY_STEP: f32 = 0.1;

/// Magnifier zoom levels for the point-click zoom tool.
pub const MACRO_ZOOM_MIN: f32 = 1.5;
pub const MACRO_ZOOM_MAX: f32 = 10.0;
pub const MACRO_ZOOM_DEFAULT: f32 = 3.0;

/// Rec. 709 luminance weights, used by the saturation filter.
const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

// ============================================================================
// ADJUSTMENT STATE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Adjustments {
    /// Percent, 100 = neutral.
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// Degrees.
    pub rotation: f32,
    /// Zoom factor, clamped to [`ZOOM_MIN`]..=[`ZOOM_MAX`].
    pub scale: f32,
    /// Offset in on-screen viewport pixels.
    pub pan: Vec2,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            rotation: 0.0,
            scale: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl Adjustments {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.clamp(ZOOM_MIN, ZOOM_MAX);
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan += Vec2::new(dx, dy);
    }

    /// Quarter-turn step used by the rotate buttons.
    pub fn rotate_quarter(&mut self, clockwise: bool) {
        self.rotation += if clockwise { 90.0 } else { -90.0 };
    }

    /// Reset the viewfinder to the unzoomed, centered fit.  Color filters
    /// and rotation are untouched.
    pub fn reset_view(&mut self) {
        self.scale = 1.0;
        self.pan = Vec2::ZERO;
    }

    /// Point-click zoom: change scale to `target_scale` while keeping the
    /// content point currently under `click_offset` (viewport pixels
    /// relative to the viewport center) exactly there.  Slider-driven scale
    /// changes bypass this and leave pan untouched.
    pub fn zoom_to_point(&mut self, click_offset: Vec2, target_scale: f32) {
        let old = self.scale;
        self.set_scale(target_scale);
        if old <= 0.0 {
            return;
        }
        let ratio = self.scale / old;
        self.pan = click_offset - (click_offset - self.pan) * ratio;
    }

    /// Brightness → contrast → saturation on one RGB triple (0..=255
    /// scale), clamping after each stage.
    pub fn apply_color(&self, rgb: [f32; 3]) -> [f32; 3] {
        let b = self.brightness / 100.0;
        let c = self.contrast / 100.0;
        let s = self.saturation / 100.0;

        let mut out = rgb.map(|v| (v * b).clamp(0.0, 255.0));
        out = out.map(|v| ((v - 127.5) * c + 127.5).clamp(0.0, 255.0));
        let luma = out[0] * LUMA_R + out[1] * LUMA_G + out[2] * LUMA_B;
        out.map(|v| (luma + (v - luma) * s).clamp(0.0, 255.0))
    }
}

// ============================================================================
// FLATTEN
// ============================================================================

/// Render the adjusted, cropped view of `source` into a fresh raster.
///
/// Both "apply" and "download" call this same routine so they can never
/// diverge.  `crop_ratio` is output width / height; `viewport_w` is the
/// on-screen preview width the pan was recorded against.
pub fn render_adjusted(
    source: &RgbaImage,
    adjustments: &Adjustments,
    crop_ratio: f32,
    viewport_w: f32,
    background: [u8; 4],
) -> Result<RgbaImage, FlattenError> {
    let out_w = source.width();
    if out_w == 0 || crop_ratio <= 0.0 {
        return Err(FlattenError::EmptyOutput {
            width: out_w,
            height: 0,
        });
    }
    let out_h = (out_w as f32 / crop_ratio).round().max(1.0) as u32;
    if viewport_w <= 0.0 {
        return Err(FlattenError::BadRaster);
    }

    // Pan recorded in screen pixels, rescaled to output resolution.
    let resolution_scale = out_w as f32 / viewport_w;
    let pan = adjustments.pan * resolution_scale;

    let center_x = out_w as f32 / 2.0 + pan.x;
    let center_y = out_h as f32 / 2.0 + pan.y;
    let src_cx = source.width() as f32 / 2.0;
    let src_cy = source.height() as f32 / 2.0;
    let theta = adjustments.rotation.to_radians();
    let (sin, cos) = theta.sin_cos();
    let scale = adjustments.scale.max(ZOOM_MIN);

    let mut out = RgbaImage::new(out_w, out_h);
    let row_len = out_w as usize * 4;
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = y as f32 + 0.5 - center_y;
            for x in 0..out_w as usize {
                let dx = x as f32 + 0.5 - center_x;
                // Inverse of translate → rotate → scale.
                let rx = dx * cos + dy * sin;
                let ry = -dx * sin + dy * cos;
                let lx = rx / scale + src_cx;
                let ly = ry / scale + src_cy;

                let px = &mut row[x * 4..x * 4 + 4];
                match sample_bilinear(source, lx - 0.5, ly - 0.5) {
                    Some([r, g, b, a]) => {
                        let [r, g, b] = adjustments.apply_color([r, g, b]);
                        // Composite over the solid background.
                        let bg = background.map(|v| v as f32);
                        px[0] = (r * a + bg[0] * (1.0 - a)).round() as u8;
                        px[1] = (g * a + bg[1] * (1.0 - a)).round() as u8;
                        px[2] = (b * a + bg[2] * (1.0 - a)).round() as u8;
                        px[3] = 255;
                    }
                    None => {
                        px.copy_from_slice(&background);
                    }
                }
            }
        });
    Ok(out)
}
