//! Text layer rasterization.
//!
//! Text layers are rasterized on demand into tight RGBA buffers that the
//! compositor then transforms like any image bitmap.  Fonts come from the
//! system sans-serif family via font-kit, looked up by CSS-style weight;
//! loaded fonts and glyph pixel runs are cached per rasterizer.

use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};
use image::RgbaImage;
use std::collections::HashMap;

use crate::layer::FontWeight;
use crate::log_warn;

/// Cache for rasterized glyph pixel runs, keyed by (glyph, font_size bits).
/// Values carry the pixel list plus the outline bounds origin.
type GlyphPixelCache = HashMap<(GlyphId, u32), (Vec<(u32, u32, f32)>, f32, f32)>;

/// Deterministic per-character advance used when no system font is
/// available, as a fraction of the font size.  Keeps measurement (and thus
/// hit testing) stable across machines without fonts.
const FALLBACK_ADVANCE: f32 = 0.6;
const FALLBACK_LINE_HEIGHT: f32 = 1.2;

pub struct TextRasterizer {
    fonts: HashMap<u16, Option<FontArc>>,
    glyph_cache: GlyphPixelCache,
    coverage_buf: Vec<f32>,
}

impl Default for TextRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRasterizer {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
            glyph_cache: GlyphPixelCache::new(),
            coverage_buf: Vec::new(),
        }
    }

    fn font_for(&mut self, weight: FontWeight) -> Option<FontArc> {
        let css = weight.css_value();
        self.fonts
            .entry(css)
            .or_insert_with(|| {
                let loaded = load_sans_serif(css);
                if loaded.is_none() {
                    log_warn!("no system sans-serif font for weight {}", css);
                }
                loaded
            })
            .clone()
    }

    /// Unscaled extent of a text block: widest line × line count.  Falls
    /// back to a fixed per-character advance when no font loads, so the
    /// result is always usable for hit testing.
    pub fn measure(&mut self, text: &str, font_size: f32, weight: FontWeight) -> (f32, f32) {
        let lines: Vec<&str> = text.split('\n').collect();
        match self.font_for(weight) {
            Some(font) => {
                let scaled = font.as_scaled(font_size);
                let line_height = scaled.height();
                let mut max_w = 0.0f32;
                for line in &lines {
                    let (_, w) = layout_line(&font, line, font_size);
                    max_w = max_w.max(w);
                }
                (max_w, line_height * lines.len() as f32)
            }
            None => {
                let max_chars = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
                (
                    max_chars as f32 * font_size * FALLBACK_ADVANCE,
                    lines.len() as f32 * font_size * FALLBACK_LINE_HEIGHT,
                )
            }
        }
    }

    /// Rasterize a (possibly multiline, center-aligned) text block into a
    /// tight RGBA buffer.  Returns `None` when the text has no visible
    /// glyphs or no font could be loaded.
    pub fn rasterize(
        &mut self,
        text: &str,
        font_size: f32,
        color: [u8; 4],
        weight: FontWeight,
    ) -> Option<RgbaImage> {
        let font = self.font_for(weight)?;
        let scaled = font.as_scaled(font_size);
        let ascent = scaled.ascent();
        let line_height = scaled.height();

        // Lay out every line, center-aligned around x = 0.
        let lines: Vec<&str> = text.split('\n').collect();
        let mut all_glyphs: Vec<(GlyphId, f32, f32)> = Vec::new();
        for (line_idx, line) in lines.iter().enumerate() {
            let (glyphs, total_width) = layout_line(&font, line, font_size);
            let y = ascent + line_idx as f32 * line_height;
            for (id, gx) in glyphs {
                all_glyphs.push((id, gx - total_width * 0.5, y));
            }
        }
        if all_glyphs.is_empty() {
            return None;
        }

        // Bounding box over glyph bounds.
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for &(id, gx, gy) in &all_glyphs {
            let glyph = id.with_scale_and_position(font_size, point(gx, gy));
            let b = font.glyph_bounds(&glyph);
            min_x = min_x.min(b.min.x);
            min_y = min_y.min(b.min.y);
            max_x = max_x.max(b.max.x);
            max_y = max_y.max(b.max.y);
        }
        if min_x >= max_x || min_y >= max_y {
            return None;
        }
        let pad = 2.0;
        let x0 = (min_x - pad).floor();
        let y0 = (min_y - pad).floor();
        let buf_w = ((max_x + pad).ceil() - x0).max(1.0) as u32;
        let buf_h = ((max_y + pad).ceil() - y0).max(1.0) as u32;

        let needed = buf_w as usize * buf_h as usize;
        self.coverage_buf.resize(needed, 0.0);
        self.coverage_buf[..needed].fill(0.0);

        let font_size_key = font_size.to_bits();
        for &(id, gx, gy) in &all_glyphs {
            let cache_key = (id, font_size_key);
            if !self.glyph_cache.contains_key(&cache_key) {
                let base = id.with_scale_and_position(font_size, point(0.0, 0.0));
                let mut px_list = Vec::new();
                let (bx, by) = if let Some(outlined) = font.outline_glyph(base) {
                    let b = outlined.px_bounds();
                    outlined.draw(|px, py, cov| px_list.push((px, py, cov)));
                    (b.min.x, b.min.y)
                } else {
                    (0.0, 0.0)
                };
                self.glyph_cache.insert(cache_key, (px_list, bx, by));
            }
            if let Some((pixels, base_bx, base_by)) = self.glyph_cache.get(&cache_key) {
                let off_x = *base_bx + gx.round() - x0;
                let off_y = *base_by + gy.round() - y0;
                for &(px, py, cov) in pixels.iter() {
                    let ix = (px as f32 + off_x).round() as i32;
                    let iy = (py as f32 + off_y).round() as i32;
                    if ix >= 0 && iy >= 0 && (ix as u32) < buf_w && (iy as u32) < buf_h {
                        let idx = iy as usize * buf_w as usize + ix as usize;
                        self.coverage_buf[idx] = self.coverage_buf[idx].max(cov);
                    }
                }
            }
        }

        let mut buf = vec![0u8; needed * 4];
        for i in 0..needed {
            let cov = self.coverage_buf[i];
            if cov > 0.001 {
                let idx = i * 4;
                buf[idx] = color[0];
                buf[idx + 1] = color[1];
                buf[idx + 2] = color[2];
                buf[idx + 3] = (color[3] as f32 * cov).round().min(255.0) as u8;
            }
        }
        RgbaImage::from_raw(buf_w, buf_h, buf)
    }
}

/// Lay out one line left-aligned at x = 0.  Returns glyph x positions and
/// the total advance width.
fn layout_line(font: &FontArc, text: &str, font_size: f32) -> (Vec<(GlyphId, f32)>, f32) {
    let scaled = font.as_scaled(font_size);
    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = last {
            cursor_x += scaled.kern(prev, id);
        }
        glyphs.push((id, cursor_x));
        cursor_x += scaled.h_advance(id);
        last = Some(id);
    }
    (glyphs, cursor_x)
}

/// Load the system sans-serif family at a CSS-style weight.
fn load_sans_serif(weight: u16) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::{Properties, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight(weight as f32);
    let handle = SystemSource::new()
        .select_best_match(&[FamilyName::SansSerif], &props)
        .ok()?;
    let font_data = handle.load().ok()?;
    let bytes: Vec<u8> = (*font_data.copy_font_data()?).clone();
    FontArc::try_from_vec(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_is_monotonic_in_length_and_size() {
        let mut r = TextRasterizer::new();
        let (w1, h1) = r.measure("ab", 60.0, FontWeight::Bold);
        let (w2, _) = r.measure("abcd", 60.0, FontWeight::Bold);
        let (w3, h3) = r.measure("ab", 120.0, FontWeight::Bold);
        assert!(w2 > w1);
        assert!(w3 > w1);
        assert!(h3 > h1);
    }

    #[test]
    fn measure_counts_lines() {
        let mut r = TextRasterizer::new();
        let (_, one) = r.measure("hello", 60.0, FontWeight::Normal);
        let (_, two) = r.measure("hello\nworld", 60.0, FontWeight::Normal);
        assert!((two - one * 2.0).abs() < 0.5);
    }

    #[test]
    fn rasterize_produces_colored_pixels() {
        let mut r = TextRasterizer::new();
        let Some(img) = r.rasterize("Text Layer", 60.0, [255, 0, 0, 255], FontWeight::Bold) else {
            // No system fonts in this environment; measurement fallback
            // still covers hit testing.
            return;
        };
        assert!(img.width() > 0 && img.height() > 0);
        let mut visible = 0usize;
        for p in img.pixels() {
            if p.0[3] > 0 {
                assert_eq!(p.0[0], 255);
                assert_eq!(p.0[1], 0);
                visible += 1;
            }
        }
        assert!(visible > 0);
    }

    #[test]
    fn whitespace_only_text_rasterizes_to_none() {
        let mut r = TextRasterizer::new();
        assert!(r.rasterize("", 60.0, [255; 4], FontWeight::Bold).is_none());
    }
}
