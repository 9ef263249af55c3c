//! Compositor — flattens the layer stack into the output raster.
//!
//! Layers are drawn in ascending z-index order (stable on ties, so equal
//! z values keep insertion order).  Each layer's content is centered on its
//! position and mapped through translate → rotate → scale (negated x when
//! flipped) → opacity.
//!
//! All raster drawing sits behind the [`Renderer`] trait; the ordering and
//! transform-composition logic in [`flatten_into`] is pure and can be
//! exercised against a recording mock.  [`SoftwareRenderer`] is the real
//! implementation: inverse-mapped bilinear sampling with rayon-parallel
//! rows.
//!
//! The grid background is a screen-only alignment aid and is never baked:
//! flattening with it yields a transparent background.

use image::RgbaImage;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FlattenError;
use crate::layer::{Layer, LayerContent};
use crate::text::TextRasterizer;

// ============================================================================
// BACKGROUND
// ============================================================================

/// Canvas background options.  `Grid` renders as a checker pattern on
/// screen but flattens to transparency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Background {
    #[default]
    Black,
    White,
    Grid,
}

impl Background {
    pub fn label(&self) -> &'static str {
        match self {
            Background::Black => "Black",
            Background::White => "White",
            Background::Grid => "Grid",
        }
    }

    pub fn all() -> &'static [Background] {
        &[Background::Black, Background::White, Background::Grid]
    }

    /// Baked fill color, if any.
    pub fn fill(&self) -> Option<[u8; 4]> {
        match self {
            Background::Black => Some([0, 0, 0, 255]),
            Background::White => Some([255, 255, 255, 255]),
            Background::Grid => None,
        }
    }
}

// ============================================================================
// BITMAP CACHE
// ============================================================================

/// Decoded bitmaps for image layers, keyed by the layer's source reference.
/// Layers never own pixel data; the cache is the single decode point.
#[derive(Clone, Default)]
pub struct BitmapCache {
    map: HashMap<String, Arc<RgbaImage>>,
}

impl BitmapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: String, bitmap: RgbaImage) {
        self.map.insert(source, Arc::new(bitmap));
    }

    pub fn get(&self, source: &str) -> Option<&Arc<RgbaImage>> {
        self.map.get(source)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.map.contains_key(source)
    }

    /// Intrinsic (unscaled) size of a source, for hit testing.
    pub fn size_of(&self, source: &str) -> Option<(f32, f32)> {
        self.map
            .get(source)
            .map(|b| (b.width() as f32, b.height() as f32))
    }

    /// Drop cached bitmaps whose source no longer appears in `layers`.
    pub fn retain_sources(&mut self, layers: &[Layer]) {
        self.map.retain(|source, _| {
            layers.iter().any(
                |l| matches!(&l.content, LayerContent::Image { source: s } if s == source),
            )
        });
    }
}

// ============================================================================
// RENDERER SEAM
// ============================================================================

/// Minimal drawing surface the flatten logic targets.  Keeping the surface
/// behind a trait lets the ordering/transform tests run against a recorder
/// instead of a real raster.
pub trait Renderer {
    fn fill_background(&mut self, color: [u8; 4]);

    /// Draw one layer's content bitmap, centered at the layer position,
    /// with rotation, scale, flip, and opacity applied.
    fn draw_layer(&mut self, layer: &Layer, bitmap: &RgbaImage);
}

// ============================================================================
// FLATTEN
// ============================================================================

/// Flatten the layer stack into a `canvas_w × canvas_h` raster.
///
/// Fails as a whole if any image layer's bitmap is missing from the cache;
/// a partially drawn composite is never returned.  Text layers with no
/// visible glyphs are skipped.
pub fn flatten(
    layers: &[Layer],
    canvas_w: u32,
    canvas_h: u32,
    background: Background,
    cache: &BitmapCache,
    text: &mut TextRasterizer,
) -> Result<RgbaImage, FlattenError> {
    let mut renderer = SoftwareRenderer::new(canvas_w, canvas_h)?;
    flatten_into(&mut renderer, layers, background, cache, text)?;
    Ok(renderer.into_raster())
}

/// Ordering and resolution half of the flatten: resolve every layer's
/// bitmap, then emit background + draws to `renderer` in paint order.
///
/// Bitmaps are resolved up front so a missing source aborts before any
/// drawing happens.
pub fn flatten_into<R: Renderer>(
    renderer: &mut R,
    layers: &[Layer],
    background: Background,
    cache: &BitmapCache,
    text: &mut TextRasterizer,
) -> Result<(), FlattenError> {
    let mut ordered: Vec<&Layer> = layers.iter().collect();
    ordered.sort_by_key(|l| l.z_index);

    let mut resolved: Vec<(&Layer, Arc<RgbaImage>)> = Vec::with_capacity(ordered.len());
    for layer in ordered {
        match &layer.content {
            LayerContent::Image { source } => {
                let bitmap = cache
                    .get(source)
                    .ok_or_else(|| FlattenError::MissingBitmap(source.clone()))?;
                resolved.push((layer, Arc::clone(bitmap)));
            }
            LayerContent::Text {
                text: content,
                font_size,
                color,
                weight,
            } => {
                if let Some(bitmap) = text.rasterize(content, *font_size, *color, *weight) {
                    resolved.push((layer, Arc::new(bitmap)));
                }
            }
        }
    }

    if let Some(fill) = background.fill() {
        renderer.fill_background(fill);
    }
    for (layer, bitmap) in resolved {
        renderer.draw_layer(layer, &bitmap);
    }
    Ok(())
}

// ============================================================================
// SOFTWARE RENDERER
// ============================================================================

/// CPU raster target.  Starts fully transparent.
pub struct SoftwareRenderer {
    out: RgbaImage,
}

impl SoftwareRenderer {
    pub fn new(width: u32, height: u32) -> Result<Self, FlattenError> {
        if width == 0 || height == 0 {
            return Err(FlattenError::EmptyOutput { width, height });
        }
        Ok(Self {
            out: RgbaImage::new(width, height),
        })
    }

    pub fn into_raster(self) -> RgbaImage {
        self.out
    }
}

impl Renderer for SoftwareRenderer {
    fn fill_background(&mut self, color: [u8; 4]) {
        for px in self.out.pixels_mut() {
            px.0 = color;
        }
    }

    fn draw_layer(&mut self, layer: &Layer, bitmap: &RgbaImage) {
        if layer.scale <= 0.0 || layer.opacity <= 0.0 {
            return;
        }
        let (out_w, out_h) = self.out.dimensions();
        let (src_w, src_h) = (bitmap.width() as f32, bitmap.height() as f32);

        // Bounding box of the transformed content rectangle.
        let half_w = src_w * layer.scale / 2.0;
        let half_h = src_h * layer.scale / 2.0;
        let theta = layer.rotation.to_radians();
        let (sin, cos) = theta.sin_cos();
        let ext_x = half_w * cos.abs() + half_h * sin.abs();
        let ext_y = half_w * sin.abs() + half_h * cos.abs();
        let y0 = ((layer.y - ext_y).floor().max(0.0)) as usize;
        let y1 = ((layer.y + ext_y).ceil() as i64).clamp(0, out_h as i64) as usize;
        let x0 = ((layer.x - ext_x).floor().max(0.0)) as usize;
        let x1 = ((layer.x + ext_x).ceil() as i64).clamp(0, out_w as i64) as usize;
        if y0 >= y1 || x0 >= x1 {
            return;
        }

        let sx = if layer.flip_horizontal {
            -layer.scale
        } else {
            layer.scale
        };
        let opacity = layer.opacity;
        let row_len = out_w as usize * 4;

        self.out
            .par_chunks_mut(row_len)
            .enumerate()
            .skip(y0)
            .take(y1 - y0)
            .for_each(|(y, row)| {
                let dy = y as f32 + 0.5 - layer.y;
                for x in x0..x1 {
                    let dx = x as f32 + 0.5 - layer.x;
                    // Inverse transform into bitmap coordinates.
                    let rx = dx * cos + dy * sin;
                    let ry = -dx * sin + dy * cos;
                    let lx = rx / sx + src_w / 2.0;
                    let ly = ry / layer.scale + src_h / 2.0;
                    let Some([r, g, b, a]) = sample_bilinear(bitmap, lx - 0.5, ly - 0.5) else {
                        continue;
                    };
                    let sa = a * opacity;
                    if sa <= 0.0 {
                        continue;
                    }
                    let px = &mut row[x * 4..x * 4 + 4];
                    let da = px[3] as f32 / 255.0;
                    let out_a = sa + da * (1.0 - sa);
                    for c in 0..3 {
                        let sc = [r, g, b][c];
                        let dc = px[c] as f32;
                        px[c] = ((sc * sa + dc * da * (1.0 - sa)) / out_a).round() as u8;
                    }
                    px[3] = (out_a * 255.0).round() as u8;
                }
            });
    }
}

/// Bilinear sample with transparent outside the bitmap.  Returns straight
/// RGB (alpha-weighted) plus alpha in 0..=1, or `None` for fully
/// transparent results.
pub(crate) fn sample_bilinear(bitmap: &RgbaImage, x: f32, y: f32) -> Option<[f32; 4]> {
    let (w, h) = (bitmap.width() as i64, bitmap.height() as i64);
    let fx = x.floor();
    let fy = y.floor();
    let tx = x - fx;
    let ty = y - fy;
    let ix = fx as i64;
    let iy = fy as i64;

    let mut acc = [0.0f32; 3];
    let mut acc_a = 0.0f32;
    for (ox, oy, wgt) in [
        (0i64, 0i64, (1.0 - tx) * (1.0 - ty)),
        (1, 0, tx * (1.0 - ty)),
        (0, 1, (1.0 - tx) * ty),
        (1, 1, tx * ty),
    ] {
        let px = ix + ox;
        let py = iy + oy;
        if px < 0 || py < 0 || px >= w || py >= h {
            continue;
        }
        let p = bitmap.get_pixel(px as u32, py as u32).0;
        let a = p[3] as f32 / 255.0 * wgt;
        acc[0] += p[0] as f32 * a;
        acc[1] += p[1] as f32 * a;
        acc[2] += p[2] as f32 * a;
        acc_a += a;
    }
    if acc_a <= 0.0001 {
        return None;
    }
    Some([
        acc[0] / acc_a,
        acc[1] / acc_a,
        acc[2] / acc_a,
        acc_a.min(1.0),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerPatch, LayerStore};

    fn solid(w: u32, h: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba(color))
    }

    fn setup_two_overlapping() -> (LayerStore, BitmapCache) {
        let mut store = LayerStore::new();
        let mut cache = BitmapCache::new();
        cache.insert("red".into(), solid(40, 40, [255, 0, 0, 255]));
        cache.insert("blue".into(), solid(40, 40, [0, 0, 255, 255]));
        store.add_image("red".into(), 100, 100);
        store.add_image("blue".into(), 100, 100);
        (store, cache)
    }

    /// Records draw calls instead of rasterizing.
    #[derive(Default)]
    struct RecordingRenderer {
        background: Option<[u8; 4]>,
        drawn: Vec<String>,
    }

    impl Renderer for RecordingRenderer {
        fn fill_background(&mut self, color: [u8; 4]) {
            self.background = Some(color);
        }
        fn draw_layer(&mut self, layer: &Layer, _bitmap: &RgbaImage) {
            if let LayerContent::Image { source } = &layer.content {
                self.drawn.push(source.clone());
            }
        }
    }

    #[test]
    fn insertion_order_breaks_z_ties() {
        // z [1,1,2] in insertion order [A,B,C] draws A,B,C.
        let mut store = LayerStore::new();
        let mut cache = BitmapCache::new();
        for name in ["A", "B", "C"] {
            cache.insert(name.into(), solid(4, 4, [255; 4]));
        }
        let a = store.add_image("A".into(), 100, 100);
        let b = store.add_image("B".into(), 100, 100);
        let c = store.add_image("C".into(), 100, 100);
        for (id, z) in [(a, 1), (b, 1), (c, 2)] {
            store.update(
                id,
                &LayerPatch {
                    z_index: Some(z),
                    ..Default::default()
                },
            );
        }
        let mut rec = RecordingRenderer::default();
        let mut text = TextRasterizer::new();
        flatten_into(&mut rec, store.layers(), Background::Black, &cache, &mut text).unwrap();
        assert_eq!(rec.drawn, vec!["A", "B", "C"]);
        assert_eq!(rec.background, Some([0, 0, 0, 255]));
    }

    #[test]
    fn missing_bitmap_aborts_before_any_draw() {
        // One unresolvable source fails the whole
        // flatten, and nothing reaches the renderer.
        let mut store = LayerStore::new();
        let mut cache = BitmapCache::new();
        cache.insert("ok".into(), solid(4, 4, [255; 4]));
        store.add_image("ok".into(), 100, 100);
        store.add_image("ghost".into(), 100, 100);
        let mut rec = RecordingRenderer::default();
        let mut text = TextRasterizer::new();
        let err =
            flatten_into(&mut rec, store.layers(), Background::Black, &cache, &mut text)
                .unwrap_err();
        assert!(matches!(err, FlattenError::MissingBitmap(s) if s == "ghost"));
        assert!(rec.drawn.is_empty());
        assert!(rec.background.is_none());
    }

    #[test]
    fn later_layer_paints_on_top() {
        let (store, cache) = setup_two_overlapping();
        let mut text = TextRasterizer::new();
        let img = flatten(
            store.layers(),
            100,
            100,
            Background::Black,
            &cache,
            &mut text,
        )
        .unwrap();
        assert_eq!(img.get_pixel(50, 50).0, [0, 0, 255, 255]);
    }

    #[test]
    fn z_reorder_flips_paint_order() {
        // Raising the first layer's z paints it above.
        let (mut store, cache) = setup_two_overlapping();
        let first = store.layers()[0].id;
        store.bring_to_front(first);
        let mut text = TextRasterizer::new();
        let img = flatten(
            store.layers(),
            100,
            100,
            Background::Black,
            &cache,
            &mut text,
        )
        .unwrap();
        assert_eq!(img.get_pixel(50, 50).0, [255, 0, 0, 255]);
    }

    #[test]
    fn repeated_flatten_is_pixel_identical() {
        let (store, cache) = setup_two_overlapping();
        let mut text = TextRasterizer::new();
        let a = flatten(
            store.layers(),
            100,
            100,
            Background::Black,
            &cache,
            &mut text,
        )
        .unwrap();
        let b = flatten(
            store.layers(),
            100,
            100,
            Background::Black,
            &cache,
            &mut text,
        )
        .unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn grid_background_is_not_baked() {
        let store = LayerStore::new();
        let cache = BitmapCache::new();
        let mut text = TextRasterizer::new();
        let img = flatten(store.layers(), 50, 50, Background::Grid, &cache, &mut text).unwrap();
        assert_eq!(img.get_pixel(25, 25).0[3], 0);

        let img = flatten(
            store.layers(),
            50,
            50,
            Background::White,
            &cache,
            &mut text,
        )
        .unwrap();
        assert_eq!(img.get_pixel(25, 25).0, [255, 255, 255, 255]);
    }

    #[test]
    fn opacity_blends_toward_background() {
        let mut store = LayerStore::new();
        let mut cache = BitmapCache::new();
        cache.insert("red".into(), solid(40, 40, [255, 0, 0, 255]));
        let id = store.add_image("red".into(), 100, 100);
        store.update(
            id,
            &LayerPatch {
                opacity: Some(0.5),
                ..Default::default()
            },
        );
        let mut text = TextRasterizer::new();
        let img = flatten(
            store.layers(),
            100,
            100,
            Background::White,
            &cache,
            &mut text,
        )
        .unwrap();
        let p = img.get_pixel(50, 50).0;
        assert!(p[0] > 200); // red stays strong
        assert!((p[1] as i32 - 128).abs() < 8); // green halfway to white
        assert_eq!(p[3], 255);
    }

    #[test]
    fn transform_order_is_translate_rotate_scale() {
        // An asymmetric pattern (top-left quadrant red, rest blue)
        // rotated 90° CW with flip lands its marker where only the fixed
        // translate → rotate → scale(flip) order puts it.
        let mut bitmap = solid(40, 40, [0, 0, 255, 255]);
        for y in 0..20 {
            for x in 0..20 {
                bitmap.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            }
        }
        let mut store = LayerStore::new();
        let mut cache = BitmapCache::new();
        cache.insert("quad".into(), bitmap);
        let id = store.add_image("quad".into(), 100, 100);
        store.update(
            id,
            &LayerPatch {
                scale: Some(1.0),
                rotation: Some(90.0),
                flip_horizontal: Some(true),
                ..Default::default()
            },
        );
        let mut text = TextRasterizer::new();
        let img = flatten(
            store.layers(),
            100,
            100,
            Background::Black,
            &cache,
            &mut text,
        )
        .unwrap();
        // Flip mirrors x in layer space, then the 90° rotation carries the
        // red quadrant to the bottom-right of the canvas.
        assert_eq!(img.get_pixel(60, 60).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(40, 40).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(40, 60).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(60, 40).0, [0, 0, 255, 255]);
    }

    #[test]
    fn flip_mirrors_horizontally() {
        // Left half red, right half blue; flipped layer shows blue left.
        let mut bitmap = solid(40, 40, [255, 0, 0, 255]);
        for y in 0..40 {
            for x in 20..40 {
                bitmap.put_pixel(x, y, image::Rgba([0, 0, 255, 255]));
            }
        }
        let mut store = LayerStore::new();
        let mut cache = BitmapCache::new();
        cache.insert("split".into(), bitmap);
        let id = store.add_image("split".into(), 100, 100);
        store.update(
            id,
            &LayerPatch {
                scale: Some(1.0),
                flip_horizontal: Some(true),
                ..Default::default()
            },
        );
        let mut text = TextRasterizer::new();
        let img = flatten(
            store.layers(),
            100,
            100,
            Background::Black,
            &cache,
            &mut text,
        )
        .unwrap();
        assert_eq!(img.get_pixel(40, 50).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(60, 50).0, [255, 0, 0, 255]);
    }

    #[test]
    fn zero_canvas_is_an_error() {
        let store = LayerStore::new();
        let cache = BitmapCache::new();
        let mut text = TextRasterizer::new();
        assert!(matches!(
            flatten(store.layers(), 0, 50, Background::Black, &cache, &mut text),
            Err(FlattenError::EmptyOutput { .. })
        ));
    }

    #[test]
    fn cache_retains_only_live_sources() {
        let (store, mut cache) = setup_two_overlapping();
        cache.insert("stale".into(), solid(1, 1, [0; 4]));
        cache.retain_sources(store.layers());
        assert!(cache.contains("red"));
        assert!(!cache.contains("stale"));
    }
}
