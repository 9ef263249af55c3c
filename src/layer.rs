//! Layer data model and layer store.
//!
//! A layer is a tagged union (image or text) with a shared transform /
//! appearance record.  The store owns the ordered collection plus the
//! current selection; it performs **no** history bookkeeping of its own —
//! the composition editor commits snapshots around store mutations.

use egui::Pos2;
use uuid::Uuid;

/// Hard cap on simultaneous layers, matching the reference-image limit.
pub const MAX_LAYERS: usize = 20;

/// UI clamp ranges.
pub const LAYER_SCALE_MIN: f32 = 0.1;
pub const LAYER_SCALE_MAX: f32 = 5.0;
pub const FONT_SIZE_MIN: f32 = 10.0;
pub const FONT_SIZE_MAX: f32 = 200.0;

/// Defaults for a freshly added layer.
pub const DEFAULT_IMAGE_SCALE: f32 = 0.5;
pub const DEFAULT_TEXT: &str = "Text Layer";
pub const DEFAULT_FONT_SIZE: f32 = 60.0;
pub const DEFAULT_TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FontWeight {
    Normal,
    #[default]
    Bold,
}

impl FontWeight {
    pub fn label(&self) -> &'static str {
        match self {
            FontWeight::Normal => "Normal",
            FontWeight::Bold => "Bold",
        }
    }

    /// CSS-style numeric weight, used for system font lookup.
    pub fn css_value(&self) -> u16 {
        match self {
            FontWeight::Normal => 400,
            FontWeight::Bold => 700,
        }
    }
}

/// Variant-specific layer content.  Image layers own a display reference
/// (a key into the renderer's bitmap cache), never the decoded bitmap.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerContent {
    Image {
        source: String,
    },
    Text {
        text: String,
        font_size: f32,
        color: [u8; 4],
        weight: FontWeight,
    },
}

/// A single compositing layer.  `x`/`y` locate the layer's *center* in
/// logical canvas pixels; `rotation` accumulates in degrees without
/// normalization; `z_index` values need not be contiguous.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub rotation: f32,
    pub opacity: f32,
    pub flip_horizontal: bool,
    pub z_index: i32,
    pub content: LayerContent,
}

impl Layer {
    fn new(content: LayerContent, x: f32, y: f32, scale: f32, z_index: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            x,
            y,
            scale,
            rotation: 0.0,
            opacity: 1.0,
            flip_horizontal: false,
            z_index,
            content,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.content, LayerContent::Text { .. })
    }
}

/// Parse `#rrggbb` (or `#rrggbbaa`) into RGBA bytes.
pub fn parse_hex_color(hex: &str) -> Option<[u8; 4]> {
    let s = hex.strip_prefix('#')?;
    if s.len() != 6 && s.len() != 8 {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
    let r = byte(0)?;
    let g = byte(2)?;
    let b = byte(4)?;
    let a = if s.len() == 8 { byte(6)? } else { 255 };
    Some([r, g, b, a])
}

pub fn format_hex_color(rgba: [u8; 4]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgba[0], rgba[1], rgba[2])
}

// ============================================================================
// LAYER PATCH — partial attribute update
// ============================================================================

/// Partial update applied through [`LayerStore::update`].  `None` fields are
/// left untouched.  Text fields are ignored on image layers and vice versa.
#[derive(Clone, Debug, Default)]
pub struct LayerPatch {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub scale: Option<f32>,
    pub rotation: Option<f32>,
    pub opacity: Option<f32>,
    pub flip_horizontal: Option<bool>,
    pub z_index: Option<i32>,
    pub text: Option<String>,
    pub font_size: Option<f32>,
    pub color: Option<[u8; 4]>,
    pub weight: Option<FontWeight>,
}

impl LayerPatch {
    pub fn translate(dx: f32, dy: f32, layer: &Layer) -> Self {
        Self {
            x: Some(layer.x + dx),
            y: Some(layer.y + dy),
            ..Default::default()
        }
    }

    fn apply_to(&self, layer: &mut Layer) {
        if let Some(x) = self.x {
            layer.x = x;
        }
        if let Some(y) = self.y {
            layer.y = y;
        }
        if let Some(s) = self.scale {
            layer.scale = s.clamp(LAYER_SCALE_MIN, LAYER_SCALE_MAX);
        }
        if let Some(r) = self.rotation {
            layer.rotation = r;
        }
        if let Some(o) = self.opacity {
            layer.opacity = o.clamp(0.0, 1.0);
        }
        if let Some(f) = self.flip_horizontal {
            layer.flip_horizontal = f;
        }
        if let Some(z) = self.z_index {
            layer.z_index = z;
        }
        if let LayerContent::Text {
            text,
            font_size,
            color,
            weight,
        } = &mut layer.content
        {
            if let Some(t) = &self.text {
                *text = t.clone();
            }
            if let Some(fs) = self.font_size {
                *font_size = fs.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX);
            }
            if let Some(c) = self.color {
                *color = c;
            }
            if let Some(w) = self.weight {
                *weight = w;
            }
        }
    }
}

// ============================================================================
// LAYER STORE
// ============================================================================

/// Ordered layer collection plus selection.  Insertion order is preserved;
/// paint order is ascending `z_index` with a stable sort, so equal z values
/// keep their insertion order.
#[derive(Clone, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
    selected: Option<Uuid>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn get(&self, id: Uuid) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    // ---- selection ----------------------------------------------------------

    pub fn selected_id(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn selected(&self) -> Option<&Layer> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Selecting an id not present in the store is a no-op.
    pub fn select(&mut self, id: Uuid) {
        if self.get(id).is_some() {
            self.selected = Some(id);
        }
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Drop the selection if the selected layer no longer exists (called
    /// after restoring a history snapshot).
    pub fn reconcile_selection(&mut self) {
        if let Some(id) = self.selected
            && self.get(id).is_none()
        {
            self.selected = None;
        }
    }

    // ---- mutation -----------------------------------------------------------

    /// Add an image layer centered on the canvas.  The new layer becomes
    /// selected and paints above everything else.
    pub fn add_image(&mut self, source: String, canvas_w: u32, canvas_h: u32) -> Uuid {
        let layer = Layer::new(
            LayerContent::Image { source },
            canvas_w as f32 / 2.0,
            canvas_h as f32 / 2.0,
            DEFAULT_IMAGE_SCALE,
            self.max_z() + 1,
        );
        let id = layer.id;
        self.layers.push(layer);
        self.selected = Some(id);
        id
    }

    /// Add a text layer with the stock styling (60 px bold white).
    pub fn add_text(&mut self, canvas_w: u32, canvas_h: u32) -> Uuid {
        let layer = Layer::new(
            LayerContent::Text {
                text: DEFAULT_TEXT.to_string(),
                font_size: DEFAULT_FONT_SIZE,
                color: DEFAULT_TEXT_COLOR,
                weight: FontWeight::Bold,
            },
            canvas_w as f32 / 2.0,
            canvas_h as f32 / 2.0,
            1.0,
            self.max_z() + 1,
        );
        let id = layer.id;
        self.layers.push(layer);
        self.selected = Some(id);
        id
    }

    /// Apply a partial update.  Returns false when the id is unknown.
    pub fn update(&mut self, id: Uuid, patch: &LayerPatch) -> bool {
        match self.layers.iter_mut().find(|l| l.id == id) {
            Some(layer) => {
                patch.apply_to(layer);
                true
            }
            None => false,
        }
    }

    /// Remove a layer; clears the selection if it pointed at the removed id.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.layers.len();
        self.layers.retain(|l| l.id != id);
        let removed = self.layers.len() != before;
        if removed && self.selected == Some(id) {
            self.selected = None;
        }
        removed
    }

    pub fn bring_to_front(&mut self, id: Uuid) -> bool {
        let z = self.max_z() + 1;
        self.update(
            id,
            &LayerPatch {
                z_index: Some(z),
                ..Default::default()
            },
        )
    }

    pub fn send_to_back(&mut self, id: Uuid) -> bool {
        let z = self.min_z() - 1;
        self.update(
            id,
            &LayerPatch {
                z_index: Some(z),
                ..Default::default()
            },
        )
    }

    /// Replace the whole collection (history restore).
    pub fn replace_all(&mut self, layers: Vec<Layer>) {
        self.layers = layers;
        self.reconcile_selection();
    }

    pub fn snapshot(&self) -> Vec<Layer> {
        self.layers.clone()
    }

    fn max_z(&self) -> i32 {
        self.layers.iter().map(|l| l.z_index).max().unwrap_or(0)
    }

    fn min_z(&self) -> i32 {
        self.layers.iter().map(|l| l.z_index).min().unwrap_or(0)
    }

    // ---- hit testing --------------------------------------------------------

    /// Paint-ordered view (ascending z, stable on ties).
    pub fn paint_order(&self) -> Vec<&Layer> {
        let mut ordered: Vec<&Layer> = self.layers.iter().collect();
        ordered.sort_by_key(|l| l.z_index);
        ordered
    }

    /// Topmost layer under `point` (logical canvas coordinates).
    ///
    /// `intrinsic_size` reports a layer's unscaled content size (bitmap
    /// dimensions, or measured text extent); layers whose size is unknown
    /// are not hit.  The point is mapped through the inverse of the layer
    /// transform (translate → rotate → scale with flip) and tested against
    /// the centered content rectangle.
    pub fn hit_test<F>(&self, point: Pos2, intrinsic_size: F) -> Option<Uuid>
    where
        F: Fn(&Layer) -> Option<(f32, f32)>,
    {
        let mut hit = None;
        for layer in self.paint_order() {
            let Some((w, h)) = intrinsic_size(layer) else {
                continue;
            };
            if layer.scale <= 0.0 {
                continue;
            }
            // Inverse transform: un-translate, un-rotate, un-scale (+flip).
            let dx = point.x - layer.x;
            let dy = point.y - layer.y;
            let theta = -layer.rotation.to_radians();
            let (sin, cos) = theta.sin_cos();
            let rx = dx * cos - dy * sin;
            let ry = dx * sin + dy * cos;
            let sx = if layer.flip_horizontal {
                -layer.scale
            } else {
                layer.scale
            };
            let lx = rx / sx;
            let ly = ry / layer.scale;
            if lx.abs() <= w / 2.0 && ly.abs() <= h / 2.0 {
                // Later (higher z / later insertion) wins.
                hit = Some(layer.id);
            }
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_canvas() -> LayerStore {
        LayerStore::new()
    }

    #[test]
    fn add_image_centers_and_selects() {
        let mut store = store_with_canvas();
        let id = store.add_image("img1".into(), 1024, 576);
        let layer = store.get(id).unwrap();
        assert_eq!((layer.x, layer.y), (512.0, 288.0));
        assert_eq!(layer.scale, DEFAULT_IMAGE_SCALE);
        assert_eq!(layer.z_index, 1);
        assert_eq!(store.selected_id(), Some(id));
    }

    #[test]
    fn z_index_counts_up_and_reorder_ops_work() {
        let mut store = store_with_canvas();
        let a = store.add_image("a".into(), 100, 100);
        let b = store.add_image("b".into(), 100, 100);
        let c = store.add_image("c".into(), 100, 100);
        assert_eq!(store.get(c).unwrap().z_index, 3);

        store.bring_to_front(a);
        assert_eq!(store.get(a).unwrap().z_index, 4);
        store.send_to_back(b);
        assert_eq!(store.get(b).unwrap().z_index, 0);
    }

    #[test]
    fn update_clamps_scale_and_opacity() {
        let mut store = store_with_canvas();
        let id = store.add_image("a".into(), 100, 100);
        store.update(
            id,
            &LayerPatch {
                scale: Some(99.0),
                opacity: Some(-1.0),
                ..Default::default()
            },
        );
        let layer = store.get(id).unwrap();
        assert_eq!(layer.scale, LAYER_SCALE_MAX);
        assert_eq!(layer.opacity, 0.0);
    }

    #[test]
    fn update_unknown_id_is_noop() {
        let mut store = store_with_canvas();
        store.add_image("a".into(), 100, 100);
        let before = store.snapshot();
        assert!(!store.update(Uuid::new_v4(), &LayerPatch::default()));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn remove_clears_selection() {
        let mut store = store_with_canvas();
        let id = store.add_image("a".into(), 100, 100);
        assert_eq!(store.selected_id(), Some(id));
        assert!(store.remove(id));
        assert_eq!(store.selected_id(), None);
    }

    #[test]
    fn text_patch_ignored_on_image_layer() {
        let mut store = store_with_canvas();
        let id = store.add_image("a".into(), 100, 100);
        store.update(
            id,
            &LayerPatch {
                text: Some("hi".into()),
                ..Default::default()
            },
        );
        assert!(matches!(
            store.get(id).unwrap().content,
            LayerContent::Image { .. }
        ));
    }

    #[test]
    fn hex_color_roundtrip() {
        assert_eq!(parse_hex_color("#ffffff"), Some([255, 255, 255, 255]));
        assert_eq!(parse_hex_color("#22c55e"), Some([0x22, 0xc5, 0x5e, 255]));
        assert_eq!(parse_hex_color("bogus"), None);
        assert_eq!(format_hex_color([0x22, 0xc5, 0x5e, 255]), "#22c55e");
    }

    #[test]
    fn hit_test_topmost_and_rotated() {
        let mut store = store_with_canvas();
        let a = store.add_image("a".into(), 200, 200); // center (100,100)
        let b = store.add_image("b".into(), 200, 200);
        let size = |_: &Layer| Some((40.0, 40.0));

        // Both layers overlap at the center; b is above (higher z).
        assert_eq!(store.hit_test(Pos2::new(100.0, 100.0), size), Some(b));

        // Move b away, a is hit again.
        store.update(
            b,
            &LayerPatch {
                x: Some(500.0),
                ..Default::default()
            },
        );
        assert_eq!(store.hit_test(Pos2::new(100.0, 100.0), size), Some(a));

        // Rotate a by 90° — a point just beyond the unrotated half-width on
        // the x axis is still inside because width/height swap.
        store.update(
            a,
            &LayerPatch {
                rotation: Some(90.0),
                ..Default::default()
            },
        );
        // (default image scale is 0.5, so local coords are doubled)
        let tall = |_: &Layer| Some((10.0, 60.0));
        assert_eq!(store.hit_test(Pos2::new(115.0, 100.0), tall), Some(a));
        assert_eq!(store.hit_test(Pos2::new(100.0, 115.0), tall), None);
    }
}
