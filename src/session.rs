//! Editing sessions: the multi-layer composition editor and the
//! single-image adjustment editor.
//!
//! A session owns its layer store, history and paint surfaces exclusively;
//! every mutation goes through the session so each discrete action lands as
//! exactly one history commit, while continuous gestures stay uncommitted
//! until their end.  Edited pixels leave the core only through the
//! [`SessionHost`] callbacks.

use egui::Pos2;
use image::RgbaImage;
use uuid::Uuid;

use crate::adjust::{render_adjusted, Adjustments};
use crate::compositor::{flatten, Background, BitmapCache};
use crate::error::{EditError, FlattenError};
use crate::geometry::{AspectRatio, StageLayout};
use crate::history::HistoryManager;
use crate::interaction::{Outcome, PointerController, StageTool};
use crate::layer::{Layer, LayerContent, LayerPatch, LayerStore, MAX_LAYERS};
use crate::log_info;
use crate::paint::PaintSurface;
use crate::service::GenerationRequest;
use crate::text::TextRasterizer;

// ============================================================================
// BOUNDARY CONTRACTS
// ============================================================================

/// A selectable source image offered by the host's gallery.
#[derive(Clone, Debug)]
pub struct AssetRef {
    pub id: String,
    pub url: String,
    pub label: String,
}

/// Read-only provider for the "add layer" pickers.
pub trait AssetProvider {
    fn list_available_images(&self) -> Vec<AssetRef>;
}

/// Host application callbacks.  The core performs no I/O of its own.
pub trait SessionHost {
    /// A finalized composition, with its (possibly changed) aspect ratio.
    fn on_save(&mut self, image: RgbaImage, aspect: AspectRatio);

    /// Editing abandoned without saving.
    fn on_close(&mut self);

    /// Destructive single-image apply: replace the stored source.
    fn on_update_image(&mut self, id: &str, image: RgbaImage, aspect: Option<AspectRatio>);
}

// ============================================================================
// COMPOSITION EDITOR
// ============================================================================

/// Multi-layer composition session.
pub struct CompositionEditor {
    store: LayerStore,
    history: HistoryManager,
    cache: BitmapCache,
    text: TextRasterizer,
    controller: PointerController,
    pub tool: StageTool,
    pub aspect: AspectRatio,
    pub background: Background,
    pub instruction: String,
}

impl Default for CompositionEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionEditor {
    pub fn new() -> Self {
        Self {
            store: LayerStore::new(),
            history: HistoryManager::new(),
            cache: BitmapCache::new(),
            text: TextRasterizer::new(),
            controller: PointerController::new(),
            tool: StageTool::Move,
            aspect: AspectRatio::Square,
            background: Background::Black,
            instruction: String::new(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        self.store.layers()
    }

    pub fn selected_id(&self) -> Option<Uuid> {
        self.store.selected_id()
    }

    pub fn selected(&self) -> Option<&Layer> {
        self.store.selected()
    }

    pub fn select(&mut self, id: Uuid) {
        self.store.select(id);
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.aspect.canvas_size()
    }

    fn commit(&mut self) {
        self.history.commit(self.store.snapshot());
    }

    // ---- decoded bitmaps ----------------------------------------------------

    /// Register the decoded bitmap for an image source.  Decoding happens
    /// at the shell; the session only consumes drawable pixels.
    pub fn register_bitmap(&mut self, source: &str, bitmap: RgbaImage) {
        self.cache.insert(source.to_string(), bitmap);
    }

    pub fn bitmap_cache(&self) -> &BitmapCache {
        &self.cache
    }

    /// Unscaled content size of a layer, for hit testing and overlays.
    pub fn intrinsic_size(&mut self, layer: &Layer) -> Option<(f32, f32)> {
        match &layer.content {
            LayerContent::Image { source } => self.cache.size_of(source),
            LayerContent::Text {
                text,
                font_size,
                weight,
                ..
            } => Some(self.text.measure(text, *font_size, *weight)),
        }
    }

    // ---- committed mutations ------------------------------------------------

    /// Add an image layer.  Refused once the layer cap is reached, without
    /// touching history.
    pub fn add_image_layer(&mut self, source: String) -> Result<Uuid, EditError> {
        if self.store.len() >= MAX_LAYERS {
            return Err(EditError::LayerLimit(MAX_LAYERS));
        }
        let (w, h) = self.canvas_size();
        let id = self.store.add_image(source, w, h);
        self.commit();
        Ok(id)
    }

    pub fn add_text_layer(&mut self) -> Result<Uuid, EditError> {
        if self.store.len() >= MAX_LAYERS {
            return Err(EditError::LayerLimit(MAX_LAYERS));
        }
        let (w, h) = self.canvas_size();
        let id = self.store.add_text(w, h);
        self.commit();
        Ok(id)
    }

    /// Partial layer update.  `commit` distinguishes discrete UI actions
    /// (one history entry each) from live mid-gesture updates.
    pub fn update_layer(&mut self, id: Uuid, patch: &LayerPatch, commit: bool) -> bool {
        let changed = self.store.update(id, patch);
        if changed && commit {
            self.commit();
        }
        changed
    }

    pub fn remove_layer(&mut self, id: Uuid) -> bool {
        let removed = self.store.remove(id);
        if removed {
            self.cache.retain_sources(self.store.layers());
            self.commit();
        }
        removed
    }

    pub fn bring_to_front(&mut self, id: Uuid) -> bool {
        let changed = self.store.bring_to_front(id);
        if changed {
            self.commit();
        }
        changed
    }

    pub fn send_to_back(&mut self, id: Uuid) -> bool {
        let changed = self.store.send_to_back(id);
        if changed {
            self.commit();
        }
        changed
    }

    // ---- history ------------------------------------------------------------

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.history.undo().map(<[Layer]>::to_vec) else {
            return false;
        };
        self.store.replace_all(snapshot);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.history.redo().map(<[Layer]>::to_vec) else {
            return false;
        };
        self.store.replace_all(snapshot);
        true
    }

    // ---- pointer gestures ---------------------------------------------------

    pub fn pointer_down(&mut self, layout: &StageLayout, screen_pos: Pos2) {
        // Hit testing needs content sizes, and the text measurer needs
        // &mut self; snapshot the sizes first.
        let layers = self.store.layers().to_vec();
        let sizes: Vec<(Uuid, Option<(f32, f32)>)> = layers
            .iter()
            .map(|l| (l.id, self.intrinsic_size(l)))
            .collect();
        let lookup = move |layer: &Layer| {
            sizes
                .iter()
                .find(|(id, _)| *id == layer.id)
                .and_then(|(_, s)| *s)
        };
        self.controller
            .pointer_down(&mut self.store, layout, screen_pos, lookup);
    }

    pub fn pointer_move(&mut self, layout: &StageLayout, screen_pos: Pos2) {
        self.controller
            .pointer_move(&mut self.store, layout, screen_pos);
    }

    pub fn pointer_up(&mut self) {
        if self.controller.pointer_up() == Outcome::Commit {
            self.commit();
        }
    }

    pub fn wheel(&mut self, scroll_up: bool, rotate: bool) {
        if self.controller.wheel(&mut self.store, scroll_up, rotate) == Outcome::Commit {
            self.commit();
        }
    }

    // ---- flatten / save -----------------------------------------------------

    pub fn flatten(&mut self) -> Result<RgbaImage, FlattenError> {
        let (w, h) = self.canvas_size();
        flatten(
            self.store.layers(),
            w,
            h,
            self.background,
            &self.cache,
            &mut self.text,
        )
    }

    /// Flatten and hand the result to the host.  On failure the session is
    /// left untouched and resumable.
    pub fn save(&mut self, host: &mut dyn SessionHost) -> Result<(), FlattenError> {
        let image = self.flatten()?;
        log_info!("composition saved ({} layers)", self.store.len());
        host.on_save(image, self.aspect);
        Ok(())
    }

    pub fn close(&mut self, host: &mut dyn SessionHost) {
        host.on_close();
    }

    /// Validate and assemble a generation request from the current
    /// composition.  Rejection happens before any flatten or service work.
    pub fn generation_request(&mut self) -> Result<GenerationRequest, EditError> {
        if self.instruction.trim().is_empty() {
            return Err(EditError::BlankInstruction);
        }
        let composite = self.flatten()?;
        Ok(GenerationRequest {
            instruction: self.instruction.trim().to_string(),
            aspect: self.aspect,
            references: vec![composite],
            mask: None,
            sketch: None,
        })
    }
}

// ============================================================================
// SINGLE-IMAGE ADJUSTMENT EDITOR
// ============================================================================

/// Single-image session: non-destructive adjustments, crop, inpaint mask
/// and pose sketch.
pub struct AdjustEditor {
    source_id: String,
    source: RgbaImage,
    pub adjustments: Adjustments,
    pub crop: AspectRatio,
    pub background: Background,
    pub mask: PaintSurface,
    pub sketch: PaintSurface,
    pub instruction: String,
    /// Last observed on-screen preview width, in pixels.
    viewport_w: f32,
}

impl AdjustEditor {
    pub fn new(source_id: String, source: RgbaImage) -> Self {
        let ratio = if source.height() > 0 {
            source.width() as f32 / source.height() as f32
        } else {
            1.0
        };
        Self {
            source_id,
            source,
            adjustments: Adjustments::default(),
            crop: AspectRatio::Original(ratio),
            background: Background::Black,
            mask: PaintSurface::new(),
            sketch: PaintSurface::new(),
            instruction: String::new(),
            viewport_w: 0.0,
        }
    }

    pub fn source(&self) -> &RgbaImage {
        &self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn set_viewport_width(&mut self, width: f32) {
        self.viewport_w = width;
    }

    fn background_fill(&self) -> [u8; 4] {
        // Single-image flatten bakes solid colors only.
        self.background.fill().unwrap_or([0, 0, 0, 255])
    }

    /// Flatten the adjusted view.  Shared verbatim by apply and download.
    pub fn flatten(&self) -> Result<RgbaImage, FlattenError> {
        if self.viewport_w <= 0.0 {
            return Err(FlattenError::BadRaster);
        }
        render_adjusted(
            &self.source,
            &self.adjustments,
            self.crop.ratio(),
            self.viewport_w,
            self.background_fill(),
        )
    }

    /// Destructive apply: the flattened raster becomes the new source,
    /// adjustments reset to neutral, and the host is notified through the
    /// single image-update channel.
    pub fn apply(&mut self, host: &mut dyn SessionHost) -> Result<(), FlattenError> {
        let image = self.flatten()?;
        let ratio = image.width() as f32 / image.height() as f32;
        host.on_update_image(&self.source_id, image.clone(), Some(self.crop));
        self.source = image;
        self.adjustments = Adjustments::default();
        self.crop = AspectRatio::Original(ratio);
        // Both overlays described the old pixels.
        self.mask.clear();
        self.sketch.clear();
        log_info!("adjustments applied to {}", self.source_id);
        Ok(())
    }

    /// Export the flattened raster without mutating any session state.
    pub fn download(&self) -> Result<RgbaImage, FlattenError> {
        self.flatten()
    }

    // ---- generative requests ------------------------------------------------

    /// Localized edit: requires a painted mask and an instruction.  The
    /// mask is replayed at the source's native resolution.
    pub fn inpaint_request(&mut self) -> Result<GenerationRequest, EditError> {
        if self.mask.is_empty() {
            return Err(EditError::EmptyMask);
        }
        if self.instruction.trim().is_empty() {
            return Err(EditError::BlankInstruction);
        }
        let mask = self.mask.render(self.source.width(), self.source.height());
        Ok(GenerationRequest {
            instruction: self.instruction.trim().to_string(),
            aspect: self.crop,
            references: vec![self.source.clone()],
            mask: Some(mask),
            sketch: None,
        })
    }

    /// Pose transfer: requires sketch strokes; the instruction is optional.
    pub fn pose_request(&mut self) -> Result<GenerationRequest, EditError> {
        if self.sketch.is_empty() {
            return Err(EditError::EmptySketch);
        }
        let sketch = self
            .sketch
            .render(self.source.width(), self.source.height());
        Ok(GenerationRequest {
            instruction: self.instruction.trim().to_string(),
            aspect: self.crop,
            references: vec![self.source.clone()],
            mask: None,
            sketch: Some(sketch),
        })
    }

    /// Replace the source with a generation result (e.g. a finished
    /// inpaint), clearing the surfaces that produced it.
    pub fn accept_generated(&mut self, image: RgbaImage, host: &mut dyn SessionHost) {
        let ratio = if image.height() > 0 {
            image.width() as f32 / image.height() as f32
        } else {
            1.0
        };
        host.on_update_image(&self.source_id, image.clone(), None);
        self.source = image;
        self.crop = AspectRatio::Original(ratio);
        self.adjustments = Adjustments::default();
        self.mask.clear();
        self.sketch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::StrokeStyle;

    #[derive(Default)]
    struct RecordingHost {
        saves: Vec<(u32, u32)>,
        updates: Vec<String>,
        closed: bool,
    }

    impl SessionHost for RecordingHost {
        fn on_save(&mut self, image: RgbaImage, _aspect: AspectRatio) {
            self.saves.push((image.width(), image.height()));
        }
        fn on_close(&mut self) {
            self.closed = true;
        }
        fn on_update_image(&mut self, id: &str, _image: RgbaImage, _aspect: Option<AspectRatio>) {
            self.updates.push(id.to_string());
        }
    }

    fn editor_with_layer() -> CompositionEditor {
        let mut ed = CompositionEditor::new();
        ed.register_bitmap("img1", RgbaImage::from_pixel(40, 40, image::Rgba([255, 0, 0, 255])));
        ed.add_image_layer("img1".into()).unwrap();
        ed
    }

    #[test]
    fn discrete_actions_commit_individually() {
        let mut ed = editor_with_layer();
        let id = ed.selected_id().unwrap();
        ed.update_layer(
            id,
            &LayerPatch {
                rotation: Some(45.0),
                ..Default::default()
            },
            true,
        );
        ed.remove_layer(id);
        // add + rotate + remove = three commits beyond the seed entry.
        assert!(ed.undo());
        assert!(ed.undo());
        assert!(ed.undo());
        assert!(!ed.undo());
    }

    #[test]
    fn uncommitted_updates_leave_history_alone() {
        let mut ed = editor_with_layer();
        let id = ed.selected_id().unwrap();
        for i in 0..10 {
            ed.update_layer(
                id,
                &LayerPatch {
                    x: Some(100.0 + i as f32),
                    ..Default::default()
                },
                false,
            );
        }
        // Only the add is undoable.
        assert!(ed.undo());
        assert!(!ed.undo());
    }

    #[test]
    fn layer_cap_refuses_new_adds_without_history_noise() {
        let mut ed = CompositionEditor::new();
        for i in 0..MAX_LAYERS {
            ed.register_bitmap(&format!("img{i}"), RgbaImage::new(4, 4));
            ed.add_image_layer(format!("img{i}")).unwrap();
        }
        let before = ed.layers().len();
        assert_eq!(
            ed.add_image_layer("one-more".into()),
            Err(EditError::LayerLimit(MAX_LAYERS))
        );
        assert_eq!(ed.add_text_layer(), Err(EditError::LayerLimit(MAX_LAYERS)));
        assert_eq!(ed.layers().len(), before);
    }

    #[test]
    fn undo_restores_layers_and_selection_rules() {
        let mut ed = editor_with_layer();
        assert_eq!(ed.layers().len(), 1);
        assert!(ed.undo());
        assert_eq!(ed.layers().len(), 0);
        assert_eq!(ed.selected_id(), None);
        assert!(ed.redo());
        assert_eq!(ed.layers().len(), 1);
        assert_eq!(ed.selected_id(), None);
    }

    #[test]
    fn save_flattens_at_canvas_resolution() {
        let mut ed = editor_with_layer();
        ed.aspect = AspectRatio::Landscape16x9;
        let mut host = RecordingHost::default();
        ed.save(&mut host).unwrap();
        assert_eq!(host.saves, vec![(1024, 576)]);
    }

    #[test]
    fn save_failure_leaves_session_resumable() {
        let mut ed = editor_with_layer();
        ed.add_image_layer("ghost".into()).unwrap();
        let mut host = RecordingHost::default();
        assert!(ed.save(&mut host).is_err());
        assert!(host.saves.is_empty());
        // Layers and history are untouched; removing the bad layer fixes it.
        assert_eq!(ed.layers().len(), 2);
        let ghost = ed
            .layers()
            .iter()
            .find(|l| matches!(&l.content, LayerContent::Image { source } if source == "ghost"))
            .map(|l| l.id)
            .unwrap();
        ed.remove_layer(ghost);
        assert!(ed.save(&mut host).is_ok());
    }

    #[test]
    fn blank_instruction_rejected_before_any_work() {
        let mut ed = editor_with_layer();
        ed.instruction = "   ".into();
        assert_eq!(
            ed.generation_request().err(),
            Some(EditError::BlankInstruction)
        );
        ed.instruction = "make it dramatic".into();
        let request = ed.generation_request().unwrap();
        assert_eq!(request.instruction, "make it dramatic");
        assert_eq!(request.references.len(), 1);
    }

    // ---- single-image editor ------------------------------------------------

    fn adjust_editor() -> AdjustEditor {
        let source = RgbaImage::from_pixel(100, 100, image::Rgba([10, 200, 30, 255]));
        let mut ed = AdjustEditor::new("asset-1".into(), source);
        ed.set_viewport_width(50.0);
        ed
    }

    #[test]
    fn empty_mask_inpaint_rejected_without_side_effects() {
        // No mask points: rejected before the service is ever
        // involved, no state mutated.
        let mut ed = adjust_editor();
        ed.instruction = "remove the lamp".into();
        assert_eq!(ed.inpaint_request().err(), Some(EditError::EmptyMask));
        assert!(ed.adjustments.is_neutral());
        assert!(ed.mask.is_empty());
    }

    #[test]
    fn empty_sketch_pose_rejected() {
        let mut ed = adjust_editor();
        assert_eq!(ed.pose_request().err(), Some(EditError::EmptySketch));
    }

    #[test]
    fn inpaint_request_renders_mask_at_source_resolution() {
        let mut ed = adjust_editor();
        ed.instruction = "remove the lamp".into();
        ed.mask
            .begin_stroke(25.0, 25.0, 10.0, StrokeStyle::Mask { eraser: false }, 50.0, 50.0);
        let request = ed.inpaint_request().unwrap();
        let mask = request.mask.unwrap();
        assert_eq!((mask.width(), mask.height()), (100, 100));
        // Painted at the surface midpoint → source midpoint.
        assert!(mask.get_pixel(50, 50).0[3] > 0);
    }

    #[test]
    fn inpaint_with_mask_but_blank_instruction_rejected() {
        let mut ed = adjust_editor();
        ed.mask
            .begin_stroke(25.0, 25.0, 10.0, StrokeStyle::Mask { eraser: false }, 50.0, 50.0);
        assert_eq!(
            ed.inpaint_request().err(),
            Some(EditError::BlankInstruction)
        );
    }

    #[test]
    fn apply_replaces_source_and_resets_state() {
        let mut ed = adjust_editor();
        ed.adjustments.brightness = 150.0;
        ed.crop = AspectRatio::Square;
        ed.mask
            .begin_stroke(10.0, 10.0, 8.0, StrokeStyle::Mask { eraser: false }, 50.0, 50.0);
        ed.sketch.begin_stroke(
            30.0,
            30.0,
            8.0,
            StrokeStyle::Pen {
                color: [255, 0, 0, 255],
            },
            50.0,
            50.0,
        );
        let mut host = RecordingHost::default();
        ed.apply(&mut host).unwrap();
        assert_eq!(host.updates, vec!["asset-1".to_string()]);
        assert!(ed.adjustments.is_neutral());
        assert_eq!(ed.source().width(), 100);
        // Brightness was baked in.
        assert!(ed.source().get_pixel(50, 50).0[0] >= 14);
        // Overlays described the replaced pixels; both are gone.
        assert!(ed.mask.is_empty());
        assert!(ed.sketch.is_empty());
    }

    #[test]
    fn download_does_not_mutate_state() {
        let mut ed = adjust_editor();
        ed.adjustments.brightness = 150.0;
        let before = ed.adjustments;
        let img = ed.download().unwrap();
        assert_eq!(img.width(), 100);
        assert_eq!(ed.adjustments, before);
        assert_eq!(ed.source().get_pixel(50, 50).0, [10, 200, 30, 255]);
    }
}
