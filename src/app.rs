//! egui application shell.
//!
//! The shell owns the gallery of imported images, the composition session,
//! at most one single-image adjustment session, and the generative service
//! client.  All real editing logic lives in the session types; the shell
//! translates egui input into session calls and uploads flattened previews
//! as textures.

use egui::{Color32, ColorImage, Pos2, Rect, Sense, TextureHandle, TextureOptions, Vec2};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adjust::{
    ADJUST_PERCENT_MAX, ADJUST_PERCENT_MIN, MACRO_ZOOM_DEFAULT, MACRO_ZOOM_MAX, MACRO_ZOOM_MIN,
    PAN_KEY_STEP, ZOOM_KEY_STEP, ZOOM_MAX, ZOOM_MIN,
};
use crate::compositor::Background;
use crate::error::ServiceError;
use crate::geometry::{AspectRatio, StageLayout};
use crate::interaction::StageTool;
use crate::layer::{
    format_hex_color, parse_hex_color, FontWeight, LayerContent, LayerPatch, FONT_SIZE_MAX,
    FONT_SIZE_MIN, LAYER_SCALE_MAX, LAYER_SCALE_MIN,
};
use crate::paint::{StrokeStyle, BRUSH_SIZE_MAX, BRUSH_SIZE_MIN, DEFAULT_BRUSH_SIZE, PEN_COLORS};
use crate::service::{GenerationRequest, GenerativeService, ServiceClient};
use crate::session::{AdjustEditor, AssetProvider, AssetRef, CompositionEditor, SessionHost};
use crate::{log_err, log_info};

/// Checker cell size for the on-screen grid background.
const GRID_CELL: f32 = 16.0;

// ============================================================================
// HOST STATE
// ============================================================================

/// Shell-side implementation of the session callbacks.  Results are queued
/// and drained by the app so the sessions stay free of I/O.
#[derive(Default)]
struct HostState {
    saved: Vec<(RgbaImage, AspectRatio)>,
    updated: Vec<(String, RgbaImage)>,
    close_requested: bool,
}

impl SessionHost for HostState {
    fn on_save(&mut self, image: RgbaImage, aspect: AspectRatio) {
        self.saved.push((image, aspect));
    }

    fn on_close(&mut self) {
        self.close_requested = true;
    }

    fn on_update_image(&mut self, id: &str, image: RgbaImage, _aspect: Option<AspectRatio>) {
        self.updated.push((id.to_string(), image));
    }
}

/// Placeholder service used until an API-backed implementation is wired
/// in: it returns the first reference image unchanged so the full
/// submit/poll/accept loop stays exercised offline.
struct PassthroughService;

impl GenerativeService for PassthroughService {
    fn generate(&self, request: GenerationRequest) -> Result<RgbaImage, ServiceError> {
        request
            .references
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Rejected("no reference image supplied".into()))
    }
}

/// Which session is waiting on the in-flight generation.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PendingRequest {
    Composition,
    Inpaint,
    Pose,
}

// ============================================================================
// APP
// ============================================================================

pub struct CanvasStudioApp {
    gallery: Vec<AssetRef>,
    images: HashMap<String, RgbaImage>,
    next_asset: u64,

    composition: CompositionEditor,
    adjust: Option<AdjustEditor>,
    host: HostState,
    client: ServiceClient,
    pending: Option<PendingRequest>,

    tool_brush_size: f32,
    pen_color: [u8; 4],
    macro_zoom: f32,
    gallery_filter: String,
    dragging: bool,

    preview: Option<TextureHandle>,
    preview_dirty: bool,
    adjust_preview: Option<TextureHandle>,
    adjust_dirty: bool,
    status: String,
}

impl CanvasStudioApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        Self {
            gallery: Vec::new(),
            images: HashMap::new(),
            next_asset: 1,
            composition: CompositionEditor::new(),
            adjust: None,
            host: HostState::default(),
            client: ServiceClient::new(Arc::new(PassthroughService)),
            pending: None,
            tool_brush_size: DEFAULT_BRUSH_SIZE,
            pen_color: PEN_COLORS[0],
            macro_zoom: MACRO_ZOOM_DEFAULT,
            gallery_filter: String::new(),
            dragging: false,
            preview: None,
            preview_dirty: true,
            adjust_preview: None,
            adjust_dirty: true,
            status: String::new(),
        }
    }

    fn mark_dirty(&mut self) {
        self.preview_dirty = true;
        self.adjust_dirty = true;
    }

    // ---- gallery ------------------------------------------------------------

    fn import_image(&mut self, path: PathBuf) {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        match image::open(&path) {
            Ok(img) => {
                let id = format!("asset-{}", self.next_asset);
                self.next_asset += 1;
                let url = path.to_string_lossy().into_owned();
                self.images.insert(id.clone(), img.into_rgba8());
                self.gallery.push(AssetRef { id, url, label });
                log_info!("imported {}", path.display());
            }
            Err(e) => {
                log_err!("failed to decode {}: {}", path.display(), e);
                self.status = format!("Could not open {}: {}", label, e);
            }
        }
    }

    fn add_gallery_layer(&mut self, asset_id: &str) {
        let Some(bitmap) = self.images.get(asset_id).cloned() else {
            return;
        };
        self.composition.register_bitmap(asset_id, bitmap);
        match self.composition.add_image_layer(asset_id.to_string()) {
            Ok(_) => self.mark_dirty(),
            Err(e) => self.status = e.to_string(),
        }
    }

    fn open_adjust_editor(&mut self, asset_id: &str) {
        if let Some(bitmap) = self.images.get(asset_id).cloned() {
            self.adjust = Some(AdjustEditor::new(asset_id.to_string(), bitmap));
            self.adjust_preview = None;
            self.adjust_dirty = true;
        }
    }

    // ---- host result draining -----------------------------------------------

    fn drain_host(&mut self) {
        for (image, _aspect) in std::mem::take(&mut self.host.saved) {
            if let Some(path) = rfd::FileDialog::new()
                .add_filter("PNG image", &["png"])
                .set_file_name("composition.png")
                .save_file()
            {
                if let Err(e) = image.save(&path) {
                    log_err!("save failed: {}", e);
                    self.status = format!("Save failed: {}", e);
                } else {
                    self.status = format!("Saved {}", path.display());
                }
            }
        }
        for (id, image) in std::mem::take(&mut self.host.updated) {
            self.images.insert(id, image);
            self.mark_dirty();
        }
        if std::mem::take(&mut self.host.close_requested) {
            self.adjust = None;
        }
    }

    fn poll_generation(&mut self) {
        let Some(result) = self.client.poll() else {
            return;
        };
        let pending = self.pending.take();
        match result {
            Ok(image) => match pending {
                Some(PendingRequest::Inpaint) | Some(PendingRequest::Pose) => {
                    if let Some(editor) = self.adjust.as_mut() {
                        editor.accept_generated(image, &mut self.host);
                        self.status = "Generation applied".to_string();
                    }
                }
                _ => {
                    let id = format!("generated-{}", self.next_asset);
                    self.next_asset += 1;
                    self.images.insert(id.clone(), image);
                    self.gallery.push(AssetRef {
                        id: id.clone(),
                        url: String::new(),
                        label: id.clone(),
                    });
                    self.add_gallery_layer(&id);
                    self.status = "Generation added to canvas".to_string();
                }
            },
            Err(e) => {
                log_err!("generation failed: {}", e);
                self.status = e.to_string();
            }
        }
        self.mark_dirty();
    }

    // ---- composition stage --------------------------------------------------

    fn refresh_preview(&mut self, ctx: &egui::Context) {
        if !self.preview_dirty && self.preview.is_some() {
            return;
        }
        match self.composition.flatten() {
            Ok(raster) => {
                let size = [raster.width() as usize, raster.height() as usize];
                let color = ColorImage::from_rgba_unmultiplied(size, raster.as_raw());
                self.preview = Some(ctx.load_texture("stage", color, TextureOptions::LINEAR));
                self.preview_dirty = false;
            }
            Err(e) => {
                self.status = e.to_string();
                self.preview_dirty = false;
            }
        }
    }

    fn stage_ui(&mut self, ui: &mut egui::Ui) {
        let available = ui.available_size();
        let layout = StageLayout::compute(available.x, available.y, self.composition.aspect);
        if !layout.is_active() {
            return;
        }

        let (full_rect, _) = ui.allocate_exact_size(available, Sense::hover());
        let stage = Rect::from_center_size(
            full_rect.center(),
            Vec2::new(layout.visual_w, layout.visual_h),
        );
        let painter = ui.painter_at(full_rect);

        if self.composition.background == Background::Grid {
            paint_checker(&painter, stage);
        }
        if let Some(texture) = &self.preview {
            painter.image(
                texture.id(),
                stage,
                Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                Color32::WHITE,
            );
        }

        let response = ui.interact(stage, ui.id().with("stage"), Sense::click_and_drag());
        if let Some(pos) = response.interact_pointer_pos() {
            let local = Pos2::new(pos.x - stage.min.x, pos.y - stage.min.y);
            if response.drag_started() || (response.clicked() && !self.dragging) {
                self.composition.pointer_down(&layout, local);
                self.dragging = true;
                self.mark_dirty();
            } else if response.dragged() {
                self.composition.pointer_move(&layout, local);
                self.mark_dirty();
            }
        }
        if self.dragging && (response.drag_released() || !response.is_pointer_button_down_on()) {
            self.composition.pointer_up();
            self.dragging = false;
            self.mark_dirty();
        }

        if response.hovered() {
            let (scroll, rotate) =
                ui.input(|i| (i.scroll_delta.y, i.modifiers.ctrl || i.modifiers.command));
            if scroll.abs() > 0.0 {
                self.composition.wheel(scroll > 0.0, rotate);
                self.mark_dirty();
            }
        }

        // Selection outline (axis-aligned bounds of the transformed layer).
        let selected = self.composition.selected().cloned();
        if let Some(layer) = selected
            && let Some((w, h)) = self.composition.intrinsic_size(&layer)
        {
            let s = layout.visual_scale();
            let theta = layer.rotation.to_radians();
            let (sin, cos) = theta.sin_cos();
            let ext_x = (w * cos.abs() + h * sin.abs()) * layer.scale * s / 2.0;
            let ext_y = (w * sin.abs() + h * cos.abs()) * layer.scale * s / 2.0;
            let center = Pos2::new(stage.min.x + layer.x * s, stage.min.y + layer.y * s);
            painter.rect_stroke(
                Rect::from_center_size(center, Vec2::new(ext_x * 2.0, ext_y * 2.0)),
                0.0,
                egui::Stroke::new(1.5, Color32::from_rgb(0x3b, 0x82, 0xf6)),
            );
        }
    }

    // ---- panels -------------------------------------------------------------

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Import Image…").clicked()
                && let Some(paths) = rfd::FileDialog::new()
                    .add_filter("Images", &["png", "jpg", "jpeg", "webp", "bmp"])
                    .pick_files()
            {
                for path in paths {
                    self.import_image(path);
                }
            }
            if ui.button("Add Text").clicked() {
                match self.composition.add_text_layer() {
                    Ok(_) => self.mark_dirty(),
                    Err(e) => self.status = e.to_string(),
                }
            }

            ui.separator();
            let mut aspect = self.composition.aspect;
            egui::ComboBox::from_id_source("aspect")
                .selected_text(aspect.label())
                .show_ui(ui, |ui| {
                    for preset in AspectRatio::presets() {
                        ui.selectable_value(&mut aspect, *preset, preset.label());
                    }
                });
            if aspect != self.composition.aspect {
                self.composition.aspect = aspect;
                self.mark_dirty();
            }

            let mut background = self.composition.background;
            egui::ComboBox::from_id_source("background")
                .selected_text(background.label())
                .show_ui(ui, |ui| {
                    for option in Background::all() {
                        ui.selectable_value(&mut background, *option, option.label());
                    }
                });
            if background != self.composition.background {
                self.composition.background = background;
                self.mark_dirty();
            }

            ui.separator();
            if ui
                .add_enabled(self.composition.can_undo(), egui::Button::new("Undo"))
                .clicked()
            {
                self.composition.undo();
                self.mark_dirty();
            }
            if ui
                .add_enabled(self.composition.can_redo(), egui::Button::new("Redo"))
                .clicked()
            {
                self.composition.redo();
                self.mark_dirty();
            }

            ui.separator();
            if ui.button("Save…").clicked()
                && let Err(e) = self.composition.save(&mut self.host)
            {
                self.status = e.to_string();
            }

            ui.separator();
            ui.label("Instruction:");
            ui.text_edit_singleline(&mut self.composition.instruction);
            let idle = !self.client.is_busy();
            if ui
                .add_enabled(idle, egui::Button::new("Generate"))
                .clicked()
            {
                match self.composition.generation_request() {
                    Ok(request) => match self.client.submit(request) {
                        Ok(()) => self.pending = Some(PendingRequest::Composition),
                        Err(e) => self.status = e.to_string(),
                    },
                    Err(e) => self.status = e.to_string(),
                }
            }
            if self.client.is_busy() {
                ui.spinner();
            }
        });
    }

    fn layer_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Gallery");
        ui.add(egui::TextEdit::singleline(&mut self.gallery_filter).hint_text("Search"));
        let assets = filter_assets(self.list_available_images(), &self.gallery_filter);
        for asset in &assets {
            ui.horizontal(|ui| {
                ui.label(&asset.label);
                if ui.small_button("Add").clicked() {
                    self.add_gallery_layer(&asset.id);
                }
                if ui.small_button("Edit").clicked() {
                    self.open_adjust_editor(&asset.id);
                }
            });
        }

        ui.separator();
        ui.heading("Layers");
        // Topmost first, matching the on-screen stack.
        let mut rows: Vec<_> = self
            .composition
            .layers()
            .iter()
            .map(|l| (l.id, l.z_index, layer_label(&l.content)))
            .collect();
        rows.sort_by_key(|(_, z, _)| std::cmp::Reverse(*z));
        for (id, _, label) in &rows {
            ui.horizontal(|ui| {
                let selected = self.composition.selected_id() == Some(*id);
                if ui.selectable_label(selected, label.as_str()).clicked() {
                    self.composition.select(*id);
                    self.mark_dirty();
                }
                if ui.small_button("⬆").clicked() {
                    self.composition.bring_to_front(*id);
                    self.mark_dirty();
                }
                if ui.small_button("⬇").clicked() {
                    self.composition.send_to_back(*id);
                    self.mark_dirty();
                }
                if ui.small_button("✕").clicked() {
                    self.composition.remove_layer(*id);
                    self.mark_dirty();
                }
            });
        }

        ui.separator();
        self.selected_layer_panel(ui);
    }

    fn selected_layer_panel(&mut self, ui: &mut egui::Ui) {
        let Some(layer) = self.composition.selected().cloned() else {
            ui.label("No layer selected");
            return;
        };
        ui.heading("Selected Layer");

        let mut scale = layer.scale;
        let mut rotation = layer.rotation;
        let mut opacity = layer.opacity;
        let mut flip = layer.flip_horizontal;
        let mut changed = false;
        changed |= ui
            .add(egui::Slider::new(&mut scale, LAYER_SCALE_MIN..=LAYER_SCALE_MAX).text("Scale"))
            .changed();
        changed |= ui
            .add(egui::Slider::new(&mut rotation, -180.0..=180.0).text("Rotation"))
            .changed();
        changed |= ui
            .add(egui::Slider::new(&mut opacity, 0.0..=1.0).text("Opacity"))
            .changed();
        changed |= ui.checkbox(&mut flip, "Flip horizontal").changed();

        let mut patch = LayerPatch {
            scale: Some(scale),
            rotation: Some(rotation),
            opacity: Some(opacity),
            flip_horizontal: Some(flip),
            ..Default::default()
        };

        if let LayerContent::Text {
            text,
            font_size,
            color,
            weight,
        } = &layer.content
        {
            let mut text = text.clone();
            let mut font_size = *font_size;
            let mut weight = *weight;
            let mut hex = format_hex_color(*color);
            changed |= ui.text_edit_singleline(&mut text).changed();
            changed |= ui
                .add(egui::Slider::new(&mut font_size, FONT_SIZE_MIN..=FONT_SIZE_MAX).text("Size"))
                .changed();
            ui.horizontal(|ui| {
                for option in [FontWeight::Normal, FontWeight::Bold] {
                    if ui
                        .selectable_label(weight == option, option.label())
                        .clicked()
                    {
                        weight = option;
                        changed = true;
                    }
                }
            });
            if ui.text_edit_singleline(&mut hex).changed()
                && let Some(rgba) = parse_hex_color(&hex)
            {
                patch.color = Some(rgba);
                changed = true;
            }
            patch.text = Some(text);
            patch.font_size = Some(font_size);
            patch.weight = Some(weight);
        }

        if changed {
            // Slider scrubbing is continuous; commit on release only.
            let release = ui.input(|i| i.pointer.any_released());
            self.composition.update_layer(layer.id, &patch, release);
            self.mark_dirty();
        }
    }

    // ---- single-image editor window -----------------------------------------

    fn adjust_window(&mut self, ctx: &egui::Context) {
        let Some(mut editor) = self.adjust.take() else {
            return;
        };
        let mut keep_open = true;
        let mut close_clicked = false;

        egui::Window::new("Edit Image")
            .open(&mut keep_open)
            .default_width(760.0)
            .show(ctx, |ui| {
                ui.horizontal_top(|ui| {
                    self.adjust_preview_ui(ui, &mut editor);
                    ui.vertical(|ui| {
                        self.adjust_controls_ui(ui, &mut editor, &mut close_clicked);
                    });
                });
            });

        // Ctrl/Cmd+Enter applies the current adjustments.
        let apply_shortcut =
            ctx.input_mut(|i| i.consume_key(egui::Modifiers::COMMAND, egui::Key::Enter));
        if apply_shortcut {
            match editor.apply(&mut self.host) {
                Ok(()) => self.adjust_dirty = true,
                Err(e) => self.status = e.to_string(),
            }
        }

        if !keep_open || close_clicked {
            drop(editor);
            // Abandon any edit request still in flight; its result would
            // target state that no longer exists.
            if matches!(
                self.pending,
                Some(PendingRequest::Inpaint) | Some(PendingRequest::Pose)
            ) {
                self.client.cancel();
                self.pending = None;
            }
            self.host.on_close();
        } else {
            self.adjust = Some(editor);
        }
    }

    fn adjust_preview_ui(&mut self, ui: &mut egui::Ui, editor: &mut AdjustEditor) {
        let preview_w = 420.0f32;
        let preview_h = preview_w / editor.crop.ratio();
        editor.set_viewport_width(preview_w);

        if self.adjust_dirty || self.adjust_preview.is_none() {
            match editor.flatten() {
                Ok(mut raster) => {
                    // Strokes are stored normalized, so replaying them at the
                    // raster size lines up with the on-screen brush position.
                    let (raster_w, raster_h) = (raster.width(), raster.height());
                    if !editor.mask.is_empty() {
                        overlay(&mut raster, &editor.mask.render(raster_w, raster_h));
                    }
                    if !editor.sketch.is_empty() {
                        overlay(
                            &mut raster,
                            &editor.sketch.render(raster_w, raster_h),
                        );
                    }
                    let size = [raster.width() as usize, raster.height() as usize];
                    let color = ColorImage::from_rgba_unmultiplied(size, raster.as_raw());
                    self.adjust_preview =
                        Some(ui.ctx().load_texture("adjust", color, TextureOptions::LINEAR));
                    self.adjust_dirty = false;
                }
                Err(e) => {
                    self.status = e.to_string();
                    self.adjust_dirty = false;
                }
            }
        }

        let (rect, response) =
            ui.allocate_exact_size(Vec2::new(preview_w, preview_h), Sense::click_and_drag());
        if let Some(texture) = &self.adjust_preview {
            ui.painter().image(
                texture.id(),
                rect,
                Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                Color32::WHITE,
            );
        }

        // Brush strokes overlay the preview; zoom clicks retarget the pan;
        // plain drags pan the view.
        if let Some(pos) = response.interact_pointer_pos() {
            let local = pos - rect.min;
            match self.composition.tool {
                StageTool::MaskBrush | StageTool::PoseBrush => {
                    let (surface, style) = if self.composition.tool == StageTool::MaskBrush {
                        (&mut editor.mask, StrokeStyle::Mask { eraser: false })
                    } else {
                        (
                            &mut editor.sketch,
                            StrokeStyle::Pen {
                                color: self.pen_color,
                            },
                        )
                    };
                    if response.drag_started() || response.clicked() {
                        surface.begin_stroke(
                            local.x,
                            local.y,
                            self.tool_brush_size,
                            style,
                            preview_w,
                            preview_h,
                        );
                        self.adjust_dirty = true;
                    } else if response.dragged() {
                        surface.extend_stroke(
                            local.x,
                            local.y,
                            self.tool_brush_size,
                            style,
                            preview_w,
                            preview_h,
                        );
                        self.adjust_dirty = true;
                    }
                }
                StageTool::Zoom => {
                    if response.clicked() {
                        let offset =
                            Vec2::new(local.x - preview_w / 2.0, local.y - preview_h / 2.0);
                        editor.adjustments.zoom_to_point(offset, self.macro_zoom);
                        self.adjust_dirty = true;
                    }
                }
                StageTool::Move => {
                    if response.dragged() {
                        let delta = response.drag_delta();
                        editor.adjustments.pan_by(delta.x, delta.y);
                        self.adjust_dirty = true;
                    }
                }
            }
        }

        // Keyboard nudges: arrows pan, +/- zoom.
        let adj = &mut editor.adjustments;
        let mut nudged = false;
        ui.input(|i| {
            if i.key_pressed(egui::Key::ArrowLeft) {
                adj.pan_by(-PAN_KEY_STEP, 0.0);
                nudged = true;
            }
            if i.key_pressed(egui::Key::ArrowRight) {
                adj.pan_by(PAN_KEY_STEP, 0.0);
                nudged = true;
            }
            if i.key_pressed(egui::Key::ArrowUp) {
                adj.pan_by(0.0, -PAN_KEY_STEP);
                nudged = true;
            }
            if i.key_pressed(egui::Key::ArrowDown) {
                adj.pan_by(0.0, PAN_KEY_STEP);
                nudged = true;
            }
            if i.key_pressed(egui::Key::PlusEquals) {
                adj.set_scale(adj.scale + ZOOM_KEY_STEP);
                nudged = true;
            }
            if i.key_pressed(egui::Key::Minus) {
                adj.set_scale(adj.scale - ZOOM_KEY_STEP);
                nudged = true;
            }
        });
        if nudged {
            self.adjust_dirty = true;
        }
    }

    fn adjust_controls_ui(
        &mut self,
        ui: &mut egui::Ui,
        editor: &mut AdjustEditor,
        close_clicked: &mut bool,
    ) {
        let mut changed = false;
        let adj = &mut editor.adjustments;
        for (label, value) in [
            ("Brightness", &mut adj.brightness),
            ("Contrast", &mut adj.contrast),
            ("Saturation", &mut adj.saturation),
        ] {
            changed |= ui
                .add(egui::Slider::new(value, ADJUST_PERCENT_MIN..=ADJUST_PERCENT_MAX).text(label))
                .changed();
        }
        changed |= ui
            .add(egui::Slider::new(&mut adj.rotation, -180.0..=180.0).text("Rotation"))
            .changed();
        ui.horizontal(|ui| {
            if ui.button("⟲ 90°").clicked() {
                adj.rotate_quarter(false);
                changed = true;
            }
            if ui.button("⟳ 90°").clicked() {
                adj.rotate_quarter(true);
                changed = true;
            }
            if ui.button("Fit").clicked() {
                adj.reset_view();
                changed = true;
            }
        });
        let mut zoom = adj.scale;
        if ui
            .add(egui::Slider::new(&mut zoom, ZOOM_MIN..=ZOOM_MAX).text("Zoom"))
            .changed()
        {
            adj.set_scale(zoom);
            changed = true;
        }

        // Crop presets plus the source's original ratio.
        let original = AspectRatio::Original(
            editor.source().width() as f32 / editor.source().height().max(1) as f32,
        );
        let mut crop = editor.crop;
        egui::ComboBox::from_id_source("crop")
            .selected_text(crop.label())
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut crop, original, original.label());
                for preset in AspectRatio::presets() {
                    ui.selectable_value(&mut crop, *preset, preset.label());
                }
            });
        if crop != editor.crop {
            editor.crop = crop;
            changed = true;
        }

        ui.separator();
        ui.horizontal(|ui| {
            for tool in [
                StageTool::Move,
                StageTool::MaskBrush,
                StageTool::PoseBrush,
                StageTool::Zoom,
            ] {
                if ui
                    .selectable_label(self.composition.tool == tool, tool.label())
                    .clicked()
                {
                    self.composition.tool = tool;
                }
            }
        });
        ui.add(
            egui::Slider::new(&mut self.tool_brush_size, BRUSH_SIZE_MIN..=BRUSH_SIZE_MAX)
                .text("Brush"),
        );
        if self.composition.tool == StageTool::Zoom {
            ui.add(
                egui::Slider::new(&mut self.macro_zoom, MACRO_ZOOM_MIN..=MACRO_ZOOM_MAX)
                    .text("Zoom level"),
            );
        }
        if self.composition.tool == StageTool::PoseBrush {
            ui.horizontal(|ui| {
                for color in PEN_COLORS {
                    let swatch = Color32::from_rgb(color[0], color[1], color[2]);
                    if ui.add(egui::Button::new("  ").fill(swatch)).clicked() {
                        self.pen_color = color;
                    }
                }
            });
        }
        ui.horizontal(|ui| {
            if ui.button("Clear mask").clicked() {
                editor.mask.clear();
                self.adjust_dirty = true;
            }
            if ui.button("Clear sketch").clicked() {
                editor.sketch.clear();
                self.adjust_dirty = true;
            }
        });

        ui.separator();
        ui.label("Instruction:");
        ui.text_edit_multiline(&mut editor.instruction);
        let idle = !self.client.is_busy();
        ui.horizontal(|ui| {
            if ui.add_enabled(idle, egui::Button::new("Inpaint")).clicked() {
                match editor.inpaint_request() {
                    Ok(request) => match self.client.submit(request) {
                        Ok(()) => self.pending = Some(PendingRequest::Inpaint),
                        Err(e) => self.status = e.to_string(),
                    },
                    Err(e) => self.status = e.to_string(),
                }
            }
            if ui
                .add_enabled(idle, egui::Button::new("Match Pose"))
                .clicked()
            {
                match editor.pose_request() {
                    Ok(request) => match self.client.submit(request) {
                        Ok(()) => self.pending = Some(PendingRequest::Pose),
                        Err(e) => self.status = e.to_string(),
                    },
                    Err(e) => self.status = e.to_string(),
                }
            }
        });

        ui.separator();
        ui.horizontal(|ui| {
            if ui.button("Apply").clicked() {
                match editor.apply(&mut self.host) {
                    Ok(()) => self.adjust_dirty = true,
                    Err(e) => self.status = e.to_string(),
                }
            }
            if ui.button("Download…").clicked() {
                match editor.download() {
                    Ok(raster) => {
                        if let Some(path) = rfd::FileDialog::new()
                            .add_filter("PNG image", &["png"])
                            .set_file_name("adjusted.png")
                            .save_file()
                            && let Err(e) = raster.save(&path)
                        {
                            self.status = format!("Save failed: {}", e);
                        }
                    }
                    Err(e) => self.status = e.to_string(),
                }
            }
            if ui.button("Cancel").clicked() {
                *close_clicked = true;
            }
        });

        if changed {
            self.adjust_dirty = true;
        }
    }
}

impl eframe::App for CanvasStudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_generation();
        self.drain_host();
        if self.client.is_busy() {
            ctx.request_repaint();
        }

        // Global undo/redo shortcuts (redo checked first so shift+Z is not
        // swallowed by the plain-Z binding).
        let redo = ctx.input_mut(|i| {
            i.consume_key(egui::Modifiers::COMMAND | egui::Modifiers::SHIFT, egui::Key::Z)
                || i.consume_key(egui::Modifiers::COMMAND, egui::Key::Y)
        });
        let undo = ctx.input_mut(|i| i.consume_key(egui::Modifiers::COMMAND, egui::Key::Z));
        if redo && self.composition.redo() {
            self.mark_dirty();
        }
        if undo && self.composition.undo() {
            self.mark_dirty();
        }

        egui::TopBottomPanel::top("topbar").show(ctx, |ui| self.top_bar(ui));
        egui::SidePanel::right("layers")
            .default_width(260.0)
            .show(ctx, |ui| self.layer_panel(ui));
        if !self.status.is_empty() {
            let status = self.status.clone();
            egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(status);
                    if ui.small_button("✕").clicked() {
                        self.status.clear();
                    }
                });
            });
        }
        egui::CentralPanel::default().show(ctx, |ui| {
            self.refresh_preview(ui.ctx());
            self.stage_ui(ui);
        });

        self.adjust_window(ctx);
        self.drain_host();
    }
}

impl AssetProvider for CanvasStudioApp {
    fn list_available_images(&self) -> Vec<AssetRef> {
        self.gallery.clone()
    }
}

/// Case-insensitive label substring filter for the gallery picker.
fn filter_assets(assets: Vec<AssetRef>, query: &str) -> Vec<AssetRef> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return assets;
    }
    assets
        .into_iter()
        .filter(|a| a.label.to_lowercase().contains(&q))
        .collect()
}

fn layer_label(content: &LayerContent) -> String {
    match content {
        LayerContent::Image { source } => source.clone(),
        LayerContent::Text { text, .. } => format!("\"{}\"", text),
    }
}

/// Straight-alpha src-over of `src` onto `dst` (same dimensions).
fn overlay(dst: &mut RgbaImage, src: &RgbaImage) {
    for (d, s) in dst.pixels_mut().zip(src.pixels()) {
        let sa = s.0[3] as f32 / 255.0;
        if sa <= 0.0 {
            continue;
        }
        for c in 0..3 {
            d.0[c] = (s.0[c] as f32 * sa + d.0[c] as f32 * (1.0 - sa)).round() as u8;
        }
        let da = d.0[3] as f32 / 255.0;
        d.0[3] = ((sa + da * (1.0 - sa)) * 255.0).round() as u8;
    }
}

/// Checkerboard used for the on-screen grid background.
fn paint_checker(painter: &egui::Painter, rect: Rect) {
    let light = Color32::from_gray(70);
    let dark = Color32::from_gray(50);
    painter.rect_filled(rect, 0.0, dark);
    let mut y = rect.min.y;
    let mut row = 0;
    while y < rect.max.y {
        let mut x = rect.min.x + if row % 2 == 0 { 0.0 } else { GRID_CELL };
        while x < rect.max.x {
            let cell = Rect::from_min_size(
                Pos2::new(x, y),
                Vec2::new(GRID_CELL.min(rect.max.x - x), GRID_CELL.min(rect.max.y - y)),
            );
            painter.rect_filled(cell, 0.0, light);
            x += GRID_CELL * 2.0;
        }
        y += GRID_CELL;
        row += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(label: &str) -> AssetRef {
        AssetRef {
            id: label.to_string(),
            url: String::new(),
            label: label.to_string(),
        }
    }

    #[test]
    fn gallery_filter_matches_label_substring_case_insensitive() {
        let assets = vec![asset("Sunset Beach"), asset("portrait-01"), asset("City")];

        let hits = filter_assets(assets.clone(), "PORT");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, "portrait-01");

        // Blank and whitespace-only queries pass everything through.
        assert_eq!(filter_assets(assets.clone(), "").len(), 3);
        assert_eq!(filter_assets(assets.clone(), "   ").len(), 3);
        assert!(filter_assets(assets, "zebra").is_empty());
    }
}
