//! Pointer interaction controller for the composition stage.
//!
//! The active tool is an explicit mode; every mode funnels through the same
//! start / move / end shape.  Drag-to-move applies uncommitted live updates
//! each frame and asks for a single history commit at release, so a whole
//! drag collapses into one entry.  Wheel gestures adjust scale (or rotation
//! with ctrl/cmd held) and request a commit per tick, so each tick is
//! individually undoable.

use egui::{Pos2, Vec2};
use uuid::Uuid;

use crate::geometry::StageLayout;
use crate::layer::{Layer, LayerPatch, LayerStore};

/// Scale step per wheel tick, clamped by the store to the layer range.
pub const WHEEL_SCALE_STEP: f32 = 0.05;
/// Rotation step (degrees) per modified wheel tick.
pub const WHEEL_ROTATE_STEP: f32 = 5.0;

/// Active stage tool.  Brush tools route pointer events to their paint
/// surface instead of the layer store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StageTool {
    #[default]
    Move,
    MaskBrush,
    PoseBrush,
    Zoom,
}

impl StageTool {
    pub fn label(&self) -> &'static str {
        match self {
            StageTool::Move => "Move",
            StageTool::MaskBrush => "Mask",
            StageTool::PoseBrush => "Pose",
            StageTool::Zoom => "Zoom",
        }
    }
}

/// What the caller should do after an event: nothing, or commit the live
/// store to history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    None,
    Commit,
}

impl Outcome {
    pub fn commits(&self) -> bool {
        *self == Outcome::Commit
    }
}

struct DragState {
    layer_id: Uuid,
    last_screen: Pos2,
    moved: bool,
}

/// Tracks the in-flight drag.  Owns no layer data; all mutation goes
/// through the [`LayerStore`] so commits stay capturable.
#[derive(Default)]
pub struct PointerController {
    drag: Option<DragState>,
}

impl PointerController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Pointer-down on the stage at `screen_pos` (visual px relative to
    /// the stage origin).  Hits select and begin a drag; empty space
    /// deselects.  `intrinsic_size` reports unscaled content extents for
    /// hit testing.
    pub fn pointer_down<F>(
        &mut self,
        store: &mut LayerStore,
        layout: &StageLayout,
        screen_pos: Pos2,
        intrinsic_size: F,
    ) -> Outcome
    where
        F: Fn(&Layer) -> Option<(f32, f32)>,
    {
        let Some(canvas_pos) = layout.screen_to_canvas(screen_pos) else {
            return Outcome::None;
        };
        match store.hit_test(canvas_pos, intrinsic_size) {
            Some(id) => {
                store.select(id);
                self.drag = Some(DragState {
                    layer_id: id,
                    last_screen: screen_pos,
                    moved: false,
                });
            }
            None => {
                store.deselect();
                self.drag = None;
            }
        }
        Outcome::None
    }

    /// Pointer-move: convert the screen delta to a logical delta and apply
    /// it as an uncommitted live update to the dragged layer.
    pub fn pointer_move(
        &mut self,
        store: &mut LayerStore,
        layout: &StageLayout,
        screen_pos: Pos2,
    ) -> Outcome {
        let Some(drag) = self.drag.as_mut() else {
            return Outcome::None;
        };
        let delta: Vec2 = screen_pos - drag.last_screen;
        let Some(canvas_delta) = layout.screen_delta_to_canvas(delta) else {
            return Outcome::None;
        };
        if canvas_delta != Vec2::ZERO
            && let Some(layer) = store.get(drag.layer_id)
        {
            let patch = LayerPatch::translate(canvas_delta.x, canvas_delta.y, layer);
            store.update(drag.layer_id, &patch);
            drag.moved = true;
        }
        drag.last_screen = screen_pos;
        Outcome::None
    }

    /// Pointer-up: end the drag.  Requests exactly one commit when any
    /// movement was applied; a click without movement commits nothing.
    pub fn pointer_up(&mut self) -> Outcome {
        match self.drag.take() {
            Some(drag) if drag.moved => Outcome::Commit,
            _ => Outcome::None,
        }
    }

    /// Wheel tick over the stage.  Plain wheel scales the selected layer
    /// (up = grow); with ctrl/cmd held it rotates instead.  Each tick
    /// requests its own commit.  No-op without a selection.
    pub fn wheel(&mut self, store: &mut LayerStore, scroll_up: bool, rotate: bool) -> Outcome {
        let Some(layer) = store.selected() else {
            return Outcome::None;
        };
        let direction = if scroll_up { 1.0 } else { -1.0 };
        let patch = if rotate {
            LayerPatch {
                rotation: Some(layer.rotation + WHEEL_ROTATE_STEP * direction),
                ..Default::default()
            }
        } else {
            LayerPatch {
                scale: Some(layer.scale + WHEEL_SCALE_STEP * direction),
                ..Default::default()
            }
        };
        let id = layer.id;
        store.update(id, &patch);
        Outcome::Commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryManager;
    use crate::layer::{LAYER_SCALE_MAX, LAYER_SCALE_MIN};

    fn half_scale_layout() -> StageLayout {
        StageLayout {
            visual_w: 512.0,
            visual_h: 512.0,
            canvas_w: 1024,
            canvas_h: 1024,
        }
    }

    fn size_any(_: &Layer) -> Option<(f32, f32)> {
        Some((400.0, 400.0))
    }

    #[test]
    fn drag_batches_into_one_commit() {
        // 100 screen px right at visual scale 0.5 moves the
        // layer 200 logical px, and release adds exactly one entry.
        let mut store = LayerStore::new();
        let mut history = HistoryManager::new();
        let mut ctl = PointerController::new();
        let layout = half_scale_layout();

        let id = store.add_image("img1".into(), 1024, 1024);
        history.commit(store.snapshot());
        let x0 = store.get(id).unwrap().x;

        ctl.pointer_down(&mut store, &layout, Pos2::new(256.0, 256.0), size_any);
        assert!(ctl.is_dragging());
        // Two move events, 50 screen px each.
        ctl.pointer_move(&mut store, &layout, Pos2::new(306.0, 256.0));
        ctl.pointer_move(&mut store, &layout, Pos2::new(356.0, 256.0));
        assert_eq!(store.get(id).unwrap().x, x0 + 200.0);
        assert_eq!(history.len(), 2); // no commits mid-drag

        let outcome = ctl.pointer_up();
        assert!(outcome.commits());
        history.commit(store.snapshot());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn click_without_movement_commits_nothing() {
        let mut store = LayerStore::new();
        let mut ctl = PointerController::new();
        let layout = half_scale_layout();
        store.add_image("img1".into(), 1024, 1024);

        ctl.pointer_down(&mut store, &layout, Pos2::new(256.0, 256.0), size_any);
        assert!(!ctl.pointer_up().commits());
    }

    #[test]
    fn empty_click_deselects() {
        let mut store = LayerStore::new();
        let mut ctl = PointerController::new();
        let layout = half_scale_layout();
        let id = store.add_image("img1".into(), 1024, 1024);
        assert_eq!(store.selected_id(), Some(id));

        // Far corner, outside the 400×400 content at canvas center.
        ctl.pointer_down(&mut store, &layout, Pos2::new(5.0, 5.0), size_any);
        assert_eq!(store.selected_id(), None);
        assert!(!ctl.is_dragging());
    }

    #[test]
    fn wheel_scales_and_clamps() {
        let mut store = LayerStore::new();
        let mut ctl = PointerController::new();
        let id = store.add_image("img1".into(), 1024, 1024);

        assert!(ctl.wheel(&mut store, true, false).commits());
        assert!((store.get(id).unwrap().scale - 0.55).abs() < 1e-6);

        for _ in 0..200 {
            ctl.wheel(&mut store, true, false);
        }
        assert_eq!(store.get(id).unwrap().scale, LAYER_SCALE_MAX);
        for _ in 0..200 {
            ctl.wheel(&mut store, false, false);
        }
        assert_eq!(store.get(id).unwrap().scale, LAYER_SCALE_MIN);
    }

    #[test]
    fn modified_wheel_rotates_in_degree_steps() {
        let mut store = LayerStore::new();
        let mut ctl = PointerController::new();
        let id = store.add_image("img1".into(), 1024, 1024);

        ctl.wheel(&mut store, true, true);
        ctl.wheel(&mut store, true, true);
        ctl.wheel(&mut store, false, true);
        assert_eq!(store.get(id).unwrap().rotation, WHEEL_ROTATE_STEP);
        // Rotation accumulates without normalization.
        for _ in 0..100 {
            ctl.wheel(&mut store, true, true);
        }
        assert_eq!(store.get(id).unwrap().rotation, 505.0);
    }

    #[test]
    fn wheel_without_selection_is_noop() {
        let mut store = LayerStore::new();
        let mut ctl = PointerController::new();
        store.add_image("img1".into(), 1024, 1024);
        store.deselect();
        assert!(!ctl.wheel(&mut store, true, false).commits());
    }
}
