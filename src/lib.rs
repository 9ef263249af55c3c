//! CanvasStudio core: a layer-based compositing and image-editing engine
//! for an AI image generation front end.
//!
//! The engine is split between the multi-layer composition session
//! (layers, history, pointer gestures, flatten) and the single-image
//! adjustment session (color filters, crop, inpaint mask, pose sketch).
//! The egui shell in [`app`] is a thin consumer of both.

pub mod logger;

pub mod adjust;
pub mod app;
pub mod compositor;
pub mod error;
pub mod geometry;
pub mod history;
pub mod interaction;
pub mod layer;
pub mod paint;
pub mod service;
pub mod session;
pub mod text;
