//! Error taxonomy.
//!
//! All editing-session errors are synchronous and recoverable: they leave the
//! layer stack, history and adjustment state untouched so the user can fix
//! the input and retry.  The flatten path is the one all-or-nothing boundary:
//! it either returns a complete raster or a [`FlattenError`], never a
//! partially drawn composite.

use thiserror::Error;

/// Failures while rendering the layer stack (or an adjusted single image)
/// into the output raster.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlattenError {
    /// An image layer references a source that was never decoded into a
    /// bitmap.  The whole flatten is aborted — a silently incomplete
    /// composite is worse than a visible failure.
    #[error("no decoded bitmap for image source '{0}'")]
    MissingBitmap(String),

    /// Output raster would have a zero dimension.
    #[error("output raster has zero size ({width}×{height})")]
    EmptyOutput { width: u32, height: u32 },

    /// Raster byte buffer could not be assembled into an image.
    #[error("failed to assemble output raster")]
    BadRaster,
}

/// Rejected user actions.  Raised *before* any asynchronous work starts and
/// before any history mutation.
#[derive(Debug, Error, PartialEq)]
pub enum EditError {
    /// The reference/layer count is already at its maximum.
    #[error("layer limit reached ({0} layers maximum)")]
    LayerLimit(usize),

    /// Inpaint requested with no painted mask.
    #[error("paint a mask over the region to edit first")]
    EmptyMask,

    /// Pose match requested with no sketch strokes.
    #[error("draw a pose sketch first")]
    EmptySketch,

    /// A required instruction/prompt field was blank.
    #[error("instruction text is required")]
    BlankInstruction,

    /// A generative request is already in flight.
    #[error("a generation request is already running")]
    Busy,

    /// Assembling the request's reference raster failed.
    #[error(transparent)]
    Flatten(#[from] FlattenError),
}

/// Typed failure from the external generative service boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("generation rejected: {0}")]
    Rejected(String),

    #[error("generation failed: {0}")]
    Failed(String),

    /// The worker thread died before sending a result.
    #[error("generation worker disconnected")]
    Disconnected,
}
