//! Generative service boundary.
//!
//! The model call itself is external; the core only owns the request gate:
//! one request in flight at a time, a busy flag the UI disables triggers
//! on, and a generation counter so a result from an abandoned request can
//! never update newer state.  Work runs on a detached worker thread and is
//! polled from the UI loop with `try_recv`.

use image::RgbaImage;
use std::sync::mpsc;
use std::sync::Arc;

use crate::error::{EditError, ServiceError};
use crate::geometry::AspectRatio;
use crate::log_info;

/// One generative request.  Reference and overlay rasters are fully
/// flattened before submission; the service never sees layer state.
pub struct GenerationRequest {
    pub instruction: String,
    pub aspect: AspectRatio,
    pub references: Vec<RgbaImage>,
    /// Flattened inpaint mask, when the request is a localized edit.
    pub mask: Option<RgbaImage>,
    /// Flattened pose sketch, when the request is a pose transfer.
    pub sketch: Option<RgbaImage>,
}

/// External image generator.  Implementations run on the worker thread and
/// may block.
pub trait GenerativeService: Send + Sync + 'static {
    fn generate(&self, request: GenerationRequest) -> Result<RgbaImage, ServiceError>;
}

type WorkerResult = (u64, Result<RgbaImage, ServiceError>);

/// Client side of the boundary: submit / poll / cancel.
pub struct ServiceClient {
    service: Arc<dyn GenerativeService>,
    receiver: Option<mpsc::Receiver<WorkerResult>>,
    generation: u64,
    busy: bool,
}

impl ServiceClient {
    pub fn new(service: Arc<dyn GenerativeService>) -> Self {
        Self {
            service,
            receiver: None,
            generation: 0,
            busy: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Start a request on a worker thread.  Refused while one is already
    /// outstanding.
    pub fn submit(&mut self, request: GenerationRequest) -> Result<(), EditError> {
        if self.busy {
            return Err(EditError::Busy);
        }
        self.generation += 1;
        let generation = self.generation;
        let (tx, rx) = mpsc::channel();
        let service = Arc::clone(&self.service);
        log_info!("generation {} submitted", generation);
        std::thread::spawn(move || {
            let result = service.generate(request);
            // Receiver may be gone if the session was abandoned.
            let _ = tx.send((generation, result));
        });
        self.receiver = Some(rx);
        self.busy = true;
        Ok(())
    }

    /// Abandon the in-flight request.  The worker finishes on its own; its
    /// result is dropped.
    pub fn cancel(&mut self) {
        if self.busy {
            log_info!("generation {} abandoned", self.generation);
        }
        self.receiver = None;
        self.busy = false;
    }

    /// Non-blocking poll, called once per UI frame.  Returns the finished
    /// result, clearing the busy flag.  Results from a superseded
    /// generation are discarded.
    pub fn poll(&mut self) -> Option<Result<RgbaImage, ServiceError>> {
        let rx = self.receiver.as_ref()?;
        match rx.try_recv() {
            Ok((generation, result)) => {
                self.receiver = None;
                self.busy = false;
                if generation != self.generation {
                    return None;
                }
                Some(result)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                // Worker died without sending.
                self.receiver = None;
                self.busy = false;
                Some(Err(ServiceError::Disconnected))
            }
        }
    }
}
