//! Trait seam for the external frame-capture/encode library.
//!
//! The session core never talks to a camera or muxer directly; it drives
//! these contracts. The GStreamer backend behind the `camera` feature is the
//! production implementation, and tests substitute scripted sources and
//! in-memory writers.

use crate::config::CameraId;
use crate::error::Result;
use crate::frame::Frame;
use async_trait::async_trait;
use std::path::Path;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub mod gst;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst::{GstCaptureBackend, GstWriterFactory};

/// A stream of frames from one opened camera. Exclusively owned by the
/// camera's worker for the worker's lifetime.
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next frame in capture order. `Ok(None)` means the source has
    /// stopped yielding frames (end of stream), which ends the worker's loop
    /// without failing the session.
    async fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying capture handle. Called exactly once on every
    /// worker exit path.
    async fn release(&mut self) -> Result<()>;
}

/// Writer for one recording segment. Implementations scale incoming frames
/// to the target size given at open time before muxing them.
#[async_trait]
pub trait SegmentWriter: Send {
    async fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize the container and close the artifact. The writer must not be
    /// used afterwards.
    async fn finish(&mut self) -> Result<()>;
}

/// Opens segment writers for the rotator.
#[async_trait]
pub trait WriterFactory: Send + Sync {
    /// Container extension for artifact file names (e.g. `mp4`).
    fn extension(&self) -> &'static str;

    async fn open_writer(
        &self,
        path: &Path,
        fps: f64,
        frame_size: (u32, u32),
    ) -> Result<Box<dyn SegmentWriter>>;
}

/// Opens capture handles at session start.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open_source(&self, camera_id: &CameraId) -> Result<Box<dyn FrameSource>>;
}
