use crate::error::Result;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Minimum confidence for a detection to be considered at all.
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

/// Object class counted by the occupancy pipeline.
pub const PERSON_CLASS: &str = "person";

/// Axis-aligned detection box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// One detected object as reported by the external detection engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Class label, e.g. "person"
    pub class: String,
    /// Engine confidence in [0, 1]
    pub confidence: f32,
    /// Location of the object in the frame
    pub bbox: BoundingBox,
}

/// Contract for the external detection engine. An implementation is provided
/// by the deployment (typically a YOLO binding); the counting pipeline only
/// consumes its output.
///
/// Errors are propagated and terminate the owning camera worker; the engine
/// is assumed reliable within a session, so there is no per-frame retry.
#[async_trait]
pub trait Detector: Send {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Creates one engine instance per camera worker, mirroring the capture
/// backend: each worker exclusively owns its detector for the session.
#[async_trait]
pub trait DetectorFactory: Send + Sync {
    async fn create(&self, camera_id: &crate::config::CameraId) -> Result<Box<dyn Detector>>;
}
