use crate::config::CameraId;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One captured frame with its metadata.
///
/// Pixel data is shared rather than cloned so a frame can cross task
/// boundaries without copying the payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Camera this frame was captured from
    pub camera_id: CameraId,
    /// Monotonic per-camera sequence number
    pub sequence: u64,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Encoded or raw frame payload
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    pub fn new(
        camera_id: CameraId,
        sequence: u64,
        timestamp: DateTime<Utc>,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Self {
        Self {
            camera_id,
            sequence,
            timestamp,
            width,
            height,
            data: Arc::new(data),
        }
    }
}
