use crate::capture::{SegmentWriter, WriterFactory};
use crate::clock::Clock;
use crate::config::{CameraId, RecordingOptions};
use crate::error::Result;
use crate::frame::Frame;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Fixed recording segment length.
pub const DEFAULT_SEGMENT_SECONDS: i64 = 60;

/// One sealed recording artifact spanning a fixed time window for one camera.
#[derive(Debug, Clone)]
pub struct RecordingSegment {
    pub camera_id: CameraId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_path: PathBuf,
}

struct ActiveSegment {
    start_time: DateTime<Utc>,
    file_path: PathBuf,
    writer: Box<dyn SegmentWriter>,
}

/// Per-camera segment lifecycle: Idle (no writer) and Recording (writer
/// open). Rotation at the duration boundary swaps the underlying writer
/// without stopping the frame loop.
pub struct SegmentRotator {
    camera_id: CameraId,
    options: RecordingOptions,
    segment_duration: Duration,
    factory: Arc<dyn WriterFactory>,
    clock: Arc<dyn Clock>,
    active: Option<ActiveSegment>,
}

impl SegmentRotator {
    pub fn new(
        camera_id: CameraId,
        options: RecordingOptions,
        factory: Arc<dyn WriterFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_segment_duration(
            camera_id,
            options,
            factory,
            clock,
            Duration::seconds(DEFAULT_SEGMENT_SECONDS),
        )
    }

    pub fn with_segment_duration(
        camera_id: CameraId,
        options: RecordingOptions,
        factory: Arc<dyn WriterFactory>,
        clock: Arc<dyn Clock>,
        segment_duration: Duration,
    ) -> Self {
        Self {
            camera_id,
            options,
            segment_duration,
            factory,
            clock,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Accept one frame, rotating first if the current segment has reached
    /// its boundary. Returns the segment sealed by that rotation, if any.
    pub async fn handle_frame(&mut self, frame: &Frame) -> Result<Option<RecordingSegment>> {
        let now = self.clock.now();

        let boundary_reached = self
            .active
            .as_ref()
            .map(|active| now >= active.start_time + self.segment_duration)
            .unwrap_or(false);

        let mut sealed = None;
        if boundary_reached {
            sealed = self.seal(now).await?;
        }

        if self.active.is_none() {
            // A rotation's replacement segment starts exactly where the
            // sealed one ended, keeping boundaries contiguous.
            let start = sealed.as_ref().map(|s| s.end_time).unwrap_or(now);
            self.open_segment(start).await?;
        }

        if let Some(active) = self.active.as_mut() {
            active.writer.write_frame(frame).await?;
        }

        Ok(sealed)
    }

    /// Seal any open segment. Used on shutdown and when the capture handle
    /// stops yielding frames mid-segment.
    pub async fn close(&mut self) -> Result<Option<RecordingSegment>> {
        let end_time = self.clock.now();
        self.seal(end_time).await
    }

    async fn seal(&mut self, end_time: DateTime<Utc>) -> Result<Option<RecordingSegment>> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };

        active.writer.finish().await?;
        let segment = RecordingSegment {
            camera_id: self.camera_id.clone(),
            start_time: active.start_time,
            end_time,
            file_path: active.file_path,
        };
        info!(
            "Camera {}: sealed segment {} ({} -> {})",
            self.camera_id,
            segment.file_path.display(),
            segment.start_time.format("%H:%M:%S"),
            segment.end_time.format("%H:%M:%S"),
        );
        Ok(Some(segment))
    }

    async fn open_segment(&mut self, start_time: DateTime<Utc>) -> Result<()> {
        let directory = segment_directory(
            &self.options.base_path,
            &self.camera_id,
            start_time.date_naive(),
        );
        // Idempotent; the date rarely changes mid-session but the check is
        // cheap enough to run on every rotation.
        fs::create_dir_all(&directory).await?;

        let file_name = format!(
            "{}.{}",
            start_time.format("%Y-%m-%d_%H-%M-%S"),
            self.factory.extension()
        );
        let file_path = directory.join(file_name);
        debug!(
            "Camera {}: opening segment {}",
            self.camera_id,
            file_path.display()
        );

        let writer = self
            .factory
            .open_writer(&file_path, self.options.fps, self.options.frame_size)
            .await?;

        self.active = Some(ActiveSegment {
            start_time,
            file_path,
            writer,
        });
        Ok(())
    }
}

/// `{base}/camera_{id}/{YYYY-MM-DD}` directory for a camera and date.
pub fn segment_directory(base_path: &Path, camera_id: &CameraId, date: NaiveDate) -> PathBuf {
    base_path
        .join(format!("camera_{}", camera_id))
        .join(date.format("%Y-%m-%d").to_string())
}
