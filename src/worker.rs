use crate::capture::FrameSource;
use crate::config::CameraId;
use crate::counter::DetectionCounter;
use crate::error::Result;
use crate::rotation::SegmentRotator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a worker does with each captured frame.
pub enum WorkerMode {
    Record(SegmentRotator),
    Count(DetectionCounter),
}

/// Drives one camera's frame loop. Exclusively owns its capture handle and
/// per-mode state; the only thing shared with other workers is the
/// aggregation store handle inside `DetectionCounter`.
pub struct CameraWorker {
    camera_id: CameraId,
    source: Box<dyn FrameSource>,
    mode: WorkerMode,
    cancel: CancellationToken,
}

impl CameraWorker {
    pub fn new(
        camera_id: CameraId,
        source: Box<dyn FrameSource>,
        mode: WorkerMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            camera_id,
            source,
            mode,
            cancel,
        }
    }

    /// Run to completion: normal end of stream, a propagated error, or
    /// global cancellation. Cleanup (sealing an open segment, releasing the
    /// capture handle) runs on every exit path.
    pub async fn run(mut self) -> Result<()> {
        info!("Camera {}: worker started", self.camera_id);

        let loop_result = self.frame_loop().await;
        let cleanup_result = self.cleanup().await;

        if let Err(e) = self.source.release().await {
            warn!("Camera {}: failed to release capture handle: {}", self.camera_id, e);
        }
        info!("Camera {}: worker stopped", self.camera_id);

        loop_result.and(cleanup_result)
    }

    async fn frame_loop(&mut self) -> Result<()> {
        loop {
            // Cooperative cancellation, polled once per iteration. A worker
            // blocked inside a read or detection call observes it on return.
            if self.cancel.is_cancelled() {
                info!("Camera {}: cancellation requested", self.camera_id);
                return Ok(());
            }

            let frame = match self.source.read_frame().await? {
                Some(frame) => frame,
                None => {
                    // Worker-local: this camera's loop ends, the session and
                    // its peers continue.
                    info!("Camera {}: stopped yielding frames", self.camera_id);
                    return Ok(());
                }
            };

            match &mut self.mode {
                WorkerMode::Record(rotator) => {
                    rotator.handle_frame(&frame).await?;
                }
                WorkerMode::Count(counter) => {
                    counter.process_frame(&frame).await?;
                }
            }
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        if let WorkerMode::Record(rotator) = &mut self.mode {
            rotator.close().await?;
        }
        Ok(())
    }
}
