use crate::capture::{CaptureBackend, FrameSource, WriterFactory};
use crate::clock::{Clock, SystemClock};
use crate::config::{CameraEntry, RecordingOptions, SessionConfig};
use crate::counter::DetectionCounter;
use crate::detector::DetectorFactory;
use crate::error::Result;
use crate::rotation::SegmentRotator;
use crate::store::AggregationStore;
use crate::worker::{CameraWorker, WorkerMode};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Opens every configured camera, runs one worker per camera to completion,
/// and coordinates shutdown.
///
/// Opening is fail-fast: if any configured camera cannot be opened the whole
/// session aborts before a single worker starts, so operators never get a
/// silently degraded multi-camera corpus. There is no reopen retry; the
/// caller restarts the session.
pub struct SessionSupervisor {
    config: SessionConfig,
    backend: Arc<dyn CaptureBackend>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl SessionSupervisor {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn CaptureBackend>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            backend,
            cancel,
            clock: Arc::new(SystemClock),
        }
    }

    /// Substitute the wall clock; used by tests running simulated time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Recording session: one segment rotator per camera.
    pub async fn run_recording(
        &self,
        options: RecordingOptions,
        factory: Arc<dyn WriterFactory>,
    ) -> Result<()> {
        let opened = self.open_all().await?;

        let mut workers = JoinSet::new();
        for (entry, source) in opened {
            let rotator = SegmentRotator::new(
                entry.camera_id.clone(),
                options.clone(),
                factory.clone(),
                self.clock.clone(),
            );
            workers.spawn(
                CameraWorker::new(
                    entry.camera_id,
                    source,
                    WorkerMode::Record(rotator),
                    self.cancel.clone(),
                )
                .run(),
            );
        }

        self.join_all(workers).await;
        Ok(())
    }

    /// Counting session: one ROI-gated counter per camera, all sharing the
    /// aggregation store. The store is closed exactly once on every exit
    /// path, including the abort paths, after no worker can touch it.
    pub async fn run_counting(
        &self,
        store: Arc<AggregationStore>,
        detectors: Arc<dyn DetectorFactory>,
    ) -> Result<()> {
        let opened = match self.open_all().await {
            Ok(opened) => opened,
            Err(e) => {
                Self::close_store(&store).await;
                return Err(e);
            }
        };

        // Engine instances are created before any worker starts so a failure
        // here aborts the session the same way a failed open does.
        let mut pending = Vec::with_capacity(opened.len());
        let mut opened = opened.into_iter();
        while let Some((entry, source)) = opened.next() {
            match detectors.create(&entry.camera_id).await {
                Ok(detector) => pending.push((entry, source, detector)),
                Err(e) => {
                    error!(
                        "Detection engine for camera {} unavailable, aborting session: {}",
                        entry.camera_id, e
                    );
                    let held = pending
                        .into_iter()
                        .map(|(entry, source, _)| (entry, source))
                        .chain(std::iter::once((entry, source)))
                        .chain(opened);
                    for (aborted, mut source) in held {
                        if let Err(release_err) = source.release().await {
                            warn!(
                                "Camera {}: release during abort failed: {}",
                                aborted.camera_id, release_err
                            );
                        }
                    }
                    Self::close_store(&store).await;
                    return Err(e);
                }
            }
        }

        let mut workers = JoinSet::new();
        for (entry, source, detector) in pending {
            let counter = DetectionCounter::new(
                entry.camera_id.clone(),
                entry.roi,
                detector,
                store.clone(),
                self.clock.clone(),
            );
            workers.spawn(
                CameraWorker::new(
                    entry.camera_id,
                    source,
                    WorkerMode::Count(counter),
                    self.cancel.clone(),
                )
                .run(),
            );
        }

        self.join_all(workers).await;
        store.close().await?;
        Ok(())
    }

    /// Close the shared store during an abort, where the open/create error
    /// already decides the session's result.
    async fn close_store(store: &AggregationStore) {
        if let Err(e) = store.close().await {
            warn!("Aggregation store close during abort failed: {}", e);
        }
    }

    /// Open a capture handle for every configured camera before any worker
    /// starts. On failure, handles opened so far are released and the whole
    /// session aborts.
    async fn open_all(&self) -> Result<Vec<(CameraEntry, Box<dyn FrameSource>)>> {
        let mut opened: Vec<(CameraEntry, Box<dyn FrameSource>)> = Vec::new();
        for entry in &self.config.cameras {
            match self.backend.open_source(&entry.camera_id).await {
                Ok(source) => opened.push((entry.clone(), source)),
                Err(e) => {
                    error!(
                        "Camera {} could not be opened, aborting session: {}",
                        entry.camera_id, e
                    );
                    for (aborted, mut source) in opened {
                        if let Err(release_err) = source.release().await {
                            warn!(
                                "Camera {}: release during abort failed: {}",
                                aborted.camera_id, release_err
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        info!("Session started with {} camera(s)", opened.len());
        Ok(opened)
    }

    /// Wait for every worker. A worker failure is local: it is logged and
    /// the remaining workers keep running.
    async fn join_all(&self, mut workers: JoinSet<Result<()>>) {
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Camera worker terminated with error: {}", e),
                Err(e) => error!("Camera worker task failed: {}", e),
            }
        }
        info!("All camera workers joined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraId;
    use crate::error::PaxcountError;
    use crate::frame::Frame;
    use crate::roi::Roi;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct EmptySource {
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSource for EmptySource {
        async fn read_frame(&mut self) -> Result<Option<Frame>> {
            Ok(None)
        }

        async fn release(&mut self) -> Result<()> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Backend that fails to open one configured camera.
    struct PartialBackend {
        fail_on: CameraId,
        released: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
        opened: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CaptureBackend for PartialBackend {
        async fn open_source(&self, camera_id: &CameraId) -> Result<Box<dyn FrameSource>> {
            if *camera_id == self.fail_on {
                return Err(PaxcountError::camera(camera_id, "device busy"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let released = Arc::new(AtomicBool::new(false));
            self.released.lock().push(released.clone());
            Ok(Box::new(EmptySource { released }))
        }
    }

    fn two_camera_config() -> SessionConfig {
        SessionConfig {
            cameras: vec![
                CameraEntry {
                    camera_id: CameraId::Index(0),
                    roi: Roi::new(100, 100, 500, 500).unwrap(),
                },
                CameraEntry {
                    camera_id: CameraId::Index(1),
                    roi: Roi::new(100, 100, 500, 500).unwrap(),
                },
            ],
        }
    }

    struct NullWriterFactory;

    #[async_trait]
    impl WriterFactory for NullWriterFactory {
        fn extension(&self) -> &'static str {
            "mp4"
        }

        async fn open_writer(
            &self,
            _path: &std::path::Path,
            _fps: f64,
            _frame_size: (u32, u32),
        ) -> Result<Box<dyn crate::capture::SegmentWriter>> {
            unreachable!("no frames are produced in this test")
        }
    }

    #[tokio::test]
    async fn any_failed_open_aborts_session_and_releases_opened_handles() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let opened = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(PartialBackend {
            fail_on: CameraId::Index(1),
            released: released.clone(),
            opened: opened.clone(),
        });

        let supervisor = SessionSupervisor::new(
            two_camera_config(),
            backend,
            CancellationToken::new(),
        );
        let result = supervisor
            .run_recording(RecordingOptions::default(), Arc::new(NullWriterFactory))
            .await;

        assert!(matches!(result, Err(PaxcountError::Camera { .. })));
        // Camera 0 was opened, then released during the abort.
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        let released = released.lock();
        assert_eq!(released.len(), 1);
        assert!(released[0].load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn detector_creation_failure_aborts_counting_session() {
        use crate::clock::ManualClock;
        use crate::detector::{Detector, DetectorFactory};
        use crate::store::AggregationStore;
        use chrono::{TimeZone, Utc};

        struct NoEngine;

        #[async_trait]
        impl DetectorFactory for NoEngine {
            async fn create(&self, camera_id: &CameraId) -> Result<Box<dyn Detector>> {
                Err(PaxcountError::detection(camera_id, "engine not installed"))
            }
        }

        let released = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(PartialBackend {
            fail_on: CameraId::Index(99),
            released: released.clone(),
            opened: Arc::new(AtomicUsize::new(0)),
        });

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(
            AggregationStore::open_in_memory_with_clock(clock)
                .await
                .unwrap(),
        );

        let supervisor = SessionSupervisor::new(
            two_camera_config(),
            backend,
            CancellationToken::new(),
        );
        let result = supervisor.run_counting(store.clone(), Arc::new(NoEngine)).await;

        assert!(matches!(result, Err(PaxcountError::Detection { .. })));
        // Both capture handles were opened, then released during the abort.
        let released = released.lock();
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|r| r.load(Ordering::SeqCst)));
        // The store was closed on the abort path too.
        assert!(store.close().await.is_err());
    }

    #[tokio::test]
    async fn failed_open_closes_store_in_counting_session() {
        use crate::clock::ManualClock;
        use crate::detector::{Detector, DetectorFactory};
        use crate::store::AggregationStore;
        use chrono::{TimeZone, Utc};

        struct IdleEngine;

        #[async_trait]
        impl DetectorFactory for IdleEngine {
            async fn create(&self, _camera_id: &CameraId) -> Result<Box<dyn Detector>> {
                unreachable!("open failure aborts before detector creation")
            }
        }

        let backend = Arc::new(PartialBackend {
            fail_on: CameraId::Index(0),
            released: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
        });

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(
            AggregationStore::open_in_memory_with_clock(clock)
                .await
                .unwrap(),
        );

        let supervisor = SessionSupervisor::new(
            two_camera_config(),
            backend,
            CancellationToken::new(),
        );
        let result = supervisor.run_counting(store.clone(), Arc::new(IdleEngine)).await;

        assert!(matches!(result, Err(PaxcountError::Camera { .. })));
        assert!(store.close().await.is_err());
    }

    #[tokio::test]
    async fn session_completes_when_all_sources_run_dry() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(PartialBackend {
            fail_on: CameraId::Index(99),
            released: released.clone(),
            opened: Arc::new(AtomicUsize::new(0)),
        });

        let supervisor = SessionSupervisor::new(
            two_camera_config(),
            backend,
            CancellationToken::new(),
        );
        supervisor
            .run_recording(RecordingOptions::default(), Arc::new(NullWriterFactory))
            .await
            .unwrap();

        let released = released.lock();
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|r| r.load(Ordering::SeqCst)));
    }
}
