use crate::clock::Clock;
use crate::config::CameraId;
use crate::detector::{Detector, CONFIDENCE_THRESHOLD, PERSON_CLASS};
use crate::error::Result;
use crate::frame::Frame;
use crate::roi::Roi;
use crate::store::AggregationStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, trace};

/// Fixed period after which a counting worker persists its current count.
pub const DEFAULT_FLUSH_SECONDS: i64 = 300;

/// ROI-gated per-frame person counting with periodic snapshot flush.
///
/// The persisted value is the count from whichever single frame was
/// processed at or after the interval boundary: an instantaneous snapshot,
/// not a windowed average or running total. Downstream consumers of the
/// Counts table rely on that sampling; do not switch it to aggregation
/// without a schema change.
pub struct DetectionCounter {
    camera_id: CameraId,
    roi: Roi,
    detector: Box<dyn Detector>,
    store: Arc<AggregationStore>,
    clock: Arc<dyn Clock>,
    flush_interval: Duration,
    last_flush: DateTime<Utc>,
}

impl DetectionCounter {
    pub fn new(
        camera_id: CameraId,
        roi: Roi,
        detector: Box<dyn Detector>,
        store: Arc<AggregationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_flush_interval(
            camera_id,
            roi,
            detector,
            store,
            clock,
            Duration::seconds(DEFAULT_FLUSH_SECONDS),
        )
    }

    pub fn with_flush_interval(
        camera_id: CameraId,
        roi: Roi,
        detector: Box<dyn Detector>,
        store: Arc<AggregationStore>,
        clock: Arc<dyn Clock>,
        flush_interval: Duration,
    ) -> Self {
        // The timer starts at construction, so the first row appears one
        // full interval after the worker starts.
        let last_flush = clock.now();
        Self {
            camera_id,
            roi,
            detector,
            store,
            clock,
            flush_interval,
            last_flush,
        }
    }

    /// Run detection on one frame and return the ROI-gated person count.
    /// Flushes a snapshot to the store when the interval has elapsed.
    pub async fn process_frame(&mut self, frame: &Frame) -> Result<u32> {
        let detections = self.detector.detect(frame).await?;

        let count = detections
            .iter()
            .filter(|d| {
                d.confidence >= CONFIDENCE_THRESHOLD
                    && d.class == PERSON_CLASS
                    && self.roi.contains_box(&d.bbox)
            })
            .count() as u32;
        trace!(
            "Camera {}: frame {} count {}",
            self.camera_id,
            frame.sequence,
            count
        );

        let now = self.clock.now();
        if now - self.last_flush >= self.flush_interval {
            self.store.insert(&self.camera_id, count).await?;
            self.last_flush = now;
            debug!("Camera {}: flushed count {}", self.camera_id, count);
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detector::{BoundingBox, Detection};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    struct ScriptedDetector {
        results: VecDeque<Vec<Detection>>,
    }

    impl ScriptedDetector {
        fn new(results: Vec<Vec<Detection>>) -> Box<Self> {
            Box::new(Self {
                results: results.into(),
            })
        }
    }

    #[async_trait]
    impl Detector for ScriptedDetector {
        async fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(self.results.pop_front().unwrap_or_default())
        }
    }

    fn person(confidence: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection {
            class: PERSON_CLASS.to_string(),
            confidence,
            bbox: BoundingBox { x1, y1, x2, y2 },
        }
    }

    fn labeled(class: &str, confidence: f32) -> Detection {
        Detection {
            class: class.to_string(),
            confidence,
            bbox: BoundingBox {
                x1: 200,
                y1: 200,
                x2: 300,
                y2: 300,
            },
        }
    }

    fn frame(camera_id: &CameraId, sequence: u64, at: DateTime<Utc>) -> Frame {
        Frame::new(camera_id.clone(), sequence, at, 1280, 720, vec![0u8; 16])
    }

    async fn counter_with(
        results: Vec<Vec<Detection>>,
        flush_interval: Duration,
    ) -> (DetectionCounter, Arc<ManualClock>, Arc<AggregationStore>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(
            AggregationStore::open_in_memory_with_clock(clock.clone())
                .await
                .unwrap(),
        );
        let counter = DetectionCounter::with_flush_interval(
            CameraId::Index(0),
            Roi::new(100, 100, 500, 500).unwrap(),
            ScriptedDetector::new(results),
            store.clone(),
            clock.clone(),
            flush_interval,
        );
        (counter, clock, store)
    }

    #[tokio::test]
    async fn counts_only_confident_people_inside_roi() {
        let detections = vec![vec![
            person(0.9, 150, 150, 250, 250),  // counted
            person(0.3, 300, 300, 400, 400),  // counted, threshold inclusive
            person(0.2, 150, 150, 250, 250),  // below threshold
            labeled("car", 0.95),             // wrong class
            person(0.8, 100, 150, 250, 250),  // touches ROI edge
            person(0.8, 50, 50, 600, 600),    // larger than ROI
        ]];
        let (mut counter, clock, _store) =
            counter_with(detections, Duration::seconds(DEFAULT_FLUSH_SECONDS)).await;

        let camera_id = CameraId::Index(0);
        let count = counter
            .process_frame(&frame(&camera_id, 0, clock.now()))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn flushes_once_per_elapsed_interval_with_snapshot_count() {
        // Frame counts over time; one frame every 100 seconds.
        let per_frame = vec![
            vec![person(0.9, 150, 150, 250, 250); 2], // t=100
            vec![person(0.9, 150, 150, 250, 250); 4], // t=200
            vec![person(0.9, 150, 150, 250, 250); 1], // t=300, flushed
            vec![],                                   // t=400
            vec![person(0.9, 150, 150, 250, 250); 5], // t=500
            vec![person(0.9, 150, 150, 250, 250); 3], // t=600, flushed
        ];
        let (mut counter, clock, store) =
            counter_with(per_frame, Duration::seconds(300)).await;

        let camera_id = CameraId::Index(0);
        for sequence in 0..6 {
            clock.advance(Duration::seconds(100));
            counter
                .process_frame(&frame(&camera_id, sequence, clock.now()))
                .await
                .unwrap();
        }

        let rows = store.fetch_counts().await.unwrap();
        // Exactly one flush per elapsed interval, carrying the count of the
        // frame at the boundary rather than a sum over the interval.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].count, 1);
        assert_eq!(
            rows[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 5, 0).unwrap()
        );
        assert_eq!(rows[1].count, 3);
        assert_eq!(
            rows[1].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 10, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn no_flush_before_first_interval_elapses() {
        let per_frame = vec![vec![person(0.9, 150, 150, 250, 250)]; 10];
        let (mut counter, clock, store) =
            counter_with(per_frame, Duration::seconds(300)).await;

        let camera_id = CameraId::Index(0);
        for sequence in 0..10 {
            clock.advance(Duration::seconds(1));
            counter
                .process_frame(&frame(&camera_id, sequence, clock.now()))
                .await
                .unwrap();
        }

        assert!(store.fetch_counts().await.unwrap().is_empty());
    }
}
