pub mod capture;
pub mod clock;
pub mod config;
pub mod counter;
pub mod detector;
pub mod error;
pub mod frame;
pub mod keyboard;
pub mod roi;
pub mod rotation;
pub mod session;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CameraEntry, CameraId, RecordingOptions, SessionConfig};
pub use counter::{DetectionCounter, DEFAULT_FLUSH_SECONDS};
pub use detector::{
    BoundingBox, Detection, Detector, DetectorFactory, CONFIDENCE_THRESHOLD, PERSON_CLASS,
};
pub use error::{PaxcountError, Result};
pub use frame::Frame;
pub use keyboard::KeyboardListener;
pub use roi::Roi;
pub use rotation::{RecordingSegment, SegmentRotator, DEFAULT_SEGMENT_SECONDS};
pub use session::SessionSupervisor;
pub use store::{AggregationStore, DetectionCount};
pub use worker::{CameraWorker, WorkerMode};
