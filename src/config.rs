use crate::error::{PaxcountError, Result};
use crate::roi::Roi;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Camera identifier as it appears in the configuration file: either a bare
/// device index or a symbolic name such as `cam_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CameraId {
    Index(u32),
    Name(String),
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraId::Index(index) => write!(f, "{}", index),
            CameraId::Name(name) => write!(f, "{}", name),
        }
    }
}

/// One configured camera: identifier plus its calibrated counting region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEntry {
    pub camera_id: CameraId,
    pub roi: Roi,
}

/// Session-wide camera configuration, loaded once before any worker starts
/// and read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cameras: Vec<CameraEntry>,
}

impl SessionConfig {
    /// Load and validate the configuration file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading session configuration from {}", path.display());

        let settings = Config::builder().add_source(File::from(path)).build()?;
        let config: SessionConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            "Session configuration loaded: {} camera(s)",
            config.cameras.len()
        );
        Ok(config)
    }

    /// Validate the camera list and every ROI invariant. Runs at load time so
    /// workers never see an out-of-order rectangle.
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(PaxcountError::system(
                "no cameras configured; at least one camera entry is required",
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.cameras {
            if !seen.insert(entry.camera_id.clone()) {
                return Err(PaxcountError::system(format!(
                    "duplicate camera_id {} in configuration",
                    entry.camera_id
                )));
            }
            entry.roi.validate().map_err(|e| {
                PaxcountError::system(format!("camera {}: {}", entry.camera_id, e))
            })?;
        }
        Ok(())
    }
}

/// Recording-mode options assembled from CLI flags.
#[derive(Debug, Clone)]
pub struct RecordingOptions {
    /// Frames per second passed to the artifact writer
    pub fps: f64,
    /// Target frame size (width, height); frames are scaled to this on write
    pub frame_size: (u32, u32),
    /// Base directory for the per-camera/per-date recording tree
    pub base_path: PathBuf,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            fps: 20.0,
            frame_size: (1280, 720),
            base_path: PathBuf::from("./videos"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(yaml: &str) -> Result<SessionConfig> {
        let settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        let config: SessionConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn parses_numeric_and_named_camera_ids() {
        let config = parse(
            r#"
cameras:
  - camera_id: 0
    roi: { x1: 100, y1: 100, x2: 500, y2: 500 }
  - camera_id: cam_2
    roi: { x1: 10, y1: 20, x2: 30, y2: 40 }
"#,
        )
        .unwrap();

        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].camera_id, CameraId::Index(0));
        assert_eq!(
            config.cameras[1].camera_id,
            CameraId::Name("cam_2".to_string())
        );
        assert_eq!(config.cameras[0].roi, Roi::new(100, 100, 500, 500).unwrap());
    }

    #[test]
    fn rejects_out_of_order_roi_at_load_time() {
        let result = parse(
            r#"
cameras:
  - camera_id: 0
    roi: { x1: 500, y1: 100, x2: 100, y2: 500 }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_camera_list() {
        assert!(parse("cameras: []").is_err());
    }

    #[test]
    fn rejects_duplicate_camera_ids() {
        let result = parse(
            r#"
cameras:
  - camera_id: 1
    roi: { x1: 0, y1: 0, x2: 10, y2: 10 }
  - camera_id: 1
    roi: { x1: 0, y1: 0, x2: 10, y2: 10 }
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn camera_id_display_matches_config_value() {
        assert_eq!(CameraId::Index(3).to_string(), "3");
        assert_eq!(CameraId::Name("cam_2".into()).to_string(), "cam_2");
    }
}
