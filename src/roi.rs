use crate::detector::BoundingBox;
use crate::error::{PaxcountError, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned region of interest gating which detections are counted.
///
/// The calibration tool emits corners in min/max order, but operators can
/// hand-edit the configuration file, so `new` re-normalizes and only a
/// degenerate rectangle is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Roi {
    /// Build a normalized ROI from two opposite corners in any order.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        let roi = Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        };
        roi.validate()?;
        Ok(roi)
    }

    /// Check the rectangle invariant (x1 < x2 and y1 < y2).
    pub fn validate(&self) -> Result<()> {
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(PaxcountError::roi(format!(
                "degenerate rectangle ({}, {}, {}, {})",
                self.x1, self.y1, self.x2, self.y2
            )));
        }
        Ok(())
    }

    /// Strict containment test: a box counts only when all four corners lie
    /// strictly inside the ROI. Boxes touching an edge are excluded on
    /// purpose, not as a rounding artifact.
    pub fn contains_box(&self, bbox: &BoundingBox) -> bool {
        bbox.x1 > self.x1 && bbox.y1 > self.y1 && bbox.x2 < self.x2 && bbox.y2 < self.y2
    }
}
