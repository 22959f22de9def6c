use serde::{Deserialize, Serialize};

use crate::history::Point;

/// Stable tracker label for one subject across frames.
pub type TrackId = u64;

/// One observed subject in one frame, as produced by the external detector.
///
/// Coordinates are raw detector units (pixels for the reference detector).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    pub class_name: String,
    /// Absent when the tracker did not assign an identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
}

impl Detection {
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    fn validate(&self, index: usize) -> Result<(), String> {
        let coords = [self.x, self.y, self.width, self.height];
        if coords.iter().any(|v| !v.is_finite()) {
            return Err(format!("detection {}: non-finite bounding box", index));
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(format!(
                "detection {}: negative dimensions ({}x{})",
                index, self.width, self.height
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "detection {}: confidence {} outside [0, 1]",
                index, self.confidence
            ));
        }
        Ok(())
    }
}

/// Inbound unit of work: every detection of one frame plus the operator's
/// expected headcount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub frame_id: u64,
    /// Capture time in seconds since the epoch.
    pub timestamp: f64,
    #[serde(default)]
    pub expected_count: Option<u32>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    /// Structural checks that must pass before any rule sees the batch.
    /// Returns the expected count on success.
    pub fn validate(&self) -> Result<u32, String> {
        let expected = self
            .expected_count
            .ok_or_else(|| format!("frame {}: missing expected_count", self.frame_id))?;
        if !self.timestamp.is_finite() || self.timestamp < 0.0 {
            return Err(format!(
                "frame {}: invalid capture timestamp {}",
                self.frame_id, self.timestamp
            ));
        }
        for (index, detection) in self.detections.iter().enumerate() {
            detection.validate(index)?;
        }
        Ok(expected)
    }
}
