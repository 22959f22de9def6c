//! Fixed rule set: headcount mismatch and per-track inactivity.

use std::collections::HashSet;

use crate::alert::AlertCondition;
use crate::detect::Detection;
use crate::history::{PositionSample, TrackHistoryStore};

pub const DEFAULT_MIN_SAMPLES: usize = 5;
pub const DEFAULT_MOVEMENT_THRESHOLD: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuleThresholds {
    /// Minimum in-window samples before stillness is judged.
    pub min_samples: usize,
    /// Oldest-to-newest displacement below which a track counts as still,
    /// in detector units.
    pub movement_threshold: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            movement_threshold: DEFAULT_MOVEMENT_THRESHOLD,
        }
    }
}

/// Compares the frame's headcount, tracked or not, against the expected count.
pub fn evaluate_count_mismatch(detections: &[Detection], expected: u32) -> Option<AlertCondition> {
    let observed = u32::try_from(detections.len()).unwrap_or(u32::MAX);
    (observed != expected).then_some(AlertCondition::CountMismatch { expected, observed })
}

/// Records every tracked detection's center and reports the tracks whose
/// window shows no meaningful displacement.
///
/// Untracked detections are ignored. A track id seen twice in one frame is
/// evaluated once.
pub fn evaluate_inactivity(
    detections: &[Detection],
    timestamp: f64,
    history: &mut TrackHistoryStore,
    thresholds: &RuleThresholds,
) -> Vec<AlertCondition> {
    let mut seen = HashSet::new();
    let mut conditions = Vec::new();
    for detection in detections {
        let Some(track_id) = detection.track_id else {
            continue;
        };
        if !seen.insert(track_id) {
            continue;
        }
        history.record(track_id, detection.center(), timestamp);
        if is_stationary(history.recent(track_id, timestamp), thresholds) {
            conditions.push(AlertCondition::Inactivity { track_id });
        }
    }
    conditions
}

pub fn is_stationary(samples: &[PositionSample], thresholds: &RuleThresholds) -> bool {
    if samples.len() < thresholds.min_samples {
        return false;
    }
    match (samples.first(), samples.last()) {
        (Some(oldest), Some(newest)) => {
            oldest.center.distance_to(&newest.center) < thresholds.movement_threshold
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracked(track_id: u64, cx: f64, cy: f64) -> Detection {
        Detection {
            x: cx - 10.0,
            y: cy - 10.0,
            width: 20.0,
            height: 20.0,
            confidence: 0.9,
            class_name: "pig".to_string(),
            track_id: Some(track_id),
        }
    }

    #[test]
    fn matching_count_does_not_fire() {
        let detections = vec![tracked(1, 0.0, 0.0), tracked(2, 0.0, 0.0)];
        assert_eq!(evaluate_count_mismatch(&detections, 2), None);
    }

    #[test]
    fn mismatch_counts_untracked_detections() {
        let mut untracked = tracked(1, 0.0, 0.0);
        untracked.track_id = None;
        assert_eq!(
            evaluate_count_mismatch(&[untracked], 3),
            Some(AlertCondition::CountMismatch {
                expected: 3,
                observed: 1
            })
        );
    }

    #[test]
    fn stationary_track_fires_only_with_enough_samples() {
        let mut history = TrackHistoryStore::new(Duration::from_secs(15));
        let thresholds = RuleThresholds::default();
        let positions = [(100.0, 100.0), (101.0, 99.0), (103.0, 100.0), (104.0, 98.0)];
        for (i, (x, y)) in positions.iter().enumerate() {
            let fired = evaluate_inactivity(
                &[tracked(5, *x, *y)],
                i as f64 * 3.75,
                &mut history,
                &thresholds,
            );
            assert!(fired.is_empty(), "fired after {} samples", i + 1);
        }
        let fired = evaluate_inactivity(&[tracked(5, 105.0, 98.0)], 15.0, &mut history, &thresholds);
        assert_eq!(fired, vec![AlertCondition::Inactivity { track_id: 5 }]);
    }

    #[test]
    fn moving_track_does_not_fire() {
        let mut history = TrackHistoryStore::new(Duration::from_secs(15));
        let thresholds = RuleThresholds::default();
        let mut fired = Vec::new();
        for i in 0..6 {
            fired = evaluate_inactivity(
                &[tracked(6, 100.0 + i as f64 * 15.0, 100.0)],
                i as f64 * 3.0,
                &mut history,
                &thresholds,
            );
        }
        assert!(fired.is_empty());
    }

    #[test]
    fn displacement_exactly_at_threshold_is_movement() {
        let thresholds = RuleThresholds::default();
        let samples: Vec<PositionSample> = (0..5)
            .map(|i| PositionSample {
                center: crate::history::Point {
                    x: if i == 4 { 50.0 } else { 0.0 },
                    y: 0.0,
                },
                timestamp: i as f64,
            })
            .collect();
        assert!(!is_stationary(&samples, &thresholds));
    }

    #[test]
    fn duplicate_track_in_frame_is_evaluated_once() {
        let mut history = TrackHistoryStore::new(Duration::from_secs(15));
        let thresholds = RuleThresholds {
            min_samples: 1,
            ..RuleThresholds::default()
        };
        let fired = evaluate_inactivity(
            &[tracked(9, 0.0, 0.0), tracked(9, 0.0, 0.0)],
            1.0,
            &mut history,
            &thresholds,
        );
        assert_eq!(fired.len(), 1);
    }
}
