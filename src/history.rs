//! Per-track sliding window of recent positions.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::detect::TrackId;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance_to(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub center: Point,
    pub timestamp: f64,
}

/// Trailing-window position history keyed by track id.
///
/// Samples within a track are strictly increasing in timestamp. A sample is
/// in the window while `now - sample.timestamp <= window`.
#[derive(Debug)]
pub struct TrackHistoryStore {
    window_s: f64,
    tracks: HashMap<TrackId, VecDeque<PositionSample>>,
}

impl TrackHistoryStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window_s: window.as_secs_f64(),
            tracks: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_s)
    }

    /// Append a sample and prune the track's out-of-window samples.
    ///
    /// A sample that is not newer than the track's latest one is dropped and
    /// `false` is returned; the existing history is left as it was.
    pub fn record(&mut self, track_id: TrackId, center: Point, timestamp: f64) -> bool {
        let samples = self.tracks.entry(track_id).or_default();
        if let Some(last) = samples.back() {
            if timestamp <= last.timestamp {
                return false;
            }
        }
        samples.push_back(PositionSample { center, timestamp });
        prune(samples, timestamp, self.window_s);
        true
    }

    /// In-window samples for a track, oldest first. Unknown tracks are empty.
    pub fn recent(&mut self, track_id: TrackId, now: f64) -> &[PositionSample] {
        match self.tracks.get_mut(&track_id) {
            Some(samples) => {
                prune(samples, now, self.window_s);
                samples.make_contiguous()
            }
            None => &[],
        }
    }

    /// Drop tracks whose newest sample is older than `max_idle`.
    pub fn evict_idle(&mut self, now: f64, max_idle: Duration) -> usize {
        let max_idle_s = max_idle.as_secs_f64();
        let before = self.tracks.len();
        self.tracks.retain(|_, samples| match samples.back() {
            Some(last) => now - last.timestamp <= max_idle_s,
            None => false,
        });
        before - self.tracks.len()
    }

    /// Tracks with at least one sample in the window ending at `now`.
    pub fn active_tracks(&self, now: f64) -> usize {
        self.tracks
            .values()
            .filter(|samples| {
                samples
                    .back()
                    .is_some_and(|last| now - last.timestamp <= self.window_s)
            })
            .count()
    }

    pub fn tracked_ids(&self) -> usize {
        self.tracks.len()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

fn prune(samples: &mut VecDeque<PositionSample>, now: f64, window_s: f64) {
    while let Some(front) = samples.front() {
        if now - front.timestamp > window_s {
            samples.pop_front();
        } else {
            break;
        }
    }
}
