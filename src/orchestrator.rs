//! Per-feed frame pipeline: validate, evaluate rules, dedup, submit, report.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::Alert;
use crate::cooldown::{CooldownGate, DEFAULT_COOLDOWN_SECS};
use crate::detect::{Detection, DetectionBatch, DetectionSource};
use crate::error::FrameError;
use crate::history::TrackHistoryStore;
use crate::rules::{self, RuleThresholds};
use crate::submitter::{AuditReceipt, AuditSubmitter, CancelToken};

pub const DEFAULT_WINDOW_SECS: u64 = 15;
pub const DEFAULT_STALE_FACTOR: u32 = 4;

/// Tunables shared by every feed of a deployment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeedPolicy {
    pub history_window: Duration,
    pub cooldown: Duration,
    pub thresholds: RuleThresholds,
    /// A track idle for `stale_factor * history_window` is forgotten.
    pub stale_factor: u32,
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self {
            history_window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            thresholds: RuleThresholds::default(),
            stale_factor: DEFAULT_STALE_FACTOR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Idle,
    Evaluating,
    Reporting,
}

/// State owned by one feed. Nothing here is shared with other feeds.
#[derive(Debug)]
pub struct FeedContext {
    feed_id: String,
    history: TrackHistoryStore,
    cooldowns: CooldownGate,
    last_timestamp: Option<f64>,
}

impl FeedContext {
    pub fn new(feed_id: &str, policy: &FeedPolicy) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            history: TrackHistoryStore::new(policy.history_window),
            cooldowns: CooldownGate::new(policy.cooldown),
            last_timestamp: None,
        }
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub fn history(&self) -> &TrackHistoryStore {
        &self.history
    }

    pub fn cooldowns(&self) -> &CooldownGate {
        &self.cooldowns
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    fn reset(&mut self) {
        self.history.clear();
        self.cooldowns.clear();
        self.last_timestamp = None;
    }
}

/// Result returned to the caller for one frame.
///
/// `receipts[i]` belongs to `alerts[i]`.
#[derive(Clone, Debug, Serialize)]
pub struct FrameReport {
    pub feed_id: String,
    pub frame_id: u64,
    pub timestamp: f64,
    pub detections: Vec<Detection>,
    pub alerts: Vec<Alert>,
    pub alert_count: usize,
    pub receipts: Vec<AuditReceipt>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthStatus {
    pub feed_id: String,
    pub state: FeedState,
    pub detector_reachable: bool,
    pub ledger_reachable: bool,
    pub active_tracks: usize,
    pub cooldown_keys: usize,
    /// Ledger commits that landed after their receipt reported failure.
    pub late_commits: u64,
}

pub struct FrameOrchestrator {
    ctx: FeedContext,
    policy: FeedPolicy,
    submitter: Arc<AuditSubmitter>,
    state: FeedState,
}

impl FrameOrchestrator {
    pub fn new(feed_id: &str, policy: FeedPolicy, submitter: Arc<AuditSubmitter>) -> Self {
        Self {
            ctx: FeedContext::new(feed_id, &policy),
            policy,
            submitter,
            state: FeedState::Idle,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn context(&self) -> &FeedContext {
        &self.ctx
    }

    /// Process one detection batch end to end.
    ///
    /// Validation happens before any state is touched, so a rejected frame
    /// leaves history and cooldowns exactly as they were. Ledger failures do
    /// not fail the frame; they show up as unsuccessful receipts.
    pub fn process_frame(
        &mut self,
        batch: DetectionBatch,
        cancel: &CancelToken,
    ) -> Result<FrameReport, FrameError> {
        if self.state != FeedState::Idle {
            return Err(FrameError::Busy(self.ctx.feed_id.clone()));
        }
        let expected = batch.validate().map_err(FrameError::MalformedInput)?;
        if let Some(last) = self.ctx.last_timestamp {
            if batch.timestamp < last {
                return Err(FrameError::MalformedInput(format!(
                    "frame {}: capture timestamp {} precedes previous frame at {}",
                    batch.frame_id, batch.timestamp, last
                )));
            }
        }

        self.state = FeedState::Evaluating;
        let now = batch.timestamp;
        let alerts = self.evaluate(&batch.detections, expected, now);
        self.ctx.last_timestamp = Some(now);
        self.sweep(now);

        self.state = FeedState::Reporting;
        let receipts = self.submitter.submit_all(&alerts, cancel);
        for receipt in receipts.iter().filter(|r| !r.success) {
            log::warn!(
                "feed {} frame {}: audit commit failed for {}: {}",
                self.ctx.feed_id,
                batch.frame_id,
                receipt.alert_key,
                receipt.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.state = FeedState::Idle;

        Ok(FrameReport {
            feed_id: self.ctx.feed_id.clone(),
            frame_id: batch.frame_id,
            timestamp: now,
            detections: batch.detections,
            alert_count: alerts.len(),
            alerts,
            receipts,
        })
    }

    /// Pull one batch from the detector and process it. `Ok(None)` when the
    /// source is exhausted.
    pub fn process_next(
        &mut self,
        source: &mut dyn DetectionSource,
        cancel: &CancelToken,
    ) -> Result<Option<FrameReport>, FrameError> {
        match source.next_batch() {
            Ok(Some(batch)) => self.process_frame(batch, cancel).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(FrameError::Upstream(format!("{} source: {:#}", source.name(), e))),
        }
    }

    /// Forget all tracks and cooldowns, as at feed start.
    pub fn reset(&mut self) {
        self.ctx.reset();
        self.state = FeedState::Idle;
    }

    pub fn health(&self, detector_reachable: bool) -> HealthStatus {
        let now = self.ctx.last_timestamp.unwrap_or(0.0);
        HealthStatus {
            feed_id: self.ctx.feed_id.clone(),
            state: self.state,
            detector_reachable,
            ledger_reachable: self.submitter.ledger_reachable(),
            active_tracks: self.ctx.history.active_tracks(now),
            cooldown_keys: self.ctx.cooldowns.len(),
            late_commits: self.submitter.late_commits(),
        }
    }

    fn evaluate(&mut self, detections: &[Detection], expected: u32, now: f64) -> Vec<Alert> {
        let mut conditions = Vec::new();
        conditions.extend(rules::evaluate_count_mismatch(detections, expected));
        conditions.extend(rules::evaluate_inactivity(
            detections,
            now,
            &mut self.ctx.history,
            &self.policy.thresholds,
        ));

        let mut alerts = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let key = condition.alert_key();
            if !self.ctx.cooldowns.should_fire(&key, now) {
                log::debug!("feed {}: {} suppressed by cooldown", self.ctx.feed_id, key);
                continue;
            }
            self.ctx.cooldowns.record_fired(&key, now);
            let alert = Alert::fire(condition, now);
            log::info!(
                "feed {}: alert {} severity={:?} risk={}",
                self.ctx.feed_id,
                alert.alert_key(),
                alert.severity(),
                alert.risk()
            );
            alerts.push(alert);
        }
        alerts
    }

    fn sweep(&mut self, now: f64) {
        let max_idle = self.policy.history_window * self.policy.stale_factor.max(1);
        let tracks = self.ctx.history.evict_idle(now, max_idle);
        let keys = self.ctx.cooldowns.evict_expired(now);
        if tracks > 0 || keys > 0 {
            log::debug!(
                "feed {}: evicted {} idle tracks, {} expired cooldown keys",
                self.ctx.feed_id,
                tracks,
                keys
            );
        }
    }
}
