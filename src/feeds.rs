//! Multi-feed front door.
//!
//! Every feed owns its orchestrator behind its own mutex: frames of one feed
//! run strictly one after another, distinct feeds run in parallel and share
//! only the (stateless) audit submitter.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use crate::detect::{DetectionBatch, DetectionSource};
use crate::error::FrameError;
use crate::orchestrator::{FeedPolicy, FrameOrchestrator, FrameReport, HealthStatus};
use crate::submitter::{AuditSubmitter, CancelToken};

/// Feed ids are local labels: `[a-z0-9][a-z0-9_-]{0,63}`.
pub fn validate_feed_id(feed_id: &str) -> Result<()> {
    static FEED_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = FEED_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("feed id pattern compiles")
    });
    if !re.is_match(feed_id) {
        return Err(anyhow!(
            "feed_id must match ^[a-z0-9][a-z0-9_-]{{0,63}}$ (got {:?})",
            feed_id
        ));
    }
    Ok(())
}

type FeedSlot = Arc<Mutex<FrameOrchestrator>>;

pub struct FeedRegistry {
    policy: FeedPolicy,
    submitter: Arc<AuditSubmitter>,
    feeds: RwLock<HashMap<String, FeedSlot>>,
}

impl FeedRegistry {
    pub fn new(policy: FeedPolicy, submitter: Arc<AuditSubmitter>) -> Self {
        Self {
            policy,
            submitter,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Process a frame for `feed_id`, creating the feed on first use.
    ///
    /// Blocks while another frame of the same feed is in flight.
    pub fn process_frame(
        &self,
        feed_id: &str,
        batch: DetectionBatch,
        cancel: &CancelToken,
    ) -> Result<FrameReport, FrameError> {
        validate_feed_id(feed_id).map_err(|e| FrameError::MalformedInput(e.to_string()))?;
        let slot = self
            .slot_or_create(feed_id)
            .map_err(|e| FrameError::Upstream(format!("{:#}", e)))?;
        let mut orchestrator = lock_feed(&slot);
        orchestrator.process_frame(batch, cancel)
    }

    /// Pull the next batch for `feed_id` from `source` and process it.
    /// `Ok(None)` once the source is exhausted.
    pub fn process_next(
        &self,
        feed_id: &str,
        source: &mut dyn DetectionSource,
        cancel: &CancelToken,
    ) -> Result<Option<FrameReport>, FrameError> {
        validate_feed_id(feed_id).map_err(|e| FrameError::MalformedInput(e.to_string()))?;
        let slot = self
            .slot_or_create(feed_id)
            .map_err(|e| FrameError::Upstream(format!("{:#}", e)))?;
        let mut orchestrator = lock_feed(&slot);
        orchestrator.process_next(source, cancel)
    }

    /// Clear history and cooldowns of a feed. Returns false for unknown feeds.
    pub fn reset_feed(&self, feed_id: &str) -> bool {
        match self.slot(feed_id) {
            Some(slot) => {
                lock_feed(&slot).reset();
                log::info!("feed {} reset", feed_id);
                true
            }
            None => false,
        }
    }

    pub fn remove_feed(&self, feed_id: &str) -> bool {
        match self.feeds.write() {
            Ok(mut feeds) => feeds.remove(feed_id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(feed_id).is_some(),
        }
    }

    pub fn feed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.feeds.read() {
            Ok(feeds) => feeds.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        ids.sort();
        ids
    }

    pub fn health(&self, feed_id: &str, detector_reachable: bool) -> Option<HealthStatus> {
        self.slot(feed_id).map(|slot| {
            let orchestrator = lock_feed(&slot);
            orchestrator.health(detector_reachable)
        })
    }

    fn slot(&self, feed_id: &str) -> Option<FeedSlot> {
        match self.feeds.read() {
            Ok(feeds) => feeds.get(feed_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(feed_id).cloned(),
        }
    }

    fn slot_or_create(&self, feed_id: &str) -> Result<FeedSlot> {
        if let Some(slot) = self.slot(feed_id) {
            return Ok(slot);
        }
        let mut feeds = self
            .feeds
            .write()
            .map_err(|_| anyhow!("feed table lock poisoned"))?;
        let slot = feeds.entry(feed_id.to_string()).or_insert_with(|| {
            log::info!("feed {} started", feed_id);
            Arc::new(Mutex::new(FrameOrchestrator::new(
                feed_id,
                self.policy,
                Arc::clone(&self.submitter),
            )))
        });
        Ok(Arc::clone(slot))
    }
}

/// A poisoned feed keeps its non-idle state, so it refuses frames with
/// `FrameError::Busy` until `reset_feed` is called.
fn lock_feed(slot: &FeedSlot) -> MutexGuard<'_, FrameOrchestrator> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
