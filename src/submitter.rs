//! Delivery of fired alerts to the audit ledger.
//!
//! Each alert of a frame is submitted on its own worker thread. The caller
//! waits for all of them up to a deadline and always gets exactly one receipt
//! per alert, in alert order. Failed submissions are never retried here.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::alert::Alert;
use crate::ledger::AuditLedger;

pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 5_000;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Commit outcome for one alert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditReceipt {
    pub alert_key: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditReceipt {
    pub fn committed(alert_key: &str, topic_id: &str, sequence_number: u64) -> Self {
        Self {
            alert_key: alert_key.to_string(),
            success: true,
            topic_id: Some(topic_id.to_string()),
            sequence_number: Some(sequence_number),
            error: None,
        }
    }

    pub fn failed(alert_key: &str, error: impl Into<String>) -> Self {
        Self {
            alert_key: alert_key.to_string(),
            success: false,
            topic_id: None,
            sequence_number: None,
            error: Some(error.into()),
        }
    }
}

/// Cooperative cancellation shared between a request and its submissions.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct SubmitterConfig {
    pub farm_id: String,
    pub location: String,
    pub topic_id: String,
    /// Bound on waiting for the ledger; later answers are discarded.
    pub timeout: Duration,
}

pub struct AuditSubmitter {
    ledger: Arc<dyn AuditLedger>,
    cfg: SubmitterConfig,
    late_commits: Arc<AtomicU64>,
}

impl AuditSubmitter {
    pub fn new(ledger: Arc<dyn AuditLedger>, cfg: SubmitterConfig) -> Self {
        Self {
            ledger,
            cfg,
            late_commits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.cfg
    }

    pub fn ledger_reachable(&self) -> bool {
        self.ledger.is_reachable()
    }

    /// Commits the ledger acknowledged after their receipt was already
    /// reported as failed.
    pub fn late_commits(&self) -> u64 {
        self.late_commits.load(Ordering::SeqCst)
    }

    pub fn submit(&self, alert: &Alert) -> AuditReceipt {
        self.submit_all(std::slice::from_ref(alert), &CancelToken::new())
            .pop()
            .unwrap_or_else(|| AuditReceipt::failed(alert.alert_key(), "no receipt produced"))
    }

    /// Submit every alert concurrently and join all of them.
    ///
    /// Receipts line up with `alerts` by position. Alerts still pending when
    /// the timeout expires or `cancel` fires get a failure receipt. Workers
    /// that have not reached the ledger by then skip the submission; answers
    /// arriving later are logged and counted in `late_commits`.
    pub fn submit_all(&self, alerts: &[Alert], cancel: &CancelToken) -> Vec<AuditReceipt> {
        let mut slots: Vec<Option<AuditReceipt>> = vec![None; alerts.len()];
        let (tx, rx) = mpsc::channel::<(usize, Result<u64>)>();
        // Set once receipts are final. Workers send only while it is false.
        let closed = Arc::new(Mutex::new(false));

        for (index, alert) in alerts.iter().enumerate() {
            let payload = match self.encode(alert) {
                Ok(payload) => payload,
                Err(e) => {
                    slots[index] = Some(AuditReceipt::failed(
                        alert.alert_key(),
                        format!("failed to encode ledger message: {}", e),
                    ));
                    continue;
                }
            };
            let worker = SubmitWorker {
                ledger: Arc::clone(&self.ledger),
                topic_id: self.cfg.topic_id.clone(),
                alert_key: alert.alert_key().to_string(),
                closed: Arc::clone(&closed),
                cancel: cancel.clone(),
                late_commits: Arc::clone(&self.late_commits),
            };
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("audit-submit-{}", index))
                .spawn(move || worker.run(index, &payload, &tx));
            if let Err(e) = spawned {
                slots[index] = Some(AuditReceipt::failed(
                    alert.alert_key(),
                    format!("failed to start submission worker: {}", e),
                ));
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.cfg.timeout;
        let mut pending = slots.iter().filter(|slot| slot.is_none()).count();
        let mut workers_gone = false;
        while pending > 0 && !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout((deadline - now).min(CANCEL_POLL_INTERVAL)) {
                Ok((index, outcome)) => {
                    slots[index] = Some(self.receipt(&alerts[index], outcome));
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    workers_gone = true;
                    break;
                }
            }
        }

        *closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        // Answers sent before the close still count.
        while let Ok((index, outcome)) = rx.try_recv() {
            if slots[index].is_none() {
                slots[index] = Some(self.receipt(&alerts[index], outcome));
            }
        }

        let reason = if workers_gone {
            "submission worker exited without a result".to_string()
        } else if cancel.is_cancelled() {
            "submission cancelled before ledger acknowledgment".to_string()
        } else {
            format!(
                "ledger submission timed out after {} ms",
                self.cfg.timeout.as_millis()
            )
        };

        slots
            .into_iter()
            .zip(alerts)
            .map(|(slot, alert)| {
                slot.unwrap_or_else(|| AuditReceipt::failed(alert.alert_key(), reason.clone()))
            })
            .collect()
    }

    fn encode(&self, alert: &Alert) -> Result<Vec<u8>> {
        let message = alert.ledger_message(&self.cfg.farm_id, &self.cfg.location);
        Ok(serde_json::to_vec(&message)?)
    }

    fn receipt(&self, alert: &Alert, outcome: Result<u64>) -> AuditReceipt {
        let key = alert.alert_key();
        match outcome {
            Ok(seq) => AuditReceipt::committed(key, &self.cfg.topic_id, seq),
            Err(e) => AuditReceipt::failed(key, format!("ledger rejected: {:#}", e)),
        }
    }
}

struct SubmitWorker {
    ledger: Arc<dyn AuditLedger>,
    topic_id: String,
    alert_key: String,
    closed: Arc<Mutex<bool>>,
    cancel: CancelToken,
    late_commits: Arc<AtomicU64>,
}

impl SubmitWorker {
    fn run(self, index: usize, payload: &[u8], tx: &mpsc::Sender<(usize, Result<u64>)>) {
        if self.is_closed() || self.cancel.is_cancelled() {
            log::debug!("submission of {} abandoned before reaching the ledger", self.alert_key);
            return;
        }
        let outcome = self.ledger.submit(&self.topic_id, payload);

        let closed = self.closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let outcome = if *closed {
            outcome
        } else {
            match tx.send((index, outcome)) {
                Ok(()) => return,
                Err(mpsc::SendError((_, outcome))) => outcome,
            }
        };
        drop(closed);
        match outcome {
            Ok(seq) => {
                self.late_commits.fetch_add(1, Ordering::SeqCst);
                log::warn!(
                    "late ledger commit: {} landed on topic {} as seq {} after its receipt reported failure",
                    self.alert_key,
                    self.topic_id,
                    seq
                );
            }
            Err(e) => log::warn!(
                "late ledger failure for {} on topic {}: {:#}",
                self.alert_key,
                self.topic_id,
                e
            ),
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
