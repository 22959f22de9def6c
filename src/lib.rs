//! Tutela livestock alerting kernel
//!
//! Turns per-frame animal detections into deduplicated, audit-logged alerts.
//!
//! # Pipeline
//!
//! For every frame of a feed the kernel:
//!
//! 1. Validates the detection batch.
//! 2. Evaluates the rules: headcount mismatch against the expected count, and
//!    inactivity of tracked animals over a sliding position history.
//! 3. Suppresses alerts whose key fired within the cooldown.
//! 4. Submits every surviving alert to the append-only audit ledger
//!    concurrently, waiting for all of them up to a deadline.
//! 5. Reports detections, alerts and one receipt per alert.
//!
//! # Module Structure
//!
//! - `detect`: detection types and detection sources
//! - `history`: per-track position history with a sliding window
//! - `rules`: count-mismatch and inactivity rules
//! - `alert`: alert conditions and the ledger message format
//! - `cooldown`: per-key alert deduplication
//! - `ledger`: audit ledger contract, sealed SQLite ledger, chain verification
//! - `submitter`: concurrent, bounded ledger submission
//! - `orchestrator`: per-feed frame pipeline
//! - `feeds`: registry of independent feeds
//! - `config`: layered kernel settings

use anyhow::{anyhow, Result};
use rand::Rng;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod config;
pub mod cooldown;
pub mod detect;
pub mod error;
pub mod feeds;
pub mod history;
pub mod ledger;
pub mod orchestrator;
pub mod rules;
pub mod submitter;

pub use alert::{Alert, AlertCondition, Severity};
pub use config::KernelSettings;
pub use cooldown::CooldownGate;
pub use detect::{
    DefaultHeadcount, Detection, DetectionBatch, DetectionSource, JsonLinesSource, TrackId,
};
pub use error::FrameError;
pub use feeds::FeedRegistry;
pub use history::{Point, PositionSample, TrackHistoryStore};
pub use ledger::{
    hash_entry, sign_entry, verify_entry_signature, verify_topic_chain, AuditLedger, ChainReport,
    InMemoryAuditLedger, SqliteAuditLedger,
};
pub use orchestrator::{
    FeedContext, FeedPolicy, FeedState, FrameOrchestrator, FrameReport, HealthStatus,
};
pub use rules::RuleThresholds;
pub use submitter::{AuditReceipt, AuditSubmitter, CancelToken, SubmitterConfig};

/// In-memory SQLite URI that every connection of this process can share,
/// unique per call.
pub fn shared_memory_uri() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("file:tutela_ledger_{:016x}?mode=memory&cache=shared", nonce)
}

/// Opens a ledger database by path, or by `file:` URI.
pub fn open_db_connection(db_path: &str) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    if db_path.starts_with("file:") {
        flags |= OpenFlags::SQLITE_OPEN_URI;
    }
    Connection::open_with_flags(db_path, flags)
        .map_err(|e| anyhow!("failed to open ledger database {}: {}", db_path, e))
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_memory_uris_are_distinct() {
        let a = shared_memory_uri();
        let b = shared_memory_uri();
        assert!(a.starts_with("file:tutela_ledger_"));
        assert_ne!(a, b);
    }

    #[test]
    fn uri_connections_share_one_database() -> Result<()> {
        let uri = shared_memory_uri();
        let first = open_db_connection(&uri)?;
        first.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")?;
        let second = open_db_connection(&uri)?;
        let v: i64 = second.query_row("SELECT v FROM t", [], |row| row.get(0))?;
        assert_eq!(v, 7);
        Ok(())
    }
}
