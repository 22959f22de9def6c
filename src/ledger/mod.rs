//! Append-only audit ledger.
//!
//! The ledger is an external collaborator: it accepts one message under a
//! topic and answers with a per-topic sequence number, or fails. The kernel
//! only depends on the `AuditLedger` trait. Two implementations ship here:
//!
//! - `SqliteAuditLedger`: hash-chained, Ed25519-signed entries on disk,
//!   verifiable offline with `verify_topic_chain`.
//! - `InMemoryAuditLedger`: same sequencing rules, no persistence.

mod chain;
mod sqlite;
mod verify;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use chain::{
    hash_entry, sign_entry, signing_key_from_seed, verify_entry_signature,
    verifying_key_from_bytes, verifying_key_from_seed, GENESIS_HASH,
};
pub use sqlite::SqliteAuditLedger;
pub use verify::{device_public_key_from_db, ledger_topics, verify_topic_chain, ChainReport};

/// Ledger client contract.
///
/// `submit` blocks until the ledger acknowledges the commit. Implementations
/// never retry; a failure is reported to the caller as-is.
pub trait AuditLedger: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Commit one message under `topic_id` and return its sequence number.
    ///
    /// Sequence numbers start at 1 and strictly increase per topic.
    fn submit(&self, topic_id: &str, message: &[u8]) -> Result<u64>;

    /// Advisory reachability probe for health reporting.
    fn is_reachable(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub topic_id: String,
    pub sequence_number: u64,
    pub payload_json: String,
    pub prev_hash: [u8; 32],
    pub entry_hash: [u8; 32],
}

/// Non-persistent ledger with the same sequencing and chaining as the sealed one.
#[derive(Debug)]
pub struct InMemoryAuditLedger {
    topics: Mutex<HashMap<String, Vec<LedgerEntry>>>,
    reachable: AtomicBool,
}

impl InMemoryAuditLedger {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate an outage. Submissions fail while the ledger is unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn entries(&self, topic_id: &str) -> Result<Vec<LedgerEntry>> {
        let topics = self
            .topics
            .lock()
            .map_err(|_| anyhow!("in-memory ledger lock poisoned"))?;
        Ok(topics.get(topic_id).cloned().unwrap_or_default())
    }
}

impl Default for InMemoryAuditLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLedger for InMemoryAuditLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn submit(&self, topic_id: &str, message: &[u8]) -> Result<u64> {
        if !self.is_reachable() {
            return Err(anyhow!("ledger unreachable"));
        }
        let payload_json = std::str::from_utf8(message)
            .map_err(|e| anyhow!("ledger message is not valid UTF-8: {}", e))?
            .to_string();
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| anyhow!("in-memory ledger lock poisoned"))?;
        let entries = topics.entry(topic_id.to_string()).or_default();
        let (prev_hash, sequence_number) = match entries.last() {
            Some(last) => (last.entry_hash, last.sequence_number + 1),
            None => (GENESIS_HASH, 1),
        };
        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
        entries.push(LedgerEntry {
            topic_id: topic_id.to_string(),
            sequence_number,
            payload_json,
            prev_hash,
            entry_hash,
        });
        Ok(sequence_number)
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_per_topic_and_chained() -> Result<()> {
        let ledger = InMemoryAuditLedger::new();
        assert_eq!(ledger.submit("0.0.1", b"{\"a\":1}")?, 1);
        assert_eq!(ledger.submit("0.0.1", b"{\"a\":2}")?, 2);
        assert_eq!(ledger.submit("0.0.2", b"{\"a\":3}")?, 1);

        let entries = ledger.entries("0.0.1")?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[1].prev_hash, entries[0].entry_hash);
        Ok(())
    }

    #[test]
    fn unreachable_ledger_rejects_submissions() {
        let ledger = InMemoryAuditLedger::new();
        ledger.set_reachable(false);
        assert!(!ledger.is_reachable());
        assert!(ledger.submit("0.0.1", b"{}").is_err());
        assert!(ledger.entries("0.0.1").unwrap().is_empty());
    }
}
