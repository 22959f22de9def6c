use anyhow::{anyhow, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard, TryLockError};

use super::chain::{fixed, hash_entry, sign_entry, signing_key_from_seed, GENESIS_HASH};
use super::verify::{device_public_key_from_db, verify_topic_chain, ChainReport};
use super::AuditLedger;
use crate::{now_s, open_db_connection, shared_memory_uri};

/// Sealed ledger backed by SQLite.
///
/// Every entry is chained to the previous entry of the same topic and signed
/// with the device key. The device public key is pinned on first open; a later
/// open with a different seed fails instead of forking the chain.
pub struct SqliteAuditLedger {
    conn: Mutex<Connection>,
    signing_key: SigningKey,
}

impl SqliteAuditLedger {
    pub fn open(db_path: &str, device_key_seed: &str) -> Result<Self> {
        let db_path = if db_path == ":memory:" {
            shared_memory_uri()
        } else {
            db_path.to_string()
        };
        let conn = open_db_connection(&db_path)?;
        let signing_key = signing_key_from_seed(device_key_seed)?;
        let ledger = Self {
            conn: Mutex::new(conn),
            signing_key,
        };
        {
            let conn = ledger.lock()?;
            ensure_schema(&conn)?;
            ensure_device_public_key(&conn, &ledger.signing_key.verifying_key())?;
        }
        Ok(ledger)
    }

    pub fn device_verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Re-derive and check the full chain of one topic.
    pub fn verify_topic(&self, topic_id: &str) -> Result<ChainReport> {
        let conn = self.lock()?;
        verify_topic_chain(&conn, topic_id, &self.device_verifying_key(), |_, _| {})
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sealed ledger connection lock poisoned"))
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS ledger_entries (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          created_at INTEGER NOT NULL,
          topic_id TEXT NOT NULL,
          sequence_number INTEGER NOT NULL,
          payload_json TEXT NOT NULL,
          prev_hash BLOB NOT NULL,
          entry_hash BLOB NOT NULL,
          signature BLOB NOT NULL,
          UNIQUE (topic_id, sequence_number)
        );

        CREATE TABLE IF NOT EXISTS device_metadata (
          id INTEGER PRIMARY KEY CHECK (id = 1),
          public_key BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ledger_topic_seq
          ON ledger_entries(topic_id, sequence_number);
        "#,
    )?;
    Ok(())
}

fn ensure_device_public_key(conn: &Connection, verifying_key: &VerifyingKey) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO device_metadata (id, public_key) VALUES (1, ?1)",
        params![verifying_key.to_bytes().to_vec()],
    )?;
    let pinned = device_public_key_from_db(conn)?;
    if pinned != *verifying_key {
        return Err(anyhow!(
            "ledger is pinned to device key {}; DEVICE_KEY_SEED derives {}",
            hex::encode(pinned.to_bytes()),
            hex::encode(verifying_key.to_bytes())
        ));
    }
    Ok(())
}

impl AuditLedger for SqliteAuditLedger {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn submit(&self, topic_id: &str, message: &[u8]) -> Result<u64> {
        let payload_json = std::str::from_utf8(message)
            .map_err(|e| anyhow!("ledger message is not valid UTF-8: {}", e))?;
        let created_at = i64::try_from(now_s()?)
            .map_err(|_| anyhow!("system clock exceeds i64 range"))?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let head: Option<(i64, Vec<u8>)> = tx
            .query_row(
                "SELECT sequence_number, entry_hash FROM ledger_entries WHERE topic_id = ?1 ORDER BY sequence_number DESC LIMIT 1",
                params![topic_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (prev_hash, sequence_number) = match head {
            Some((last_seq, hash)) => (fixed::<32>(hash, "ledger_entries.entry_hash")?, last_seq + 1),
            None => (GENESIS_HASH, 1),
        };

        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
        let signature = sign_entry(&self.signing_key, &entry_hash);

        tx.execute(
            r#"
            INSERT INTO ledger_entries(
                created_at,
                topic_id,
                sequence_number,
                payload_json,
                prev_hash,
                entry_hash,
                signature
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                created_at,
                topic_id,
                sequence_number,
                payload_json,
                prev_hash.to_vec(),
                entry_hash.to_vec(),
                signature.to_vec()
            ],
        )?;
        tx.commit()?;

        u64::try_from(sequence_number).map_err(|_| anyhow!("negative sequence number in ledger"))
    }

    /// Never waits on an in-flight `submit`: a connection busy with a commit
    /// counts as reachable.
    fn is_reachable(&self) -> bool {
        match self.conn.try_lock() {
            Ok(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
        }
    }
}
