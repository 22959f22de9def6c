use anyhow::{anyhow, Result};
use ed25519_dalek::VerifyingKey;
use rusqlite::Connection;

use super::chain::{
    fixed, hash_entry, verify_entry_signature, verifying_key_from_bytes, GENESIS_HASH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub entries: u64,
    pub last_sequence: Option<u64>,
    pub head_hash: [u8; 32],
}

pub fn device_public_key_from_db(conn: &Connection) -> Result<VerifyingKey> {
    let bytes: Vec<u8> = conn
        .query_row(
            "SELECT public_key FROM device_metadata WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                anyhow!("device public key not found in database")
            }
            _ => anyhow!("failed to read device public key from database: {}", e),
        })?;
    verifying_key_from_bytes(&bytes)
}

/// Walks one topic in sequence order and checks continuity, linkage, hashes
/// and signatures. `on_entry` sees every entry that passed.
pub fn verify_topic_chain<F>(
    conn: &Connection,
    topic_id: &str,
    verifying_key: &VerifyingKey,
    mut on_entry: F,
) -> Result<ChainReport>
where
    F: FnMut(u64, [u8; 32]),
{
    let mut stmt = conn.prepare(
        "SELECT sequence_number, payload_json, prev_hash, entry_hash, signature FROM ledger_entries WHERE topic_id = ?1 ORDER BY sequence_number ASC",
    )?;
    let mut rows = stmt.query([topic_id])?;

    let mut expected_prev = GENESIS_HASH;
    let mut expected_seq = 1u64;
    let mut last_sequence = None;
    let mut count = 0u64;

    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let payload: String = row.get(1)?;
        let prev_hash: [u8; 32] = fixed(row.get(2)?, "ledger_entries.prev_hash")?;
        let entry_hash: [u8; 32] = fixed(row.get(3)?, "ledger_entries.entry_hash")?;
        let sig: [u8; 64] = fixed(row.get(4)?, "ledger_entries.signature")?;

        let seq = u64::try_from(seq)
            .map_err(|_| anyhow!("integrity check failed: negative sequence {}", seq))?;
        if seq != expected_seq {
            return Err(anyhow!(
                "integrity check failed on topic {}: sequence gap (found {}, expected {})",
                topic_id,
                seq,
                expected_seq
            ));
        }

        if prev_hash != expected_prev {
            return Err(anyhow!(
                "integrity check failed at seq {}: prev_hash={}, expected_prev={}",
                seq,
                hex::encode(prev_hash),
                hex::encode(expected_prev)
            ));
        }

        let computed = hash_entry(&expected_prev, payload.as_bytes());
        if computed != entry_hash {
            return Err(anyhow!(
                "integrity check failed at seq {}: computed_hash={}, stored_hash={}",
                seq,
                hex::encode(computed),
                hex::encode(entry_hash)
            ));
        }

        if verify_entry_signature(verifying_key, &entry_hash, &sig).is_err() {
            return Err(anyhow!(
                "integrity check failed at seq {}: signature mismatch (stored={})",
                seq,
                hex::encode(sig)
            ));
        }

        on_entry(seq, entry_hash);

        expected_prev = entry_hash;
        expected_seq = seq + 1;
        last_sequence = Some(seq);
        count += 1;
    }

    Ok(ChainReport {
        entries: count,
        last_sequence,
        head_hash: expected_prev,
    })
}

/// Every topic with at least one entry, sorted.
pub fn ledger_topics(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT topic_id FROM ledger_entries ORDER BY topic_id ASC")?;
    let topics = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(topics)
}
