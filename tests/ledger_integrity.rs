use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use tutela_kernel::ledger::{
    device_public_key_from_db, ledger_topics, verify_topic_chain, verifying_key_from_seed,
};
use tutela_kernel::{
    AuditLedger, AuditSubmitter, CancelToken, DetectionBatch, FeedPolicy, FrameOrchestrator,
    SqliteAuditLedger, SubmitterConfig,
};

const SEED: &str = "barn-2-device-seed";

fn db_path(dir: &TempDir) -> String {
    dir.path().join("audit.db").to_string_lossy().into_owned()
}

#[test]
fn committed_alerts_verify_after_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);

    {
        let ledger = Arc::new(SqliteAuditLedger::open(&path, SEED)?);
        let submitter = AuditSubmitter::new(
            ledger,
            SubmitterConfig {
                farm_id: "farm-001".to_string(),
                location: "barn-2".to_string(),
                topic_id: "0.0.4242".to_string(),
                timeout: Duration::from_secs(5),
            },
        );
        let mut orchestrator =
            FrameOrchestrator::new("barn-2", FeedPolicy::default(), Arc::new(submitter));
        for (i, t) in [0.0, 30.0, 60.0].into_iter().enumerate() {
            let batch = DetectionBatch {
                frame_id: i as u64 + 1,
                timestamp: t,
                expected_count: Some(4),
                detections: Vec::new(),
            };
            let report = orchestrator.process_frame(batch, &CancelToken::new())?;
            assert_eq!(report.receipts.len(), 1);
            assert_eq!(report.receipts[0].sequence_number, Some(i as u64 + 1));
        }
    }

    let reopened = SqliteAuditLedger::open(&path, SEED)?;
    let report = reopened.verify_topic("0.0.4242")?;
    assert_eq!(report.entries, 3);
    assert_eq!(report.last_sequence, Some(3));

    assert_eq!(reopened.submit("0.0.4242", br#"{"note":"manual"}"#)?, 4);

    let conn = Connection::open(&path)?;
    let key = device_public_key_from_db(&conn)?;
    assert_eq!(key, verifying_key_from_seed(SEED)?);
    assert_eq!(ledger_topics(&conn)?, vec!["0.0.4242".to_string()]);
    let mut seen = Vec::new();
    let report = verify_topic_chain(&conn, "0.0.4242", &key, |seq, _| seen.push(seq))?;
    assert_eq!(report.entries, 4);
    assert_eq!(seen, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn tampered_payload_is_detected() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let ledger = SqliteAuditLedger::open(&path, SEED)?;
    ledger.submit("0.0.7", br#"{"alert_type":"count_mismatch"}"#)?;
    ledger.submit("0.0.7", br#"{"alert_type":"inactivity"}"#)?;

    let conn = Connection::open(&path)?;
    conn.execute(
        "UPDATE ledger_entries SET payload_json = ?1 WHERE topic_id = ?2 AND sequence_number = 1",
        params![r#"{"alert_type":"nothing_happened"}"#, "0.0.7"],
    )?;

    let key = device_public_key_from_db(&conn)?;
    let err = verify_topic_chain(&conn, "0.0.7", &key, |_, _| {}).unwrap_err();
    assert!(err.to_string().contains("integrity check failed"));
    Ok(())
}

#[test]
fn deleted_entry_breaks_sequence() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let ledger = SqliteAuditLedger::open(&path, SEED)?;
    for _ in 0..3 {
        ledger.submit("0.0.7", br#"{"alert_type":"inactivity"}"#)?;
    }

    let conn = Connection::open(&path)?;
    conn.execute(
        "DELETE FROM ledger_entries WHERE topic_id = ?1 AND sequence_number = 2",
        params!["0.0.7"],
    )?;
    let key = device_public_key_from_db(&conn)?;
    let err = verify_topic_chain(&conn, "0.0.7", &key, |_, _| {}).unwrap_err();
    assert!(err.to_string().contains("sequence gap"));
    Ok(())
}

#[test]
fn foreign_key_fails_signature_check() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let ledger = SqliteAuditLedger::open(&path, SEED)?;
    ledger.submit("0.0.7", br#"{"alert_type":"inactivity"}"#)?;

    let conn = Connection::open(&path)?;
    let other = verifying_key_from_seed("some-other-device")?;
    let err = verify_topic_chain(&conn, "0.0.7", &other, |_, _| {}).unwrap_err();
    assert!(err.to_string().contains("signature mismatch"));
    Ok(())
}

#[test]
fn reopen_with_other_seed_is_refused() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    drop(SqliteAuditLedger::open(&path, SEED)?);
    assert!(SqliteAuditLedger::open(&path, "another-seed").is_err());
    Ok(())
}
