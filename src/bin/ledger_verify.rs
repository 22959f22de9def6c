//! ledger_verify - offline verifier for the sealed audit ledger
//!
//! Checks, per topic, that sequence numbers run from 1 without gaps, that
//! every entry links to its predecessor, that stored hashes match the
//! payloads and that every entry carries a valid device signature.

use anyhow::{anyhow, Result};
use clap::Parser;
use ed25519_dalek::VerifyingKey;
use rusqlite::Connection;

use tutela_kernel::ledger::{
    device_public_key_from_db, ledger_topics, verify_topic_chain, verifying_key_from_bytes,
};
use tutela_kernel::open_db_connection;

#[derive(Parser, Debug)]
#[command(
    name = "ledger_verify",
    about = "Verify audit ledger integrity (hash-chain + signatures)"
)]
struct Args {
    /// Path to the audit ledger SQLite DB
    #[arg(long, env = "TUTELA_DB_PATH", default_value = "tutela_audit.db")]
    db: String,

    /// Only verify this topic (default: every topic in the ledger)
    #[arg(long, value_name = "TOPIC_ID")]
    topic: Option<String>,

    /// Device public key (hex-encoded Ed25519 verifying key)
    #[arg(long, value_name = "HEX")]
    public_key: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.db.starts_with("file:") && !std::path::Path::new(&args.db).exists() {
        return Err(anyhow!("database {} does not exist", args.db));
    }
    let conn = open_db_connection(&args.db)?;
    let verifying_key = load_verifying_key(&conn, args.public_key.as_deref())?;

    println!("ledger_verify: checking {}", args.db);
    println!("device key: {}", hex::encode(verifying_key.to_bytes()));
    println!();

    let topics = match &args.topic {
        Some(topic) => vec![topic.clone()],
        None => ledger_topics(&conn)?,
    };
    if topics.is_empty() {
        println!("no ledger entries");
        return Ok(());
    }

    let mut total = 0u64;
    for topic in &topics {
        println!("=== Topic {} ===", topic);
        let report = verify_topic_chain(&conn, topic, &verifying_key, |seq, entry_hash| {
            if args.verbose {
                println!("  seq {}: hash={} OK", seq, &hex::encode(entry_hash)[..16]);
            }
        })?;
        match report.last_sequence {
            Some(last) => println!(
                "verified {} entries (last seq {}, head {})",
                report.entries,
                last,
                &hex::encode(report.head_hash)[..16]
            ),
            None => println!("no entries"),
        }
        total += report.entries;
        println!();
    }

    println!(
        "OK: {} entries across {} topic(s) verified",
        total,
        topics.len()
    );
    Ok(())
}

fn load_verifying_key(conn: &Connection, public_key_hex: Option<&str>) -> Result<VerifyingKey> {
    if let Some(hex_str) = public_key_hex {
        let bytes = hex::decode(hex_str.trim()).map_err(|e| anyhow!("invalid hex: {}", e))?;
        return verifying_key_from_bytes(&bytes);
    }
    device_public_key_from_db(conn).map_err(|e| {
        anyhow!(
            "{} (provide --public-key if the database has no key)",
            e
        )
    })
}
