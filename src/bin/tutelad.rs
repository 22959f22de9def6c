//! tutelad - Tutela alert kernel daemon
//!
//! This daemon:
//! 1. Reads detector output, one JSON detection batch per line
//! 2. Runs every frame through the feed pipeline (rules, cooldown, audit)
//! 3. Commits fired alerts to the sealed SQLite audit ledger
//! 4. Writes one JSON frame report (or error) per input line to stdout

use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;

use tutela_kernel::{
    AuditSubmitter, CancelToken, DefaultHeadcount, DetectionSource, FeedRegistry, JsonLinesSource,
    KernelSettings, SqliteAuditLedger,
};

const HEALTH_LOG_EVERY: u64 = 100;

#[derive(Parser, Debug)]
#[command(name = "tutelad", about = "Tutela enclosure alert kernel")]
struct Args {
    /// Detector output to read, one JSON batch per line ("-" for stdin)
    #[arg(long, default_value = "-")]
    input: String,

    /// Feed label for this stream (overrides config)
    #[arg(long)]
    feed_id: Option<String>,

    /// Path to a JSON or TOML config file
    #[arg(long, env = "TUTELA_CONFIG")]
    config: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("TUTELA_CONFIG", path);
    }
    let settings = KernelSettings::load()?;
    let feed_id = args
        .feed_id
        .clone()
        .unwrap_or_else(|| settings.feed.feed_id.clone());
    tutela_kernel::feeds::validate_feed_id(&feed_id)?;

    let seed = settings
        .device_key_seed
        .as_ref()
        .ok_or_else(|| anyhow!("DEVICE_KEY_SEED must be set"))?;
    let ledger = SqliteAuditLedger::open(&settings.db_path, seed)?;
    log::info!(
        "audit ledger {} opened (device key {})",
        settings.db_path,
        hex::encode(ledger.device_verifying_key().to_bytes())
    );

    let submitter = Arc::new(AuditSubmitter::new(
        Arc::new(ledger),
        settings.submitter_config(),
    ));
    let registry = FeedRegistry::new(settings.policy, submitter);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            cancel.cancel();
        })?;
    }

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input)
            .map_err(|e| anyhow!("failed to open input {}: {}", args.input, e))?;
        Box::new(BufReader::new(file))
    };
    let mut source = DefaultHeadcount::new(
        JsonLinesSource::new(reader),
        settings.feed.expected_count,
    );

    log::info!(
        "tutelad running (feed={}, topic={}, expected_count={:?})",
        feed_id,
        settings.ledger.topic_id,
        settings.feed.expected_count
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut frames = 0u64;
    while !cancel.is_cancelled() {
        let line = match registry.process_next(&feed_id, &mut source, &cancel) {
            Ok(Some(report)) => serde_json::to_string(&report)?,
            Ok(None) => break,
            Err(e) => {
                log::warn!("feed {}: frame rejected: {}", feed_id, e);
                serde_json::json!({ "error": e.to_string(), "code": e.code() }).to_string()
            }
        };
        writeln!(out, "{}", line)?;
        out.flush()?;

        frames += 1;
        if frames % HEALTH_LOG_EVERY == 0 {
            if let Some(health) = registry.health(&feed_id, source.is_healthy()) {
                log::info!(
                    "health: feed={} state={:?} ledger_reachable={} active_tracks={} cooldown_keys={} late_commits={}",
                    health.feed_id,
                    health.state,
                    health.ledger_reachable,
                    health.active_tracks,
                    health.cooldown_keys,
                    health.late_commits
                );
            }
        }
    }

    log::info!("tutelad stopped after {} frames", frames);
    Ok(())
}
