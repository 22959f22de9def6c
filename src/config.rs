use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::cooldown::DEFAULT_COOLDOWN_SECS;
use crate::orchestrator::{FeedPolicy, DEFAULT_STALE_FACTOR, DEFAULT_WINDOW_SECS};
use crate::rules::{RuleThresholds, DEFAULT_MIN_SAMPLES, DEFAULT_MOVEMENT_THRESHOLD};
use crate::submitter::{SubmitterConfig, DEFAULT_SUBMIT_TIMEOUT_MS};

const DEFAULT_DB_PATH: &str = "tutela_audit.db";
const DEFAULT_FARM_ID: &str = "farm-001";
const DEFAULT_LOCATION: &str = "pen-a";
const DEFAULT_TOPIC_ID: &str = "0.0.0";
const DEFAULT_FEED_ID: &str = "pen-a";

#[derive(Debug, Deserialize, Default)]
struct KernelConfigFile {
    db_path: Option<String>,
    ledger: Option<LedgerConfigFile>,
    feed: Option<FeedConfigFile>,
    rules: Option<RulesConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct LedgerConfigFile {
    farm_id: Option<String>,
    location: Option<String>,
    topic_id: Option<String>,
    submit_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct FeedConfigFile {
    feed_id: Option<String>,
    expected_count: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RulesConfigFile {
    history_window_secs: Option<u64>,
    cooldown_secs: Option<u64>,
    min_samples: Option<usize>,
    movement_threshold: Option<f64>,
    stale_factor: Option<u32>,
}

#[derive(Clone)]
pub struct KernelSettings {
    pub db_path: String,
    /// Seed for the ledger signing key. Only ever read from `DEVICE_KEY_SEED`.
    pub device_key_seed: Option<Zeroizing<String>>,
    pub ledger: LedgerSettings,
    pub feed: FeedSettings,
    pub policy: FeedPolicy,
}

impl std::fmt::Debug for KernelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSettings")
            .field("db_path", &self.db_path)
            .field(
                "device_key_seed",
                &self.device_key_seed.as_ref().map(|_| "<redacted>"),
            )
            .field("ledger", &self.ledger)
            .field("feed", &self.feed)
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub farm_id: String,
    pub location: String,
    pub topic_id: String,
    pub submit_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub feed_id: String,
    /// Fallback headcount for batches that do not carry one.
    pub expected_count: Option<u32>,
}

impl KernelSettings {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TUTELA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            farm_id: self.ledger.farm_id.clone(),
            location: self.ledger.location.clone(),
            topic_id: self.ledger.topic_id.clone(),
            timeout: self.ledger.submit_timeout,
        }
    }

    fn from_file(file: KernelConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let ledger_file = file.ledger.unwrap_or_default();
        let ledger = LedgerSettings {
            farm_id: ledger_file
                .farm_id
                .unwrap_or_else(|| DEFAULT_FARM_ID.to_string()),
            location: ledger_file
                .location
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            topic_id: ledger_file
                .topic_id
                .unwrap_or_else(|| DEFAULT_TOPIC_ID.to_string()),
            submit_timeout: Duration::from_millis(
                ledger_file
                    .submit_timeout_ms
                    .unwrap_or(DEFAULT_SUBMIT_TIMEOUT_MS),
            ),
        };
        let feed_file = file.feed.unwrap_or_default();
        let feed = FeedSettings {
            feed_id: feed_file
                .feed_id
                .unwrap_or_else(|| DEFAULT_FEED_ID.to_string()),
            expected_count: feed_file.expected_count,
        };
        let rules = file.rules.unwrap_or_default();
        let policy = FeedPolicy {
            history_window: Duration::from_secs(
                rules.history_window_secs.unwrap_or(DEFAULT_WINDOW_SECS),
            ),
            cooldown: Duration::from_secs(rules.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS)),
            thresholds: RuleThresholds {
                min_samples: rules.min_samples.unwrap_or(DEFAULT_MIN_SAMPLES),
                movement_threshold: rules
                    .movement_threshold
                    .unwrap_or(DEFAULT_MOVEMENT_THRESHOLD),
            },
            stale_factor: rules.stale_factor.unwrap_or(DEFAULT_STALE_FACTOR),
        };
        Self {
            db_path,
            device_key_seed: None,
            ledger,
            feed,
            policy,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("TUTELA_DB_PATH") {
            self.db_path = path;
        }
        if let Some(farm_id) = non_empty_env("TUTELA_FARM_ID") {
            self.ledger.farm_id = farm_id;
        }
        if let Some(location) = non_empty_env("TUTELA_LOCATION") {
            self.ledger.location = location;
        }
        if let Some(topic_id) = non_empty_env("TUTELA_TOPIC_ID") {
            self.ledger.topic_id = topic_id;
        }
        if let Some(feed_id) = non_empty_env("TUTELA_FEED_ID") {
            self.feed.feed_id = feed_id;
        }
        if let Some(count) = non_empty_env("TUTELA_EXPECTED_COUNT") {
            let count: u32 = count.parse().map_err(|_| {
                anyhow!("TUTELA_EXPECTED_COUNT must be a non-negative integer")
            })?;
            self.feed.expected_count = Some(count);
        }
        if let Some(timeout) = non_empty_env("TUTELA_SUBMIT_TIMEOUT_MS") {
            let ms: u64 = timeout.parse().map_err(|_| {
                anyhow!("TUTELA_SUBMIT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.ledger.submit_timeout = Duration::from_millis(ms);
        }
        if let Some(cooldown) = non_empty_env("TUTELA_COOLDOWN_SECS") {
            let secs: u64 = cooldown.parse().map_err(|_| {
                anyhow!("TUTELA_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.policy.cooldown = Duration::from_secs(secs);
        }
        if let Some(seed) = non_empty_env("DEVICE_KEY_SEED") {
            self.device_key_seed = Some(Zeroizing::new(seed));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_topic_id(&self.ledger.topic_id)?;
        validate_farm_id(&self.ledger.farm_id)?;
        crate::feeds::validate_feed_id(&self.feed.feed_id)?;
        if self.ledger.location.trim().is_empty() {
            return Err(anyhow!("location must not be empty"));
        }
        if self.ledger.submit_timeout.is_zero() {
            return Err(anyhow!("submit timeout must be greater than zero"));
        }
        if self.policy.history_window.is_zero() {
            return Err(anyhow!("history window must be greater than zero"));
        }
        if self.policy.cooldown.is_zero() {
            return Err(anyhow!("cooldown must be greater than zero"));
        }
        if self.policy.thresholds.min_samples < 2 {
            return Err(anyhow!("min_samples must be at least 2"));
        }
        let threshold = self.policy.thresholds.movement_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(anyhow!("movement_threshold must be a positive number"));
        }
        if self.policy.stale_factor == 0 {
            return Err(anyhow!("stale_factor must be at least 1"));
        }
        Ok(())
    }
}

/// Ledger topics use the `shard.realm.num` form, e.g. `0.0.4242`.
pub fn validate_topic_id(topic_id: &str) -> Result<()> {
    static TOPIC_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = TOPIC_ID_RE.get_or_init(|| regex::Regex::new(r"^\d+\.\d+\.\d+$").unwrap());
    if !re.is_match(topic_id) {
        return Err(anyhow!(
            "topic_id must look like shard.realm.num (got {:?})",
            topic_id
        ));
    }
    Ok(())
}

fn validate_farm_id(farm_id: &str) -> Result<()> {
    static FARM_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = FARM_ID_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());
    if !re.is_match(farm_id) {
        return Err(anyhow!("farm_id must match ^[A-Za-z0-9_-]{{1,64}}$"));
    }
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<KernelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
