use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use tutela_kernel::config::KernelSettings;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TUTELA_CONFIG",
        "TUTELA_DB_PATH",
        "TUTELA_FARM_ID",
        "TUTELA_LOCATION",
        "TUTELA_TOPIC_ID",
        "TUTELA_FEED_ID",
        "TUTELA_EXPECTED_COUNT",
        "TUTELA_SUBMIT_TIMEOUT_MS",
        "TUTELA_COOLDOWN_SECS",
        "DEVICE_KEY_SEED",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "db_path": "barn_audit.db",
        "ledger": {
            "farm_id": "farm-042",
            "location": "barn-2",
            "topic_id": "0.0.4242",
            "submit_timeout_ms": 2500
        },
        "feed": { "feed_id": "barn-2-cam", "expected_count": 12 },
        "rules": {
            "history_window_secs": 20,
            "cooldown_secs": 60,
            "min_samples": 6,
            "movement_threshold": 35.0
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("TUTELA_CONFIG", file.path());
    std::env::set_var("TUTELA_TOPIC_ID", "0.0.9001");
    std::env::set_var("TUTELA_COOLDOWN_SECS", "45");
    std::env::set_var("DEVICE_KEY_SEED", "barn-2-device");

    let cfg = KernelSettings::load().expect("load config");
    assert_eq!(cfg.db_path, "barn_audit.db");
    assert_eq!(cfg.ledger.farm_id, "farm-042");
    assert_eq!(cfg.ledger.location, "barn-2");
    assert_eq!(cfg.ledger.topic_id, "0.0.9001");
    assert_eq!(cfg.ledger.submit_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.feed.feed_id, "barn-2-cam");
    assert_eq!(cfg.feed.expected_count, Some(12));
    assert_eq!(cfg.policy.history_window, Duration::from_secs(20));
    assert_eq!(cfg.policy.cooldown, Duration::from_secs(45));
    assert_eq!(cfg.policy.thresholds.min_samples, 6);
    assert_eq!(cfg.policy.thresholds.movement_threshold, 35.0);
    assert_eq!(
        cfg.device_key_seed.as_deref().map(String::as_str),
        Some("barn-2-device")
    );

    let submitter = cfg.submitter_config();
    assert_eq!(submitter.topic_id, "0.0.9001");
    assert_eq!(submitter.farm_id, "farm-042");

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
db_path = "pen_audit.db"

[ledger]
farm_id = "farm-007"
topic_id = "0.0.77"

[rules]
cooldown_secs = 10
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("TUTELA_CONFIG", file.path());

    let cfg = KernelSettings::load().expect("load toml config");
    assert_eq!(cfg.db_path, "pen_audit.db");
    assert_eq!(cfg.ledger.farm_id, "farm-007");
    assert_eq!(cfg.ledger.location, "pen-a");
    assert_eq!(cfg.policy.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.policy.history_window, Duration::from_secs(15));
    assert!(cfg.device_key_seed.is_none());

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = KernelSettings::load().expect("load defaults");
    assert_eq!(cfg.db_path, "tutela_audit.db");
    assert_eq!(cfg.ledger.farm_id, "farm-001");
    assert_eq!(cfg.ledger.topic_id, "0.0.0");
    assert_eq!(cfg.ledger.submit_timeout, Duration::from_millis(5000));
    assert_eq!(cfg.policy.cooldown, Duration::from_secs(30));
    assert_eq!(cfg.feed.expected_count, None);
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TUTELA_TOPIC_ID", "topic-7");
    assert!(KernelSettings::load().is_err());
    clear_env();

    std::env::set_var("TUTELA_FARM_ID", "farm 001");
    assert!(KernelSettings::load().is_err());
    clear_env();

    std::env::set_var("TUTELA_EXPECTED_COUNT", "-3");
    assert!(KernelSettings::load().is_err());
    clear_env();

    std::env::set_var("TUTELA_SUBMIT_TIMEOUT_MS", "0");
    assert!(KernelSettings::load().is_err());
    clear_env();

    std::env::set_var("TUTELA_COOLDOWN_SECS", "soon");
    assert!(KernelSettings::load().is_err());
    clear_env();
}

#[test]
fn unreadable_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    std::env::set_var("TUTELA_CONFIG", file.path());
    assert!(KernelSettings::load().is_err());

    std::env::set_var("TUTELA_CONFIG", "/nonexistent/tutela.json");
    assert!(KernelSettings::load().is_err());
    clear_env();
}
