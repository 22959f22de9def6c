//! Per-alert-key cooldown gate.

use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Each key fires at most once per cooldown window; keys have independent clocks.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown_s: f64,
    last_fired: HashMap<String, f64>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown_s: cooldown.as_secs_f64(),
            last_fired: HashMap::new(),
        }
    }

    pub fn should_fire(&self, alert_key: &str, now: f64) -> bool {
        match self.last_fired.get(alert_key) {
            Some(last) => now - last >= self.cooldown_s,
            None => true,
        }
    }

    /// Must follow a positive `should_fire` for the same key.
    pub fn record_fired(&mut self, alert_key: &str, now: f64) {
        self.last_fired.insert(alert_key.to_string(), now);
    }

    /// Drop keys whose cooldown has run out. Such entries no longer change any
    /// firing decision.
    pub fn evict_expired(&mut self, now: f64) -> usize {
        let cooldown_s = self.cooldown_s;
        let before = self.last_fired.len();
        self.last_fired.retain(|_, last| now - *last < cooldown_s);
        before - self.last_fired.len()
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_fired.clear();
    }
}
