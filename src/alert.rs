//! Alert conditions and the immutable alerts built from them.

use serde::{Deserialize, Serialize};

use crate::detect::TrackId;

pub const COUNT_MISMATCH_KEY: &str = "count_mismatch";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    CountMismatch { expected: u32, observed: u32 },
    Inactivity { track_id: TrackId },
}

impl AlertCondition {
    /// Dedup identity. Count mismatch is feed-global; inactivity is per track.
    pub fn alert_key(&self) -> String {
        match self {
            AlertCondition::CountMismatch { .. } => COUNT_MISMATCH_KEY.to_string(),
            AlertCondition::Inactivity { track_id } => format!("inactivity_{}", track_id),
        }
    }

    pub fn alert_type(&self) -> &'static str {
        match self {
            AlertCondition::CountMismatch { .. } => "count_mismatch",
            AlertCondition::Inactivity { .. } => "inactivity",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertCondition::CountMismatch { .. } => Severity::High,
            AlertCondition::Inactivity { .. } => Severity::Medium,
        }
    }

    fn risk_text(&self) -> String {
        match *self {
            AlertCondition::CountMismatch { expected, observed } if observed < expected => {
                format!(
                    "{} of {} animals missing from view - possibly sick, hiding or escaped",
                    expected - observed,
                    expected
                )
            }
            AlertCondition::CountMismatch { expected, observed } => format!(
                "{} animals detected but {} expected - possible unauthorized entry",
                observed, expected
            ),
            AlertCondition::Inactivity { track_id } => format!(
                "Pig #{} has barely moved across the observation window - possible illness, injury or distress",
                track_id
            ),
        }
    }

    fn action_text(&self) -> String {
        match *self {
            AlertCondition::CountMismatch { expected, observed } if observed < expected => {
                "Inspect the enclosure and locate the missing animals".to_string()
            }
            AlertCondition::CountMismatch { .. } => {
                "Check enclosure security and identify the extra animals".to_string()
            }
            AlertCondition::Inactivity { track_id } => {
                format!("Check pig #{} for signs of illness or injury", track_id)
            }
        }
    }
}

/// A fired condition. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    alert_key: String,
    condition: AlertCondition,
    severity: Severity,
    timestamp: f64,
    risk: String,
    action: String,
}

impl Alert {
    pub fn fire(condition: AlertCondition, timestamp: f64) -> Self {
        Self {
            alert_key: condition.alert_key(),
            severity: condition.severity(),
            risk: condition.risk_text(),
            action: condition.action_text(),
            condition,
            timestamp,
        }
    }

    pub fn alert_key(&self) -> &str {
        &self.alert_key
    }

    pub fn condition(&self) -> &AlertCondition {
        &self.condition
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn risk(&self) -> &str {
        &self.risk
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Wire form committed to the audit ledger.
    pub fn ledger_message<'a>(&'a self, farm_id: &'a str, location: &'a str) -> LedgerMessage<'a> {
        let (pig_id, expected_count, detected_count) = match self.condition {
            AlertCondition::CountMismatch { expected, observed } => {
                (None, Some(expected), Some(observed))
            }
            AlertCondition::Inactivity { track_id } => (Some(track_id), None, None),
        };
        LedgerMessage {
            farm_id,
            location,
            alert_type: self.condition.alert_type(),
            severity: self.severity,
            timestamp: self.timestamp,
            risk: &self.risk,
            action: &self.action,
            pig_id,
            expected_count,
            detected_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LedgerMessage<'a> {
    #[serde(rename = "farmId")]
    pub farm_id: &'a str,
    pub location: &'a str,
    pub alert_type: &'static str,
    pub severity: Severity,
    pub timestamp: f64,
    pub risk: &'a str,
    pub action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pig_id: Option<TrackId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_count: Option<u32>,
}
