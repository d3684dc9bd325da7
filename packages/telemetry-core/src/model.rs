//! Domain types persisted and mutated by the ingest engine.
//!
//! These mirror the three entities the rest of the system reasons about: a
//! call, its append-only event log, and the supervisor alerts raised against
//! it. There is no database here - the ingest engine owns these in memory,
//! keyed by `call_id`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::LAST_TEXT_MAX_LEN;

/// Free-form metadata bag merged (not replaced) on every update.
pub type Metadata = BTreeMap<String, Value>;

/// A normalized speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    Customer,
}

impl Speaker {
    /// Normalizes a free-text speaker label per the shared `speaker` mapping rule.
    ///
    /// `"agent"`/`"user"`/`"acd"` -> agent, `"customer"`/`"external"`/`"client"` -> customer.
    /// Anything else is not a recognized speaker and returns `None`.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "agent" | "user" | "acd" => Some(Self::Agent),
            "customer" | "external" | "client" => Some(Self::Customer),
            _ => None,
        }
    }
}

/// Mutable per-call state tracked by the ingest engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeCall {
    pub call_id: String,
    pub provider: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub customer_id: Option<String>,
    pub last_speaker: Option<Speaker>,
    pub last_text: String,
    pub sentiment_score: f64,
    pub risk_score: f64,
    pub metadata: Metadata,
}

impl RealtimeCall {
    /// Creates a brand new call record for `call_id` at `now`.
    pub fn new(call_id: impl Into<String>, provider: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            call_id: call_id.into(),
            provider: provider.into(),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
            agent_id: None,
            customer_id: None,
            last_speaker: None,
            last_text: String::new(),
            sentiment_score: 0.0,
            risk_score: 0.0,
            metadata: Metadata::new(),
        }
    }

    /// Sets `last_text`, truncating to [`LAST_TEXT_MAX_LEN`] characters.
    pub fn set_last_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let truncated: String = text.chars().take(LAST_TEXT_MAX_LEN).collect();
        self.last_text = truncated;
    }

    /// Merges `other` into this call's metadata, overwriting matching keys.
    pub fn merge_metadata(&mut self, other: Metadata) {
        self.metadata.extend(other);
    }

    /// Whether `status` denotes a terminal (ended) call.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "ended" | "completed" | "closed")
    }
}

/// An append-only event recorded against a [`RealtimeCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub id: u64,
    pub call_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
    pub speaker: Option<Speaker>,
    pub text: String,
    pub sentiment: Option<f64>,
    pub confidence: Option<f64>,
    pub metadata: Metadata,
}

/// Severity of a [`SupervisorAlert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

/// The kind of condition a [`SupervisorAlert`] was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NegativeSentiment,
    EscalationKeyword,
    DeadAir,
    HighRiskScore,
}

/// A supervisor-facing alert raised by the ingest engine against a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorAlert {
    pub id: u64,
    pub call_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

impl SupervisorAlert {
    /// Marks the alert acknowledged at `now`, if not already. Returns whether it changed.
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_normalizes_known_aliases() {
        assert_eq!(Speaker::normalize("AGENT"), Some(Speaker::Agent));
        assert_eq!(Speaker::normalize("acd"), Some(Speaker::Agent));
        assert_eq!(Speaker::normalize("user"), Some(Speaker::Agent));
        assert_eq!(Speaker::normalize("External"), Some(Speaker::Customer));
        assert_eq!(Speaker::normalize("client"), Some(Speaker::Customer));
        assert_eq!(Speaker::normalize("ivr"), None);
    }

    #[test]
    fn set_last_text_truncates_long_values() {
        let mut call = RealtimeCall::new("call-1", "generic", Utc::now());
        let long = "x".repeat(LAST_TEXT_MAX_LEN + 500);
        call.set_last_text(&long);
        assert_eq!(call.last_text.chars().count(), LAST_TEXT_MAX_LEN);
    }

    #[test]
    fn set_last_text_ignores_empty_updates() {
        let mut call = RealtimeCall::new("call-1", "generic", Utc::now());
        call.set_last_text("hello");
        call.set_last_text("");
        assert_eq!(call.last_text, "hello");
    }

    #[test]
    fn is_terminal_matches_known_statuses() {
        let mut call = RealtimeCall::new("call-1", "generic", Utc::now());
        assert!(!call.is_terminal());
        call.status = "completed".to_string();
        assert!(call.is_terminal());
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut alert = SupervisorAlert {
            id: 1,
            call_id: "call-1".into(),
            alert_type: AlertType::HighRiskScore,
            severity: AlertSeverity::Critical,
            message: "risk score too high".into(),
            created_at: Utc::now(),
            acknowledged: false,
            acknowledged_at: None,
            metadata: Metadata::new(),
        };
        let now = Utc::now();
        assert!(alert.acknowledge(now));
        assert!(!alert.acknowledge(now));
    }
}
