//! Pub/sub event bus (C3): bounded per-subscriber mailboxes, in-process only.
//!
//! The payload types published on the bus. Transport (SSE framing, JSON
//! serialization) is handled by [`bus::EventBus`] and the `api` module;
//! this file only defines what gets published.

pub mod bus;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use bus::EventBus;

use crate::model::{AlertSeverity, AlertType, Metadata, Speaker};

/// A single message published on the event bus.
///
/// Tagged so subscribers (the SSE gateway, tests) can dispatch on `type`
/// without needing the full schema up front.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    RealtimeEvent(RealtimeEventPayload),
    SupervisorAlert(SupervisorAlertPayload),
    SupervisorAlertAck(SupervisorAlertAckPayload),
}

impl BusMessage {
    /// The `call_id` this message concerns, used by `/stream?call_id=...` filtering.
    pub fn call_id(&self) -> &str {
        match self {
            Self::RealtimeEvent(p) => &p.call_id,
            Self::SupervisorAlert(p) => &p.call_id,
            Self::SupervisorAlertAck(p) => &p.call_id,
        }
    }
}

/// Published once per committed ingest, carrying the call's post-update state.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEventPayload {
    pub call_id: String,
    pub event_id: u64,
    pub provider: String,
    pub status: String,
    pub event_type: String,
    pub speaker: Option<Speaker>,
    pub text: String,
    pub sentiment: Option<f64>,
    pub confidence: Option<f64>,
    pub sentiment_score: f64,
    pub risk_score: f64,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Published once per newly-raised supervisor alert.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorAlertPayload {
    pub call_id: String,
    pub alert_id: u64,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Published when a supervisor alert is acknowledged via the SSE gateway.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorAlertAckPayload {
    pub call_id: String,
    pub alert_id: u64,
    pub acknowledged_at: DateTime<Utc>,
}
