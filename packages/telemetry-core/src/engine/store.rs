//! Per-call state storage, upsert, scoring, and alerting (C5): the heart of
//! the realtime ingest and scoring engine.
//!
//! Each call is guarded by its own mutex (sharded via `DashMap`) so that
//! concurrent calls never block each other, while updates *within* a call are
//! strictly serialized - the single-writer-per-call ordering §5 requires for
//! SSE delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::constants::{
    DEFAULT_ALERT_COOLDOWN_SECONDS, DEFAULT_HIGH_RISK_THRESHOLD, DEFAULT_NEGATIVE_SENTIMENT_THRESHOLD,
    SENTIMENT_SMOOTHING_NEW_WEIGHT, SENTIMENT_SMOOTHING_PREVIOUS_WEIGHT, SNAPSHOT_ALERT_LIMIT,
    SNAPSHOT_EVENT_LIMIT,
};
use crate::error::{TelemetryError, TelemetryResult};
use crate::engine::payload::{extract_dead_air_seconds, normalize_ingest, NormalizedIngest};
use crate::engine::scoring::{
    dead_air_severity, escalation_keyword_severity, find_escalation_keyword, negative_sentiment_severity,
    update_risk_score, DEAD_AIR_ALERT_THRESHOLD_SECONDS,
};
use crate::events::{
    BusMessage, EventBus, RealtimeEventPayload, SupervisorAlertAckPayload, SupervisorAlertPayload,
};
use crate::model::{AlertSeverity, AlertType, RealtimeCall, RealtimeEvent, SupervisorAlert};

/// Tunables for the scoring/alerting rules, sourced from config/env (§6).
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub negative_sentiment_threshold: f64,
    pub high_risk_threshold: f64,
    pub cooldown_seconds: i64,
    /// Lower-cased keyword triggers checked as case-insensitive substrings.
    pub keyword_triggers: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            negative_sentiment_threshold: DEFAULT_NEGATIVE_SENTIMENT_THRESHOLD,
            high_risk_threshold: DEFAULT_HIGH_RISK_THRESHOLD,
            cooldown_seconds: DEFAULT_ALERT_COOLDOWN_SECONDS,
            keyword_triggers: Vec::new(),
        }
    }
}

/// The result of one [`IngestEngine::ingest`] call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub call_id: String,
    pub event_id: u64,
    pub sentiment_score: f64,
    pub risk_score: f64,
    pub alerts_raised: Vec<AlertType>,
}

/// A read-only view of a call's state plus its most recent events/alerts,
/// used by the SSE gateway's snapshot endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub call: RealtimeCall,
    pub events: Vec<RealtimeEvent>,
    pub alerts: Vec<SupervisorAlert>,
}

struct CallRecord {
    call: RealtimeCall,
    events: Vec<RealtimeEvent>,
    alerts: Vec<SupervisorAlert>,
}

/// The realtime ingest and scoring engine (C5).
pub struct IngestEngine {
    calls: DashMap<String, Arc<Mutex<CallRecord>>>,
    /// Reverse index from a globally unique alert id to its owning call, so
    /// the gateway's `POST /alerts/{id}/ack` (no call_id in the route) can
    /// resolve which per-call shard to lock.
    alert_index: DashMap<u64, String>,
    next_event_id: AtomicU64,
    next_alert_id: AtomicU64,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: ScoringConfig,
}

impl IngestEngine {
    pub fn new(bus: EventBus, clock: Arc<dyn Clock>, config: ScoringConfig) -> Self {
        Self {
            calls: DashMap::new(),
            alert_index: DashMap::new(),
            next_event_id: AtomicU64::new(1),
            next_alert_id: AtomicU64::new(1),
            bus,
            clock,
            config,
        }
    }

    /// Normalizes, upserts, scores, and publishes one ingest payload.
    ///
    /// Per I1: on success, exactly one `realtime_event` message is published
    /// and between 0 and 4 `supervisor_alert` messages.
    pub fn ingest(&self, raw: &Value) -> TelemetryResult<IngestOutcome> {
        let normalized = normalize_ingest(raw, self.clock.as_ref())?;

        let entry = self
            .calls
            .entry(normalized.call_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(CallRecord {
                    call: RealtimeCall::new(&normalized.call_id, &normalized.provider, self.clock.now_utc()),
                    events: Vec::new(),
                    alerts: Vec::new(),
                }))
            })
            .clone();
        let mut record = entry.lock();

        self.upsert_call(&mut record.call, &normalized);

        let event_id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = RealtimeEvent {
            id: event_id,
            call_id: normalized.call_id.clone(),
            occurred_at: normalized.occurred_at,
            event_type: normalized.event_type.clone(),
            speaker: normalized.speaker,
            text: normalized.text.clone(),
            sentiment: normalized.sentiment,
            confidence: normalized.confidence,
            metadata: normalized.metadata.clone(),
        };
        record.events.push(event.clone());

        let mut raised = self.evaluate_alerts(&mut record, &normalized);

        let terminal = record.call.is_terminal();
        let severities: Vec<AlertSeverity> = raised.iter().map(|a| a.severity).collect();
        let dead_air = extract_dead_air_seconds(&normalized.metadata);
        let keyword_hit = find_escalation_keyword(&normalized.text, &self.config.keyword_triggers).is_some();

        record.call.risk_score = update_risk_score(
            record.call.risk_score,
            normalized.sentiment,
            keyword_hit,
            dead_air,
            &severities,
            terminal,
        );

        if record.call.risk_score >= self.config.high_risk_threshold {
            if let Some(alert) = self.try_raise_alert(
                &mut record,
                AlertType::HighRiskScore,
                AlertSeverity::Critical,
                format!("risk score {:.2} at or above threshold", record.call.risk_score),
                crate::model::Metadata::new(),
            ) {
                raised.push(alert);
            }
        }

        let outcome = IngestOutcome {
            call_id: normalized.call_id.clone(),
            event_id,
            sentiment_score: record.call.sentiment_score,
            risk_score: record.call.risk_score,
            alerts_raised: raised.iter().map(|a| a.alert_type).collect(),
        };

        self.publish_event(&record.call, &event);
        for alert in &raised {
            self.publish_alert(alert);
        }

        Ok(outcome)
    }

    fn upsert_call(&self, call: &mut RealtimeCall, normalized: &NormalizedIngest) {
        let now = self.clock.now_utc();
        if let Some(status) = &normalized.status {
            call.status = status.clone();
        }
        if let Some(speaker) = normalized.speaker {
            call.last_speaker = Some(speaker);
        }
        if let Some(agent_id) = &normalized.agent_id {
            call.agent_id = Some(agent_id.clone());
        }
        if let Some(customer_id) = &normalized.customer_id {
            call.customer_id = Some(customer_id.clone());
        }
        call.set_last_text(&normalized.text);
        if let Some(sentiment) = normalized.sentiment {
            call.sentiment_score =
                SENTIMENT_SMOOTHING_PREVIOUS_WEIGHT * call.sentiment_score + SENTIMENT_SMOOTHING_NEW_WEIGHT * sentiment;
        }
        call.merge_metadata(normalized.metadata.clone());
        call.updated_at = now;
    }

    /// Evaluates the `negative_sentiment`, `escalation_keyword`, and `dead_air`
    /// rules (rule 4, `high_risk_score`, is evaluated separately once the risk
    /// score for this tick is final).
    fn evaluate_alerts(&self, record: &mut CallRecord, normalized: &NormalizedIngest) -> Vec<SupervisorAlert> {
        let mut raised = Vec::new();

        if let Some(sentiment) = normalized.sentiment {
            if sentiment <= self.config.negative_sentiment_threshold {
                let severity = negative_sentiment_severity(sentiment, self.config.negative_sentiment_threshold);
                if let Some(alert) = self.try_raise_alert(
                    record,
                    AlertType::NegativeSentiment,
                    severity,
                    format!("sentiment {sentiment:.2} at or below threshold"),
                    crate::model::Metadata::new(),
                ) {
                    raised.push(alert);
                }
            }
        }

        if let Some(keyword) = find_escalation_keyword(&normalized.text, &self.config.keyword_triggers) {
            let severity = escalation_keyword_severity(keyword);
            if let Some(alert) = self.try_raise_alert(
                record,
                AlertType::EscalationKeyword,
                severity,
                format!("escalation keyword \"{keyword}\" detected"),
                crate::model::Metadata::new(),
            ) {
                raised.push(alert);
            }
        }

        if let Some(dead_air) = extract_dead_air_seconds(&normalized.metadata) {
            if dead_air >= DEAD_AIR_ALERT_THRESHOLD_SECONDS {
                let severity = dead_air_severity(dead_air);
                if let Some(alert) = self.try_raise_alert(
                    record,
                    AlertType::DeadAir,
                    severity,
                    format!("{dead_air:.0}s of dead air detected"),
                    crate::model::Metadata::new(),
                ) {
                    raised.push(alert);
                }
            }
        }

        raised
    }

    /// Raises `alert_type` unless an alert of the same type was created within
    /// the cooldown window (§4.3 cooldown rule, I3). Appends to `record.alerts`
    /// and returns the new alert on success.
    fn try_raise_alert(
        &self,
        record: &mut CallRecord,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        metadata: crate::model::Metadata,
    ) -> Option<SupervisorAlert> {
        let now = self.clock.now_utc();
        if self.in_cooldown(&record.alerts, alert_type, now) {
            return None;
        }
        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst);
        let alert = SupervisorAlert {
            id,
            call_id: record.call.call_id.clone(),
            alert_type,
            severity,
            message,
            created_at: now,
            acknowledged: false,
            acknowledged_at: None,
            metadata,
        };
        record.alerts.push(alert.clone());
        self.alert_index.insert(id, alert.call_id.clone());
        Some(alert)
    }

    fn in_cooldown(&self, alerts: &[SupervisorAlert], alert_type: AlertType, now: DateTime<Utc>) -> bool {
        alerts.iter().any(|alert| {
            alert.alert_type == alert_type
                && (now - alert.created_at).num_seconds() < self.config.cooldown_seconds
        })
    }

    fn publish_event(&self, call: &RealtimeCall, event: &RealtimeEvent) {
        self.bus.publish(BusMessage::RealtimeEvent(RealtimeEventPayload {
            call_id: call.call_id.clone(),
            event_id: event.id,
            provider: call.provider.clone(),
            status: call.status.clone(),
            event_type: event.event_type.clone(),
            speaker: event.speaker,
            text: event.text.clone(),
            sentiment: event.sentiment,
            confidence: event.confidence,
            sentiment_score: call.sentiment_score,
            risk_score: call.risk_score,
            occurred_at: event.occurred_at,
            metadata: event.metadata.clone(),
        }));
    }

    fn publish_alert(&self, alert: &SupervisorAlert) {
        self.bus.publish(BusMessage::SupervisorAlert(SupervisorAlertPayload {
            call_id: alert.call_id.clone(),
            alert_id: alert.id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            message: alert.message.clone(),
            created_at: alert.created_at,
            metadata: alert.metadata.clone(),
        }));
    }

    /// Returns the call's state plus its most recent events/alerts, or `None`
    /// if no call with this id has ever been ingested.
    pub fn snapshot(&self, call_id: &str) -> Option<CallSnapshot> {
        let entry = self.calls.get(call_id)?;
        let record = entry.lock();
        let events = record
            .events
            .iter()
            .rev()
            .take(SNAPSHOT_EVENT_LIMIT)
            .rev()
            .cloned()
            .collect();
        let alerts = record
            .alerts
            .iter()
            .rev()
            .take(SNAPSHOT_ALERT_LIMIT)
            .rev()
            .cloned()
            .collect();
        Some(CallSnapshot {
            call: record.call.clone(),
            events,
            alerts,
        })
    }

    /// Marks `alert_id` on `call_id` acknowledged, publishing a
    /// `supervisor_alert_ack` message if it changed state.
    ///
    /// Returns `Ok(true)` if the alert was found and newly acknowledged,
    /// `Ok(false)` if it was already acknowledged, or `NotFound` if the call
    /// or alert id does not exist.
    pub fn ack_alert(&self, call_id: &str, alert_id: u64) -> TelemetryResult<bool> {
        let entry = self
            .calls
            .get(call_id)
            .ok_or_else(|| TelemetryError::NotFound(format!("call {call_id}")))?;
        let mut record = entry.lock();
        let now = self.clock.now_utc();
        let alert = record
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| TelemetryError::NotFound(format!("alert {alert_id} on call {call_id}")))?;

        let changed = alert.acknowledge(now);
        if changed {
            self.bus.publish(BusMessage::SupervisorAlertAck(SupervisorAlertAckPayload {
                call_id: call_id.to_string(),
                alert_id,
                acknowledged_at: now,
            }));
        }
        Ok(changed)
    }

    /// Like [`Self::ack_alert`] but resolves `call_id` from the alert-id
    /// index, for the gateway's flat `/alerts/{id}/ack` route.
    pub fn ack_alert_by_id(&self, alert_id: u64) -> TelemetryResult<bool> {
        let call_id = self
            .alert_index
            .get(&alert_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TelemetryError::NotFound(format!("alert {alert_id}")))?;
        self.ack_alert(&call_id, alert_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;
    use std::time::Duration;

    fn engine(config: ScoringConfig) -> (IngestEngine, Arc<FixedClock>, EventBus) {
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let bus = EventBus::new(200);
        let engine = IngestEngine::new(bus.clone(), clock.clone(), config);
        (engine, clock, bus)
    }

    #[tokio::test]
    async fn happy_ingest_smooths_sentiment_and_raises_no_alerts() {
        let (engine, _clock, bus) = engine(ScoringConfig::default());
        let sub = bus.subscribe();

        let outcome = engine
            .ingest(&json!({"call_id": "c-1", "text": "hello", "sentiment": 0.5}))
            .unwrap();

        assert!((outcome.sentiment_score - 0.14).abs() < 1e-9);
        assert_eq!(outcome.risk_score, 0.0);
        assert!(outcome.alerts_raised.is_empty());

        let msg = sub.recv().await.unwrap();
        assert!(matches!(msg.as_ref(), BusMessage::RealtimeEvent(_)));
    }

    #[tokio::test]
    async fn escalation_keyword_raises_high_severity_alert() {
        let config = ScoringConfig {
            keyword_triggers: vec!["manager".into(), "supervisor".into(), "lawyer".into()],
            ..ScoringConfig::default()
        };
        let (engine, _clock, bus) = engine(config);
        let sub = bus.subscribe();

        let outcome = engine
            .ingest(&json!({"call_id": "c-2", "text": "get me a supervisor now"}))
            .unwrap();

        assert!(outcome.alerts_raised.contains(&AlertType::EscalationKeyword));
        assert!(outcome.risk_score >= 0.24);

        let snapshot = engine.snapshot("c-2").unwrap();
        let alert = snapshot
            .alerts
            .iter()
            .find(|a| a.alert_type == AlertType::EscalationKeyword)
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::High);

        // drain the realtime_event message so the next assertion is the alert
        let _ = sub.recv().await.unwrap();
        let msg = sub.recv().await.unwrap();
        assert!(matches!(msg.as_ref(), BusMessage::SupervisorAlert(_)));
    }

    #[test]
    fn cooldown_suppresses_duplicate_alerts_within_window() {
        let config = ScoringConfig {
            keyword_triggers: vec!["lawyer".into()],
            cooldown_seconds: 75,
            ..ScoringConfig::default()
        };
        let (engine, clock, _bus) = engine(config);

        engine
            .ingest(&json!({"call_id": "c-3", "text": "lawyer", "sentiment": -0.9}))
            .unwrap();
        clock.advance(Duration::from_secs(10));
        engine
            .ingest(&json!({"call_id": "c-3", "text": "lawyer", "sentiment": -0.9}))
            .unwrap();

        let snapshot = engine.snapshot("c-3").unwrap();
        let keyword_count = snapshot
            .alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::EscalationKeyword)
            .count();
        let sentiment_count = snapshot
            .alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::NegativeSentiment)
            .count();
        assert_eq!(keyword_count, 1);
        assert_eq!(sentiment_count, 1);
    }

    #[test]
    fn risk_score_is_always_clamped() {
        let (engine, _clock, _bus) = engine(ScoringConfig::default());
        for _ in 0..20 {
            engine
                .ingest(&json!({"call_id": "c-4", "text": "lawyer supervisor legal", "sentiment": -1.0, "metadata": {"dead_air_seconds": 60}}))
                .unwrap();
        }
        let snapshot = engine.snapshot("c-4").unwrap();
        assert!(snapshot.call.risk_score >= 0.0 && snapshot.call.risk_score <= 1.0);
    }

    #[test]
    fn terminal_status_decays_risk_score() {
        let (engine, _clock, _bus) = engine(ScoringConfig::default());
        engine
            .ingest(&json!({"call_id": "c-5", "text": "lawyer", "sentiment": -0.9}))
            .unwrap();
        let before = engine.snapshot("c-5").unwrap().call.risk_score;
        engine
            .ingest(&json!({"call_id": "c-5", "status": "completed", "text": ""}))
            .unwrap();
        let after = engine.snapshot("c-5").unwrap().call.risk_score;
        assert!(after < before);
    }

    #[test]
    fn ack_alert_is_idempotent_and_not_found_for_unknown_alert() {
        let config = ScoringConfig {
            keyword_triggers: vec!["lawyer".into()],
            ..ScoringConfig::default()
        };
        let (engine, _clock, _bus) = engine(config);
        engine.ingest(&json!({"call_id": "c-6", "text": "lawyer"})).unwrap();
        let alert_id = engine.snapshot("c-6").unwrap().alerts[0].id;

        assert!(engine.ack_alert("c-6", alert_id).unwrap());
        assert!(!engine.ack_alert("c-6", alert_id).unwrap());
        assert!(engine.ack_alert("c-6", 99999).is_err());
    }

    #[test]
    fn snapshot_returns_none_for_unknown_call() {
        let (engine, _clock, _bus) = engine(ScoringConfig::default());
        assert!(engine.snapshot("nonexistent").is_none());
    }

    #[test]
    fn ack_alert_by_id_resolves_call_id_from_the_index() {
        let config = ScoringConfig {
            keyword_triggers: vec!["lawyer".into()],
            ..ScoringConfig::default()
        };
        let (engine, _clock, _bus) = engine(config);
        engine.ingest(&json!({"call_id": "c-7", "text": "lawyer"})).unwrap();
        let alert_id = engine.snapshot("c-7").unwrap().alerts[0].id;

        assert!(engine.ack_alert_by_id(alert_id).unwrap());
        assert!(!engine.ack_alert_by_id(alert_id).unwrap());
        assert!(engine.ack_alert_by_id(99999).is_err());
    }
}
