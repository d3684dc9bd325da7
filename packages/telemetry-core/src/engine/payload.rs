//! Tolerant normalization of the semi-structured ingest envelope (§4.3).
//!
//! Deliberately not a `#[derive(Deserialize)]` struct: upstream payloads are
//! vendor-shaped JSON blobs with optional/aliased fields, and the rule here is
//! "take the first of several possible keys, coerce loosely, never fail on an
//! unrecognized field." Unknown keys flow into `metadata` rather than being
//! rejected.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::error::{TelemetryError, TelemetryResult};
use crate::model::{Metadata, Speaker};

/// A normalized ingest event, ready for upsert into the engine's call state.
#[derive(Debug, Clone)]
pub struct NormalizedIngest {
    pub call_id: String,
    pub provider: String,
    pub event_type: String,
    pub speaker: Option<Speaker>,
    pub text: String,
    pub sentiment: Option<f64>,
    pub confidence: Option<f64>,
    pub status: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub agent_id: Option<String>,
    pub customer_id: Option<String>,
}

/// Returns the first key in `keys` present in `obj` with a non-empty string value.
fn first_non_empty_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        obj.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Parses a sentiment value from either a number or a recognized sentiment word,
/// clamped to `[-1, 1]`.
fn parse_sentiment(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v.clamp(-1.0, 1.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "negative" => Some(-0.7),
            "neutral" => Some(0.0),
            "positive" => Some(0.7),
            other => other.parse::<f64>().ok().map(|v| v.clamp(-1.0, 1.0)),
        },
        _ => None,
    }
}

/// Parses a confidence value from a number or numeric string, clamped to `[0, 1]`.
fn parse_confidence(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v.clamp(0.0, 1.0)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0)),
        _ => None,
    }
}

/// Parses `occurred_at` from an ISO-8601 string, epoch seconds (number or
/// numeric string), or falls back to `clock.now_utc()`.
fn parse_occurred_at(obj: &Map<String, Value>, clock: &dyn Clock) -> DateTime<Utc> {
    match obj.get("occurred_at").or_else(|| obj.get("timestamp")) {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| s.parse::<f64>().map(|epoch| epoch_to_datetime(epoch)))
            .unwrap_or_else(|_| clock.now_utc()),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(epoch_to_datetime)
            .unwrap_or_else(|| clock.now_utc()),
        _ => clock.now_utc(),
    }
}

fn epoch_to_datetime(epoch_seconds: f64) -> DateTime<Utc> {
    let millis = (epoch_seconds * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Normalizes a raw JSON ingest payload per the rules of §4.3.
///
/// Returns [`TelemetryError::ClientError`] if no usable `call_id` can be found.
pub fn normalize_ingest(raw: &Value, clock: &dyn Clock) -> TelemetryResult<NormalizedIngest> {
    let obj = raw
        .as_object()
        .ok_or_else(|| TelemetryError::ClientError("payload must be a JSON object".into()))?;

    let call_id = first_non_empty_string(obj, &["call_id", "conversation_id", "session_id"])
        .ok_or_else(|| TelemetryError::ClientError("missing call_id/conversation_id/session_id".into()))?;

    let provider = first_non_empty_string(obj, &["provider"]).unwrap_or_else(|| "generic".to_string());

    let event_type = first_non_empty_string(obj, &["event_type", "type"])
        .unwrap_or_else(|| "transcript".to_string())
        .to_lowercase();

    let speaker = first_non_empty_string(obj, &["speaker", "role"]).and_then(|s| Speaker::normalize(&s));

    let text = first_non_empty_string(obj, &["text", "transcript"]).unwrap_or_default();

    let sentiment = obj.get("sentiment").and_then(parse_sentiment);
    let confidence = obj.get("confidence").and_then(parse_confidence);
    let status = first_non_empty_string(obj, &["status"]).map(|s| s.to_lowercase());
    let occurred_at = parse_occurred_at(obj, clock);
    let agent_id = first_non_empty_string(obj, &["agent_id", "agentId"]);
    let customer_id = first_non_empty_string(obj, &["customer_id", "customerId"]);

    let mut metadata = Metadata::new();
    if let Some(Value::Object(raw_metadata)) = obj.get("metadata") {
        for (key, value) in raw_metadata {
            metadata.insert(key.clone(), value.clone());
        }
    }
    if let Some(metrics) = obj.get("metrics") {
        metadata.insert("metrics".to_string(), metrics.clone());
    }

    Ok(NormalizedIngest {
        call_id,
        provider,
        event_type,
        speaker,
        text,
        sentiment,
        confidence,
        status,
        occurred_at,
        metadata,
        agent_id,
        customer_id,
    })
}

/// Reads a dead-air/silence duration (seconds) out of an event's metadata,
/// checking both top-level keys and a nested `metrics` object (the shape the
/// vendor connector folds dead-air readings into).
pub fn extract_dead_air_seconds(metadata: &Metadata) -> Option<f64> {
    let direct = metadata
        .get("dead_air_seconds")
        .or_else(|| metadata.get("silence_seconds"))
        .and_then(Value::as_f64);
    if direct.is_some() {
        return direct;
    }
    metadata
        .get("metrics")
        .and_then(Value::as_object)
        .and_then(|metrics| {
            metrics
                .get("dead_air_seconds")
                .or_else(|| metrics.get("silence_seconds"))
                .and_then(Value::as_f64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    fn clock() -> FixedClock {
        FixedClock::new(1_700_000_000_000)
    }

    #[test]
    fn requires_a_call_id() {
        let clock = clock();
        let err = normalize_ingest(&json!({"text": "hi"}), &clock).unwrap_err();
        assert!(matches!(err, TelemetryError::ClientError(_)));
    }

    #[test]
    fn falls_back_through_call_id_aliases() {
        let clock = clock();
        let parsed = normalize_ingest(&json!({"conversation_id": "c-1", "text": "hi"}), &clock).unwrap();
        assert_eq!(parsed.call_id, "c-1");
    }

    #[test]
    fn maps_sentiment_words_to_scores() {
        let clock = clock();
        let parsed = normalize_ingest(&json!({"call_id": "c-1", "sentiment": "negative"}), &clock).unwrap();
        assert_eq!(parsed.sentiment, Some(-0.7));
    }

    #[test]
    fn clamps_numeric_sentiment() {
        let clock = clock();
        let parsed = normalize_ingest(&json!({"call_id": "c-1", "sentiment": 5.0}), &clock).unwrap();
        assert_eq!(parsed.sentiment, Some(1.0));
    }

    #[test]
    fn defaults_event_type_and_provider() {
        let clock = clock();
        let parsed = normalize_ingest(&json!({"call_id": "c-1"}), &clock).unwrap();
        assert_eq!(parsed.event_type, "transcript");
        assert_eq!(parsed.provider, "generic");
    }

    #[test]
    fn preserves_metrics_key_in_metadata() {
        let clock = clock();
        let parsed = normalize_ingest(
            &json!({"call_id": "c-1", "metrics": {"dead_air_seconds": 22.0}}),
            &clock,
        )
        .unwrap();
        assert_eq!(extract_dead_air_seconds(&parsed.metadata), Some(22.0));
    }

    #[test]
    fn extracts_agent_and_customer_ids() {
        let clock = clock();
        let parsed = normalize_ingest(
            &json!({"call_id": "c-1", "agentId": "a-1", "customer_id": "cust-1"}),
            &clock,
        )
        .unwrap();
        assert_eq!(parsed.agent_id.as_deref(), Some("a-1"));
        assert_eq!(parsed.customer_id.as_deref(), Some("cust-1"));
    }

    #[test]
    fn reads_dead_air_from_top_level_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("dead_air_seconds".to_string(), json!(25.0));
        assert_eq!(extract_dead_air_seconds(&metadata), Some(25.0));
    }
}
