//! Vendor notification connector (C7): an outbound OAuth client that builds a
//! topic set, opens a notification channel, subscribes, consumes the vendor's
//! notification websocket, and forwards normalized events into the ingest
//! engine (§4.5).
//!
//! The state machine mirrors [`crate::status_store::ComponentState`] directly
//! rather than introducing a parallel enum: `starting -> connecting ->
//! subscribed -> running -> reconnecting -> connecting -> ...`, with
//! `stopping`/`stopped` on shutdown and `error` recorded by
//! `StatusStore::set_error` whenever a pass fails.

pub mod auth;
pub mod client;
pub mod config;
pub mod topics;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

pub use auth::TokenCache;
pub use config::ConnectorConfig;
pub use topics::{TopicBuildResult, TopicCache};

use crate::clock::Clock;
use crate::constants::{CONNECTOR_WS_PING_INTERVAL_SECS, CONNECTOR_WS_PING_TIMEOUT_SECS};
use crate::engine::IngestEngine;
use crate::error::{TelemetryError, TelemetryResult};
use crate::model::Speaker;
use crate::retry::cancellable_sleep;
use crate::status_store::{ComponentState, StatusStore};

use self::client::{create_notification_channel, subscribe_topics};
use self::topics::build_topics;

/// Drives the vendor connector's control loop end to end: topic build, OAuth,
/// channel creation, subscription, websocket consumption, and reconnect.
pub struct Connector {
    config: ConnectorConfig,
    client: Client,
    tokens: TokenCache,
    status: Arc<StatusStore>,
    clock: Arc<dyn Clock>,
    engine: Arc<IngestEngine>,
    stop: CancellationToken,
    cached_topics: Mutex<Vec<String>>,
}

impl Connector {
    pub fn new(
        config: ConnectorConfig,
        client: Client,
        status: Arc<StatusStore>,
        clock: Arc<dyn Clock>,
        engine: Arc<IngestEngine>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            config,
            client,
            tokens: TokenCache::new(),
            status,
            clock,
            engine,
            stop,
            cached_topics: Mutex::new(Vec::new()),
        }
    }

    /// Runs the connector until `stop` is cancelled, reconnecting after every
    /// failed pass with `reconnect_delay_seconds` of (cancellable) backoff.
    pub async fn run(&self) {
        let _ = self.status.set_state(ComponentState::Starting);
        let mut topic_cache = TopicCache::new();

        while !self.stop.is_cancelled() {
            if let Err(err) = self.connect_and_consume(&mut topic_cache).await {
                log::warn!("vendor connector pass failed: {err}");
                let _ = self.status.set_error(err.to_string());
            }

            if self.stop.is_cancelled() {
                break;
            }

            let _ = self.status.set_state(ComponentState::Reconnecting);
            let _ = self.status.increment("reconnect_count", 1);
            if !cancellable_sleep(Duration::from_secs(self.config.reconnect_delay_seconds), &self.stop).await {
                break;
            }
        }

        let _ = self.status.set_state(ComponentState::Stopping);
        let _ = self.status.set_state(ComponentState::Stopped);
    }

    /// One full pass: build topics, authenticate, open + subscribe a
    /// notification channel, then consume its websocket until it closes,
    /// errors, or `stop` is cancelled.
    async fn connect_and_consume(&self, topic_cache: &mut TopicCache) -> TelemetryResult<()> {
        let _ = self.status.set_state(ComponentState::Connecting);

        let topics = if topic_cache.should_refresh(self.config.topic_builder_refresh_seconds) {
            let build = build_topics(&self.client, &self.config, &self.tokens, self.clock.as_ref(), &self.stop).await?;
            topic_cache.mark_built();
            let _ = self.status.set_field("topics_count", build.topics.len() as i64);
            let _ = self.status.set_field("discovered_queues", build.discovered_queues as i64);
            let _ = self.status.set_field("discovered_users", build.discovered_users as i64);
            *self.cached_topics.lock() = build.topics.clone();
            build.topics
        } else {
            self.cached_topics.lock().clone()
        };

        if topics.is_empty() {
            return Err(TelemetryError::UpstreamFatal("no subscription topics resolved".into()));
        }

        let channel = create_notification_channel(&self.client, &self.config, &self.tokens, self.clock.as_ref(), &self.stop).await?;
        let channel_id = channel
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| TelemetryError::UpstreamFatal("notification channel response missing id".into()))?
            .to_string();
        let connect_uri = channel
            .get("connectUri")
            .and_then(Value::as_str)
            .ok_or_else(|| TelemetryError::UpstreamFatal("notification channel response missing connectUri".into()))?
            .to_string();

        subscribe_topics(&self.client, &self.config, &self.tokens, self.clock.as_ref(), &self.stop, &channel_id, &topics).await?;
        let _ = self.status.set_state(ComponentState::Subscribed);

        self.consume_websocket(&connect_uri).await
    }

    /// Opens the vendor notification websocket and dispatches every message
    /// to [`Self::handle_message`] until it closes, errors, times out waiting
    /// for traffic, or `stop` is cancelled.
    async fn consume_websocket(&self, connect_uri: &str) -> TelemetryResult<()> {
        let (stream, _response) = tokio_tungstenite::connect_async(connect_uri)
            .await
            .map_err(|err| TelemetryError::UpstreamTransient(err.to_string()))?;
        let _ = self.status.set_state(ComponentState::Running);
        log::info!("vendor connector notification websocket connected");

        let (mut write, mut read) = stream.split();
        let mut ping_ticker = interval(Duration::from_secs(CONNECTOR_WS_PING_INTERVAL_SECS));
        let read_timeout = Duration::from_secs(CONNECTOR_WS_PING_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                _ = ping_ticker.tick() => {
                    if write.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        return Err(TelemetryError::UpstreamTransient("failed to send notification websocket keepalive".into()));
                    }
                }
                message = tokio::time::timeout(read_timeout, read.next()) => {
                    match message {
                        Ok(Some(Ok(WsMessage::Text(text)))) => self.handle_message(&text),
                        Ok(Some(Ok(WsMessage::Binary(bytes)))) => {
                            if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                                self.handle_message(&text);
                            }
                        }
                        Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => return Ok(()),
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(err))) => return Err(TelemetryError::UpstreamTransient(err.to_string())),
                        Err(_) => return Err(TelemetryError::UpstreamTransient("notification websocket read timed out".into())),
                    }
                }
            }
        }
    }

    /// Parses one raw websocket text frame into notifications, maps each to
    /// zero or more ingest payloads, and forwards them to the ingest engine
    /// in-process.
    fn handle_message(&self, text: &str) {
        let raw: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("vendor connector: malformed notification payload: {err}");
                return;
            }
        };

        for notification in extract_notifications(&raw) {
            for payload in notification_to_payloads(&notification) {
                if let Err(err) = self.engine.ingest(&payload) {
                    log::warn!("vendor connector: ingest failed: {err}");
                } else {
                    let _ = self.status.increment("forwarded_events", 1);
                }
            }
        }
    }
}

/// Splits a raw notification websocket message into individual notification
/// objects, tolerating the three documented envelope shapes (§6): a wrapper
/// with a `notifications` array, a bare array, or a single object.
fn extract_notifications(raw: &Value) -> Vec<Value> {
    if let Some(list) = raw.get("notifications").and_then(Value::as_array) {
        return list.clone();
    }
    if let Some(list) = raw.as_array() {
        return list.clone();
    }
    vec![raw.clone()]
}

fn topic_of(notification: &Value) -> String {
    notification.get("topicName").and_then(Value::as_str).unwrap_or("").to_string()
}

fn body_of(notification: &Value) -> Value {
    notification.get("eventBody").cloned().unwrap_or_else(|| notification.clone())
}

fn conversation_id_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"conversations\.([a-f0-9-]{16,})").expect("valid regex"))
}

/// Extracts `call_id` from the event body's `conversationId`/`conversation.id`,
/// falling back to a regex match against the topic name.
fn extract_call_id(body: &Value, topic: &str) -> Option<String> {
    if let Some(id) = body.get("conversationId").and_then(Value::as_str) {
        let id = id.trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    if let Some(id) = body.get("conversation").and_then(|c| c.get("id")).and_then(Value::as_str) {
        let id = id.trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    conversation_id_regex()
        .captures(topic)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_event_type(body: &Value, topic: &str) -> String {
    for key in ["eventType", "type"] {
        if let Some(value) = body.get(key).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_lowercase();
            }
        }
    }
    topic
        .rsplit('.')
        .find(|segment| !segment.is_empty())
        .unwrap_or("event")
        .to_lowercase()
}

/// Status tokens that mark a conversation as ended, per the documented (and
/// deliberately imprecise - see Open Questions) heuristic.
const ENDED_STATUS_TOKENS: [&str; 5] = ["disconnect", "terminated", "ended", "complete", "closed"];

fn derive_status(body: &Value) -> String {
    let candidate = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    if ENDED_STATUS_TOKENS.iter().any(|token| candidate.contains(token)) {
        "ended".to_string()
    } else {
        "active".to_string()
    }
}

/// Extracts a sentiment score from either a scalar `sentiment` field or a
/// nested `sentiment.{score,overall,value}` object, clamped to `[-1, 1]`.
fn extract_sentiment(body: &Value) -> Option<f64> {
    let value = body.get("sentiment")?;
    if let Some(score) = value.as_f64() {
        return Some(score.clamp(-1.0, 1.0));
    }
    let obj = value.as_object()?;
    for key in ["score", "overall", "value"] {
        if let Some(score) = obj.get(key).and_then(Value::as_f64) {
            return Some(score.clamp(-1.0, 1.0));
        }
    }
    None
}

/// One mined utterance, ready to become its own ingest payload.
struct TextRecord {
    text: String,
    speaker: Option<String>,
    sentiment: Option<f64>,
    confidence: Option<f64>,
}

/// Maximum number of text records mined from a single notification (§4.5).
const MAX_TEXT_RECORDS_PER_NOTIFICATION: usize = 6;

/// Mines up to [`MAX_TEXT_RECORDS_PER_NOTIFICATION`] distinct utterances from
/// `transcripts[]`, `utterances[]`, and top-level scalar fallbacks,
/// deduplicated case-insensitively.
fn mine_text_records(body: &Value) -> Vec<TextRecord> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for key in ["transcripts", "utterances"] {
        if let Some(items) = body.get(key).and_then(Value::as_array) {
            for item in items {
                let text = item.get("text").and_then(Value::as_str).or_else(|| item.as_str());
                if let Some(text) = text {
                    push_unique_record(
                        &mut records,
                        &mut seen,
                        text,
                        item.get("speaker").or_else(|| item.get("role")).and_then(Value::as_str).map(str::to_string),
                        item.get("sentiment").and_then(Value::as_f64),
                        item.get("confidence").and_then(Value::as_f64),
                    );
                }
            }
        }
    }

    for key in ["text", "transcript", "message", "utteranceText"] {
        if let Some(text) = body.get(key).and_then(Value::as_str) {
            push_unique_record(
                &mut records,
                &mut seen,
                text,
                body.get("speaker").and_then(Value::as_str).map(str::to_string),
                extract_sentiment(body),
                body.get("confidence").and_then(Value::as_f64),
            );
        }
    }

    records
}

fn push_unique_record(
    records: &mut Vec<TextRecord>,
    seen: &mut HashSet<String>,
    text: &str,
    speaker: Option<String>,
    sentiment: Option<f64>,
    confidence: Option<f64>,
) {
    if records.len() >= MAX_TEXT_RECORDS_PER_NOTIFICATION {
        return;
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if !seen.insert(trimmed.to_lowercase()) {
        return;
    }
    records.push(TextRecord {
        text: trimmed.to_string(),
        speaker,
        sentiment,
        confidence,
    });
}

/// Maps one notification into zero or more normalized ingest payloads
/// (§4.5) - one per mined text record, each sharing the notification's
/// `call_id`/`event_type`/`status`.
fn notification_to_payloads(notification: &Value) -> Vec<Value> {
    let topic = topic_of(notification);
    if topic.ends_with("channel.metadata") {
        return Vec::new();
    }

    let body = body_of(notification);
    let Some(call_id) = extract_call_id(&body, &topic) else {
        return Vec::new();
    };

    let event_type = extract_event_type(&body, &topic);
    let status = derive_status(&body);
    let body_sentiment = extract_sentiment(&body);
    let occurred_at = notification
        .get("metadata")
        .and_then(|m| m.get("messageTime"))
        .and_then(Value::as_str)
        .map(str::to_string);

    mine_text_records(&body)
        .into_iter()
        .map(|record| {
            let mut obj = Map::new();
            obj.insert("call_id".into(), Value::String(call_id.clone()));
            obj.insert("provider".into(), Value::String("vendor_connector".into()));
            obj.insert("event_type".into(), Value::String(event_type.clone()));
            obj.insert("status".into(), Value::String(status.clone()));
            obj.insert("text".into(), Value::String(record.text));
            if let Some(speaker) = record.speaker.and_then(|s| Speaker::normalize(&s)).map(|s| match s {
                Speaker::Agent => "agent",
                Speaker::Customer => "customer",
            }) {
                obj.insert("speaker".into(), Value::String(speaker.to_string()));
            }
            if let Some(sentiment) = record.sentiment.or(body_sentiment) {
                obj.insert("sentiment".into(), serde_json::json!(sentiment));
            }
            if let Some(confidence) = record.confidence {
                obj.insert("confidence".into(), serde_json::json!(confidence));
            }
            if let Some(ref occurred_at) = occurred_at {
                obj.insert("occurred_at".into(), Value::String(occurred_at.clone()));
            }
            Value::Object(obj)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_notifications_from_wrapper_envelope() {
        let raw = json!({"notifications": [{"topicName": "a"}, {"topicName": "b"}]});
        let notifications = extract_notifications(&raw);
        assert_eq!(notifications.len(), 2);
    }

    #[test]
    fn extracts_notifications_from_bare_array() {
        let raw = json!([{"topicName": "a"}]);
        assert_eq!(extract_notifications(&raw).len(), 1);
    }

    #[test]
    fn extracts_notifications_from_single_object() {
        let raw = json!({"topicName": "a", "eventBody": {}});
        assert_eq!(extract_notifications(&raw).len(), 1);
    }

    #[test]
    fn channel_metadata_topics_are_ignored() {
        let notification = json!({
            "topicName": "v2.users.u-1.conversations.calls.channel.metadata",
            "eventBody": {"conversationId": "c-1", "text": "hi"},
        });
        assert!(notification_to_payloads(&notification).is_empty());
    }

    #[test]
    fn call_id_falls_back_to_topic_regex() {
        let body = json!({"text": "hello"});
        let topic = "v2.detail.events.conversations.1234567890abcdef.transcription";
        assert_eq!(extract_call_id(&body, topic).as_deref(), Some("1234567890abcdef"));
    }

    #[test]
    fn call_id_prefers_conversation_id_field() {
        let body = json!({"conversationId": "c-explicit"});
        assert_eq!(extract_call_id(&body, "v2.detail.events.conversations.deadbeefdeadbeef").as_deref(), Some("c-explicit"));
    }

    #[test]
    fn nested_conversation_id_is_supported() {
        let body = json!({"conversation": {"id": "c-nested"}});
        assert_eq!(extract_call_id(&body, "").as_deref(), Some("c-nested"));
    }

    #[test]
    fn status_detects_ended_tokens_anywhere_in_the_string() {
        assert_eq!(derive_status(&json!({"status": "call-completed-ok"})), "ended");
        assert_eq!(derive_status(&json!({"status": "ringing"})), "active");
        assert_eq!(derive_status(&json!({})), "active");
    }

    #[test]
    fn sentiment_reads_nested_score_field() {
        assert_eq!(extract_sentiment(&json!({"sentiment": {"score": 5.0}})), Some(1.0));
        assert_eq!(extract_sentiment(&json!({"sentiment": {"overall": -2.0}})), Some(-1.0));
        assert_eq!(extract_sentiment(&json!({"sentiment": 0.3})), Some(0.3));
        assert_eq!(extract_sentiment(&json!({})), None);
    }

    #[test]
    fn text_mining_dedupes_and_caps_at_six() {
        let body = json!({
            "transcripts": [
                {"text": "Hello"},
                {"text": "hello"},
                {"text": "one"},
                {"text": "two"},
                {"text": "three"},
                {"text": "four"},
                {"text": "five"},
            ],
        });
        let records = mine_text_records(&body);
        assert_eq!(records.len(), MAX_TEXT_RECORDS_PER_NOTIFICATION);
    }

    #[test]
    fn notification_to_payloads_emits_one_payload_per_text_record() {
        let notification = json!({
            "topicName": "v2.users.u-1.conversations.calls",
            "eventBody": {
                "conversationId": "c-1",
                "eventType": "Transcript",
                "status": "connected",
                "transcripts": [{"text": "hello there", "speaker": "agent"}, {"text": "hi", "speaker": "customer"}],
            },
        });
        let payloads = notification_to_payloads(&notification);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["call_id"], "c-1");
        assert_eq!(payloads[0]["event_type"], "transcript");
        assert_eq!(payloads[0]["status"], "active");
        assert_eq!(payloads[0]["speaker"], "agent");
        assert_eq!(payloads[1]["speaker"], "customer");
    }

    #[test]
    fn notification_without_a_resolvable_call_id_yields_no_payloads() {
        let notification = json!({"topicName": "no.conversation.id.here", "eventBody": {"text": "hi"}});
        assert!(notification_to_payloads(&notification).is_empty());
    }
}
