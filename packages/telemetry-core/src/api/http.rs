//! Route table and handlers for the HTTP/SSE gateway (§4.6).
//!
//! Two handler families live here: the read-side gateway (`/stream`,
//! `/calls/{id}/...`, `/alerts/{id}/ack`) that the original source exposed
//! under `api/realtime/...`, and the ingest endpoints (`/ingest/events`,
//! `/ingest/audio`) that the AudioHook ingress's own HTTP forwarder and,
//! optionally, an external sink POST into - the same shared-secret
//! `ingest_token` gates both.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::constants::SSE_KEEPALIVE_INTERVAL_SECS;
use crate::error::{TelemetryError, TelemetryResult};
use crate::utils::sanitize_call_id;

/// Builds the full gateway router: liveness/readiness, the SSE stream and
/// per-call read endpoints, alert ack, and the ingest endpoints AudioHook's
/// forwarder targets by default.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stream", get(stream_events))
        .route("/calls/{call_id}/snapshot", get(call_snapshot))
        .route("/calls/{call_id}/audio.wav", get(call_audio_wav))
        .route("/calls/{call_id}/audio/meta", get(call_audio_meta))
        .route("/alerts/{alert_id}/ack", post(ack_alert))
        .route("/ingest/events", post(ingest_event))
        .route("/ingest/audio", post(ingest_audio))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness: always `200` once the process is serving requests.
async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Readiness: `200` only if both the AudioHook ingress and vendor connector
/// status stores report a fresh, non-error, alive state (§5 Status Store).
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let audiohook = state.audiohook_status.health(state.audiohook_health_stale_seconds);
    let connector = state.connector_status.health(state.connector_health_stale_seconds);
    let healthy = audiohook.healthy && connector.healthy;

    let body = json!({
        "healthy": healthy,
        "audiohook": {
            "healthy": audiohook.healthy,
            "state": audiohook.state,
            "age_seconds": audiohook.age_seconds,
            "last_error": audiohook.last_error,
        },
        "connector": {
            "healthy": connector.healthy,
            "state": connector.state,
            "age_seconds": connector.age_seconds,
            "last_error": connector.last_error,
        },
    });
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

#[derive(Debug, Deserialize, Default)]
struct StreamQuery {
    call_id: Option<String>,
}

/// `GET /stream?call_id=...`: subscribes to the bus, optionally filtering to
/// one call, emitting a `connected` event immediately and a `ping` on every
/// idle `SSE_KEEPALIVE_INTERVAL_SECS` window (§4.6).
async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bus.subscribe();
    let call_filter = query.call_id;

    let stream = async_stream::stream! {
        let connected = json!({"type": "connected", "call_id": call_filter, "timestamp": Utc::now().to_rfc3339()});
        yield Ok(Event::default().data(connected.to_string()));

        loop {
            let next = tokio::time::timeout(Duration::from_secs(SSE_KEEPALIVE_INTERVAL_SECS), subscription.recv()).await;
            match next {
                Ok(Some(message)) => {
                    if let Some(ref filter) = call_filter {
                        if message.call_id() != filter {
                            continue;
                        }
                    }
                    match serde_json::to_string(message.as_ref()) {
                        Ok(payload) => yield Ok(Event::default().data(payload)),
                        Err(err) => log::warn!("sse: failed to serialize bus message: {err}"),
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let ping = json!({"type": "ping", "timestamp": Utc::now().to_rfc3339()});
                    yield Ok(Event::default().event("ping").data(ping.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEPALIVE_INTERVAL_SECS)))
}

/// `GET /calls/{id}/snapshot`: engine state plus recent events and alerts.
async fn call_snapshot(State(state): State<AppState>, Path(call_id): Path<String>) -> Response {
    match state.engine.snapshot(&call_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => TelemetryError::NotFound(format!("call {call_id}")).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct AudioQuery {
    max_seconds: Option<u64>,
    #[serde(default)]
    fallback: bool,
}

/// `GET /calls/{id}/audio.wav?max_seconds=...&fallback=true|false`: serves
/// the live rolling window, falling back to a historical recording when the
/// live window is empty and `fallback=true` (§4.6).
async fn call_audio_wav(State(state): State<AppState>, Path(call_id): Path<String>, Query(query): Query<AudioQuery>) -> Response {
    match state.audio_buffer.get_wav_bytes(&call_id, query.max_seconds) {
        Ok(Some(bytes)) => wav_response(bytes, &call_id, true),
        Ok(None) => {
            if query.fallback {
                if let Some(bytes) = read_fallback_audio(&state, &call_id) {
                    return wav_response(bytes, &call_id, false);
                }
            }
            TelemetryError::NotFound(format!("no audio for call {call_id}")).into_response()
        }
        Err(err) => err.into_response(),
    }
}

fn wav_response(bytes: Vec<u8>, call_id: &str, live: bool) -> Response {
    (
        [
            ("Content-Type", "audio/wav".to_string()),
            ("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0".to_string()),
            ("Pragma", "no-cache".to_string()),
            ("Content-Disposition", format!("inline; filename=\"{call_id}_live.wav\"")),
            ("X-Live-Audio", if live { "1".to_string() } else { "0".to_string() }),
        ],
        bytes,
    )
        .into_response()
}

fn read_fallback_audio(state: &AppState, call_id: &str) -> Option<Vec<u8>> {
    let dir = state.fallback_audio_dir.as_ref()?;
    let sanitized = sanitize_call_id(call_id);
    let path = dir.join(format!("{sanitized}.wav"));
    std::fs::read(&path).ok()
}

/// `GET /calls/{id}/audio/meta`: state summary plus fallback availability
/// and the preferred source to read from (§4.6).
async fn call_audio_meta(State(state): State<AppState>, Path(call_id): Path<String>) -> impl IntoResponse {
    let live_audio = state.audio_buffer.get_state(&call_id);
    let fallback_available = read_fallback_audio(&state, &call_id).is_some();
    let preferred_source = if live_audio.available { "live" } else { "fallback" };

    Json(json!({
        "call_id": call_id,
        "live_audio": live_audio,
        "fallback_audio_available": fallback_available,
        "preferred_source": preferred_source,
    }))
}

/// `POST /alerts/{id}/ack`: acknowledges a supervisor alert by its globally
/// unique id, publishing `supervisor_alert_ack` if it changed state.
async fn ack_alert(State(state): State<AppState>, Path(alert_id): Path<u64>) -> Response {
    match state.engine.ack_alert_by_id(alert_id) {
        Ok(changed) => Json(json!({"ok": true, "acknowledged": changed})).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Validates the `X-Cloud-Token`/`Authorization: Bearer` header against
/// `ingest_token`, the same shared-secret scheme the AudioHook forwarder
/// sends outbound. An empty configured token disables the check.
fn check_ingest_token(headers: &HeaderMap, expected: &str) -> TelemetryResult<()> {
    if expected.is_empty() {
        return Ok(());
    }
    if let Some(token) = headers.get("x-cloud-token").and_then(|v| v.to_str().ok()) {
        if token.trim() == expected {
            return Ok(());
        }
    }
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(bearer) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            if bearer.trim() == expected {
                return Ok(());
            }
        }
    }
    Err(TelemetryError::AuthError("invalid or missing ingest token".into()))
}

/// `POST /ingest/events`: the normalized-envelope sink AudioHook's event
/// forwarder and any external collaborator POST transcript/status events to.
async fn ingest_event(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<Value>) -> Response {
    if let Err(err) = check_ingest_token(&headers, &state.ingest_token) {
        return err.into_response();
    }
    match state.engine.ingest(&payload) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AudioChunkPayload {
    call_id: Option<String>,
    conversation_id: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    audio_b64: Option<String>,
    #[serde(default)]
    chunk_b64: Option<String>,
    #[serde(default)]
    audio_encoding: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    channels: Option<u16>,
    #[serde(default)]
    chunk_id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    occurred_at: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    sentiment: Option<Value>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// `POST /ingest/audio`: the audio sink AudioHook's chunk forwarder POSTs to.
/// Appends the decoded PCM to the live-audio buffer (C4), then ingests a
/// derived event into the scoring engine (C5) carrying the resulting audio
/// state summary in its metadata, so a call's risk state reflects audio
/// arrival even absent a transcript.
async fn ingest_audio(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<AudioChunkPayload>) -> Response {
    if let Err(err) = check_ingest_token(&headers, &state.ingest_token) {
        return err.into_response();
    }

    let call_id = match payload
        .call_id
        .clone()
        .or_else(|| payload.conversation_id.clone())
        .or_else(|| payload.session_id.clone())
        .filter(|s| !s.trim().is_empty())
    {
        Some(call_id) => call_id,
        None => return TelemetryError::ClientError("missing call_id/conversation_id/session_id".into()).into_response(),
    };

    let pcm_bytes = match decode_audio_chunk(&payload) {
        Ok(bytes) => bytes,
        Err(err) => return err.into_response(),
    };

    let sample_rate = payload.sample_rate.unwrap_or(8000);
    let channels = payload.channels.unwrap_or(1);
    let occurred_at = parse_timestamp(payload.timestamp.as_deref().or(payload.occurred_at.as_deref()));

    let audio_state = match state.audio_buffer.append_pcm_chunk(
        &call_id,
        &pcm_bytes,
        sample_rate,
        channels,
        2,
        payload.chunk_id.as_deref(),
        occurred_at,
    ) {
        Ok(summary) => summary,
        Err(err) => return err.into_response(),
    };

    let event_payload = build_event_from_audio_payload(&payload, &call_id, &audio_state);
    let outcome = match state.engine.ingest(&event_payload) {
        Ok(outcome) => outcome,
        Err(err) => return err.into_response(),
    };

    Json(json!({
        "ok": true,
        "call_id": call_id,
        "audio": audio_state,
        "ingest": outcome,
    }))
    .into_response()
}

fn decode_audio_chunk(payload: &AudioChunkPayload) -> TelemetryResult<Vec<u8>> {
    let encoded = payload
        .audio_b64
        .as_deref()
        .or(payload.chunk_b64.as_deref())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TelemetryError::ClientError("missing audio_b64".into()))?;

    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|err| TelemetryError::ClientError(format!("invalid base64 audio payload: {err}")))?;
    if raw.is_empty() {
        return Err(TelemetryError::ClientError("empty decoded audio payload".into()));
    }

    match payload.audio_encoding.as_deref().unwrap_or("pcm_s16le").to_lowercase().as_str() {
        "pcm_s16le" | "pcm16" | "s16le" | "linear16" | "l16" => Ok(raw),
        other => Err(TelemetryError::ClientError(format!(
            "unsupported audio_encoding: {other} (audio chunks must already be decoded PCM s16le)"
        ))),
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).ok()
}

fn build_event_from_audio_payload(payload: &AudioChunkPayload, call_id: &str, audio_state: &crate::audio::AudioStateSummary) -> Value {
    let mut metadata = payload.metadata.clone().filter(Value::is_object).unwrap_or_else(|| json!({}));
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("audio".to_string(), serde_json::to_value(audio_state).unwrap_or(Value::Null));
    }

    let event_type = if payload.text.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false) {
        "transcript"
    } else {
        "audio_chunk"
    };

    json!({
        "call_id": call_id,
        "provider": payload.provider.clone().unwrap_or_else(|| "generic".to_string()),
        "event_type": event_type,
        "status": payload.status,
        "speaker": payload.speaker,
        "text": payload.text.clone().unwrap_or_default(),
        "sentiment": payload.sentiment,
        "confidence": payload.confidence,
        "agent_id": payload.agent_id,
        "customer_id": payload.customer_id,
        "metadata": metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_token_accepts_cloud_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-cloud-token", "secret".parse().unwrap());
        assert!(check_ingest_token(&headers, "secret").is_ok());
    }

    #[test]
    fn ingest_token_accepts_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(check_ingest_token(&headers, "secret").is_ok());
    }

    #[test]
    fn ingest_token_rejects_mismatch() {
        let headers = HeaderMap::new();
        assert!(check_ingest_token(&headers, "secret").is_err());
    }

    #[test]
    fn ingest_token_disabled_when_empty() {
        let headers = HeaderMap::new();
        assert!(check_ingest_token(&headers, "").is_ok());
    }

    #[test]
    fn decode_audio_chunk_rejects_non_pcm_encoding() {
        let payload = AudioChunkPayload {
            call_id: Some("c-1".into()),
            conversation_id: None,
            session_id: None,
            audio_b64: Some(BASE64.encode([0u8; 4])),
            chunk_b64: None,
            audio_encoding: Some("opus".into()),
            sample_rate: None,
            channels: None,
            chunk_id: None,
            timestamp: None,
            occurred_at: None,
            text: None,
            provider: None,
            status: None,
            speaker: None,
            agent_id: None,
            customer_id: None,
            sentiment: None,
            confidence: None,
            metadata: None,
        };
        assert!(decode_audio_chunk(&payload).is_err());
    }

    #[test]
    fn decode_audio_chunk_rejects_missing_payload() {
        let payload = AudioChunkPayload {
            call_id: Some("c-1".into()),
            conversation_id: None,
            session_id: None,
            audio_b64: None,
            chunk_b64: None,
            audio_encoding: None,
            sample_rate: None,
            channels: None,
            chunk_id: None,
            timestamp: None,
            occurred_at: None,
            text: None,
            provider: None,
            status: None,
            speaker: None,
            agent_id: None,
            customer_id: None,
            sentiment: None,
            confidence: None,
            metadata: None,
        };
        assert!(decode_audio_chunk(&payload).is_err());
    }
}
