//! Axum wiring for the AudioHook websocket listener (§4.4, §6).
//!
//! A single route serves both the websocket upgrade and, for any plain GET
//! without upgrade headers, a JSON liveness probe - the vendor platform and
//! uptime checks alike hit the same URL.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{FromRequestParts, State, WebSocketUpgrade};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::audiohook::command::{build_closed_reply, build_pong_reply, parse_command, Command};
use crate::audiohook::config::AudioHookConfig;
use crate::audiohook::connection::AudioHookConnection;
use crate::audiohook::forward::forward_with_retry;
use crate::audiohook::framing::{decode_packets, encode_packet, PACKET_TYPE_COMMAND};
use crate::clock::Clock;
use crate::constants::{AUDIOHOOK_WS_PING_INTERVAL_SECS, AUDIOHOOK_WS_PING_TIMEOUT_SECS};
use crate::status_store::StatusStore;

/// Shared dependencies for every AudioHook connection.
pub struct AudioHookContext {
    pub config: AudioHookConfig,
    pub clock: Arc<dyn Clock>,
    pub http_client: Client,
    pub status: Arc<StatusStore>,
    pub stop: CancellationToken,
}

/// Builds the AudioHook router, mounted at `ctx.config.path`.
pub fn audiohook_router(ctx: Arc<AudioHookContext>) -> Router {
    Router::new()
        .route(&ctx.config.path.clone(), get(audiohook_entry))
        .with_state(ctx)
}

async fn audiohook_entry(State(ctx): State<Arc<AudioHookContext>>, req: Request<Body>) -> Response {
    let wants_upgrade = req
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !wants_upgrade {
        return health_probe(&ctx).await.into_response();
    }

    let query_call_id = req
        .uri()
        .query()
        .and_then(|q| url::form_urlencoded::parse(q.as_bytes()).find(|(k, _)| k == "call_id" || k == "conversation_id"))
        .map(|(_, v)| v.into_owned());

    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &ctx).await {
        Ok(upgrade) => {
            let ctx = ctx.clone();
            upgrade.on_upgrade(move |socket| handle_socket(socket, ctx, query_call_id))
        }
        Err(rejection) => rejection.into_response(),
    }
}

async fn health_probe(ctx: &AudioHookContext) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "service": "genesys_audiohook_listener",
            "path": ctx.config.path,
            "timestamp": ctx.clock.now_utc().to_rfc3339(),
        })),
    )
}

/// Close code for a clean `close` command (§4.4).
const CLOSE_CODE_NORMAL: u16 = 1000;
/// Close code for `disconnect`/`error` commands or a read error (§4.4).
const CLOSE_CODE_ABNORMAL: u16 = 1011;

/// Drives one websocket connection end to end: reads packets in arrival
/// order, dispatches commands, decodes and chunks audio, flushes on a timer
/// or size threshold, and forwards to the configured sinks.
async fn handle_socket(socket: WebSocket, ctx: Arc<AudioHookContext>, query_call_id: Option<String>) {
    let connection_id = Uuid::new_v4().to_string();
    let mut conn = AudioHookConnection::new(connection_id.clone(), &ctx.config, ctx.clock.as_ref());
    let _ = ctx.status.increment("connections", 1);

    let (mut sink, mut stream) = socket.split();
    let mut flush_ticker = interval(Duration::from_millis(ctx.config.flush_interval_ms.max(50)));
    let mut ping_ticker = interval(Duration::from_secs(AUDIOHOOK_WS_PING_INTERVAL_SECS));
    let read_timeout = Duration::from_secs(AUDIOHOOK_WS_PING_TIMEOUT_SECS);
    let mut close_code = CLOSE_CODE_NORMAL;

    'outer: loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    log::warn!("audiohook connection {connection_id}: failed to send keepalive ping");
                    close_code = CLOSE_CODE_ABNORMAL;
                    break;
                }
            }
            message = tokio::time::timeout(read_timeout, stream.next()) => {
                let Ok(message) = message else {
                    log::warn!("audiohook connection {connection_id}: read timed out waiting for traffic");
                    close_code = CLOSE_CODE_ABNORMAL;
                    break;
                };
                let Some(message) = message else { break };
                match message {
                    Ok(Message::Binary(bytes)) => {
                        for packet in decode_packets(&bytes) {
                            if packet.packet_type == PACKET_TYPE_COMMAND {
                                let Ok(raw) = serde_json::from_slice::<Value>(packet.payload) else {
                                    log::warn!("audiohook connection {connection_id}: malformed command JSON");
                                    continue;
                                };
                                match parse_command(&raw) {
                                    Command::Open { conversation_id, media } => {
                                        let reply = conn.open(conversation_id, media, query_call_id.as_deref(), ctx.clock.as_ref());
                                        send_reply(&mut sink, &reply).await;
                                    }
                                    Command::Ping { id, seq } => {
                                        send_reply(&mut sink, &build_pong_reply(id, seq)).await;
                                    }
                                    Command::Close => {
                                        send_reply(&mut sink, &build_closed_reply()).await;
                                        close_code = CLOSE_CODE_NORMAL;
                                        break 'outer;
                                    }
                                    Command::Disconnect | Command::Error => {
                                        close_code = CLOSE_CODE_ABNORMAL;
                                        break 'outer;
                                    }
                                    Command::Event { texts } => {
                                        for text in texts {
                                            let now = ctx.clock.now_utc();
                                            let body = conn.build_event_payload(&text, now);
                                            forward_event(&ctx, &body).await;
                                        }
                                    }
                                    Command::Unknown(kind) => {
                                        log::debug!("audiohook connection {connection_id}: unrecognized command {kind}");
                                    }
                                }
                            } else {
                                conn.ingest_audio_packet(packet.payload);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("audiohook connection {connection_id}: read error: {err}");
                        close_code = CLOSE_CODE_ABNORMAL;
                        break;
                    }
                }
            }
            _ = flush_ticker.tick() => {
                if conn.should_flush(&ctx.config, ctx.clock.as_ref()) {
                    flush_and_forward(&mut conn, &ctx, false).await;
                }
            }
        }
    }

    flush_and_forward(&mut conn, &ctx, true).await;
    emit_call_end(&mut conn, &ctx).await;
    let _ = sink
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code: close_code,
            reason: "".into(),
        })))
        .await;
    let _ = ctx.status.increment("connections", -1);
}

async fn send_reply(sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin), reply: &Value) {
    if let Ok(body) = serde_json::to_vec(reply) {
        let encoded = encode_packet(PACKET_TYPE_COMMAND, &body);
        let _ = sink.send(Message::Binary(Bytes::from(encoded))).await;
    }
}

async fn flush_and_forward(conn: &mut AudioHookConnection, ctx: &Arc<AudioHookContext>, force: bool) {
    if !force && !conn.has_pending_audio() {
        return;
    }
    let chunks = conn.drain_chunks(&ctx.config, ctx.clock.as_ref());
    let reason = if force { "force" } else { "policy" };
    for chunk in chunks {
        let now = ctx.clock.now_utc();
        let body = conn.build_audio_chunk_payload(&chunk, "active", reason, now);
        forward_chunk(ctx, &body).await;
    }
}

async fn emit_call_end(conn: &mut AudioHookConnection, ctx: &Arc<AudioHookContext>) {
    if conn.end_event_emitted {
        return;
    }
    conn.end_event_emitted = true;
    let now = ctx.clock.now_utc();
    let body = conn.build_call_end_payload(now);
    forward_event(ctx, &body).await;
}

async fn forward_chunk(ctx: &Arc<AudioHookContext>, body: &Value) {
    let outcome = forward_with_retry(
        &ctx.http_client,
        ctx.config.audio_ingest_url.as_ref(),
        &ctx.config.ingest_token,
        body,
        ctx.config.retry_max_attempts,
        ctx.config.retry_backoff_seconds,
        ctx.config.http_timeout_seconds,
        &ctx.stop,
    )
    .await;
    record_forward_outcome(ctx, "forwarded_chunks", outcome);
}

async fn forward_event(ctx: &Arc<AudioHookContext>, body: &Value) {
    let outcome = forward_with_retry(
        &ctx.http_client,
        ctx.config.event_ingest_url.as_ref(),
        &ctx.config.ingest_token,
        body,
        ctx.config.retry_max_attempts,
        ctx.config.retry_backoff_seconds,
        ctx.config.http_timeout_seconds,
        &ctx.stop,
    )
    .await;
    record_forward_outcome(ctx, "forwarded_events", outcome);
}

fn record_forward_outcome(ctx: &Arc<AudioHookContext>, success_key: &str, outcome: crate::audiohook::forward::ForwardOutcome) {
    use crate::audiohook::forward::ForwardOutcome;
    match outcome {
        ForwardOutcome::Sent => {
            let _ = ctx.status.increment(success_key, 1);
        }
        ForwardOutcome::GaveUp => {
            let _ = ctx.status.increment("forward_failures", 1);
        }
        ForwardOutcome::Disabled => {}
    }
}

/// Resolves an `AudioHookConfig`'s sink URLs, tolerating malformed env values
/// by logging and disabling that sink rather than failing startup.
pub fn parse_sink_url(raw: &str, label: &str) -> Option<Url> {
    if raw.trim().is_empty() {
        return None;
    }
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(err) => {
            log::warn!("invalid {label} URL {raw:?}: {err}");
            None
        }
    }
}

/// The socket address the AudioHook listener binds to.
pub fn bind_addr(config: &AudioHookConfig) -> Result<SocketAddr, std::net::AddrParseError> {
    format!("{}:{}", config.host, config.port).parse()
}
