//! Per-connection state: negotiated media, pending PCM buffer, flush timing,
//! and the one-shot `call_end` bookkeeping (§4.4, `AudioHookConnection` in §3).

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::audiohook::chunker::{split_into_chunks, FlushPolicy};
use crate::audiohook::codec::{decode_to_pcm_s16le, SourceEncoding};
use crate::audiohook::command::MediaParams;
use crate::audiohook::config::AudioHookConfig;
use crate::audiohook::header::split_header;
use crate::clock::Clock;

/// Mutable state tracked for one AudioHook websocket connection.
pub struct AudioHookConnection {
    pub connection_id: String,
    pub call_id: Option<String>,
    media_format_label: String,
    sample_rate: u32,
    channel_labels: Vec<String>,
    pub opened: bool,
    pcm_buffer: Vec<u8>,
    last_flush: Instant,
    pub end_event_emitted: bool,
    pub audio_packet_count: u64,
}

impl AudioHookConnection {
    pub fn new(connection_id: String, config: &AudioHookConfig, clock: &dyn Clock) -> Self {
        let channel_labels = (0..config.channels_default.max(1))
            .map(|i| format!("channel_{i}"))
            .collect();
        Self {
            connection_id,
            call_id: None,
            media_format_label: String::new(),
            sample_rate: config.sample_rate_default,
            channel_labels,
            opened: false,
            pcm_buffer: Vec::new(),
            last_flush: clock.now_monotonic(),
            end_event_emitted: false,
            audio_packet_count: 0,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channel_labels.len().max(1) as u16
    }

    /// Assigns `call_id` per §4.4: explicit id from the command, else the
    /// websocket URL query, else a synthesized id.
    pub fn resolve_call_id(conversation_id: Option<String>, query_call_id: Option<&str>, clock: &dyn Clock) -> String {
        conversation_id
            .or_else(|| query_call_id.map(str::to_string))
            .unwrap_or_else(|| format!("audiohook-{}", clock.now_millis()))
    }

    /// Applies an `open` command, negotiating media and assigning `call_id`.
    /// Returns the `opened` reply.
    pub fn open(&mut self, conversation_id: Option<String>, media: Option<MediaParams>, query_call_id: Option<&str>, clock: &dyn Clock) -> Value {
        let call_id = Self::resolve_call_id(conversation_id, query_call_id, clock);
        let media = media.unwrap_or(MediaParams {
            format: "PCMU".to_string(),
            rate: self.sample_rate,
            channel_labels: self.channel_labels.clone(),
        });

        self.media_format_label = media.format.clone();
        self.sample_rate = media.rate;
        self.channel_labels = media.channel_labels.clone();
        self.opened = true;
        self.call_id = Some(call_id.clone());

        crate::audiohook::command::build_opened_reply(&call_id, &media)
    }

    /// Decodes and appends one audio packet's media bytes to the pending
    /// buffer. Packets arriving before `open` are discarded (§4.4).
    pub fn ingest_audio_packet(&mut self, payload: &[u8]) {
        if !self.opened {
            return;
        }
        let (header, media_bytes) = split_header(payload);
        let format_label = header
            .get("format")
            .or_else(|| header.get("media-format"))
            .cloned()
            .unwrap_or_else(|| self.media_format_label.clone());
        if let Some(rate) = header.get("rate").or_else(|| header.get("media-rate")).and_then(|v| v.parse().ok()) {
            self.sample_rate = rate;
        }

        let encoding = SourceEncoding::parse(&format_label);
        let Some(decoded) = decode_to_pcm_s16le(media_bytes, encoding) else {
            log::warn!(
                "audiohook connection {}: dropping packet with unsupported encoding {format_label:?}",
                self.connection_id
            );
            return;
        };

        self.pcm_buffer.extend_from_slice(&decoded);
        self.audio_packet_count += 1;
    }

    fn flush_policy(&self, config: &AudioHookConfig) -> FlushPolicy {
        FlushPolicy::new(
            self.sample_rate,
            self.channels(),
            config.flush_interval_ms,
            config.min_chunk_duration_ms,
            config.max_chunk_duration_ms,
        )
    }

    /// Returns `true` if a time- or size-based flush should fire right now.
    pub fn should_flush(&self, config: &AudioHookConfig, clock: &dyn Clock) -> bool {
        let elapsed_ms = clock.now_monotonic().duration_since(self.last_flush).as_millis() as u64;
        self.flush_policy(config).should_flush(self.pcm_buffer.len(), elapsed_ms)
    }

    /// Drains the pending buffer into chunks (capped at `max_bytes` each),
    /// resetting the flush timer. A forced flush (socket teardown) drains
    /// everything regardless of the min-bytes gate.
    pub fn drain_chunks(&mut self, config: &AudioHookConfig, clock: &dyn Clock) -> Vec<Vec<u8>> {
        let max_bytes = self.flush_policy(config).max_bytes;
        let chunks = split_into_chunks(&self.pcm_buffer, max_bytes);
        self.pcm_buffer.clear();
        self.last_flush = clock.now_monotonic();
        chunks
    }

    pub fn has_pending_audio(&self) -> bool {
        !self.pcm_buffer.is_empty()
    }

    /// Builds the JSON body POSTed to the audio sink for one flushed chunk (§4.4).
    pub fn build_audio_chunk_payload(&self, pcm_chunk: &[u8], status: &str, flush_reason: &str, occurred_at: DateTime<Utc>) -> Value {
        json!({
            "provider": "genesys_audiohook",
            "call_id": self.call_id.as_deref().unwrap_or("unknown"),
            "audio_encoding": "pcm_s16le",
            "sample_rate": self.sample_rate,
            "channels": self.channels(),
            "audio_b64": BASE64.encode(pcm_chunk),
            "status": status,
            "timestamp": occurred_at.to_rfc3339(),
            "metadata": {
                "connection_id": self.connection_id,
                "channel_labels": self.channel_labels,
                "media_format": self.media_format_label,
                "flush_reason": flush_reason,
                "audio_packet_count": self.audio_packet_count,
            },
        })
    }

    /// Builds the normalized envelope POSTed to the event sink for a `call_end` (§4.4).
    pub fn build_call_end_payload(&self, occurred_at: DateTime<Utc>) -> Value {
        json!({
            "provider": "genesys_audiohook",
            "call_id": self.call_id.as_deref().unwrap_or("unknown"),
            "event_type": "call_end",
            "status": "ended",
            "occurred_at": occurred_at.to_rfc3339(),
            "metadata": {"connection_id": self.connection_id},
        })
    }

    /// Builds the normalized envelope POSTed to the event sink for an `event` command.
    pub fn build_event_payload(&self, text: &str, occurred_at: DateTime<Utc>) -> Value {
        json!({
            "provider": "genesys_audiohook",
            "call_id": self.call_id.as_deref().unwrap_or("unknown"),
            "event_type": "transcript",
            "text": text,
            "occurred_at": occurred_at.to_rfc3339(),
            "metadata": {"connection_id": self.connection_id},
        })
    }
}
