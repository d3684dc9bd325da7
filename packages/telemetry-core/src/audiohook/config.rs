//! Runtime configuration for the AudioHook ingress (§6 env var table).

use url::Url;

use crate::constants::{
    AUDIOHOOK_DEFAULT_FLUSH_INTERVAL_MS, AUDIOHOOK_DEFAULT_HEALTH_STALE_SECONDS, AUDIOHOOK_DEFAULT_HOST,
    AUDIOHOOK_DEFAULT_HTTP_TIMEOUT_SECS, AUDIOHOOK_DEFAULT_MAX_CHUNK_DURATION_MS, AUDIOHOOK_DEFAULT_MIN_CHUNK_DURATION_MS,
    AUDIOHOOK_DEFAULT_PATH, AUDIOHOOK_DEFAULT_PORT, AUDIOHOOK_DEFAULT_RETRY_BACKOFF_SECONDS,
    AUDIOHOOK_DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_AUDIO_CHANNELS, DEFAULT_AUDIO_SAMPLE_RATE,
};

/// Tunables for the AudioHook websocket listener and its forwarding paths.
#[derive(Debug, Clone)]
pub struct AudioHookConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Shared-secret header value required on forwarded audio/event POSTs; empty disables auth.
    pub ingest_token: String,
    /// Where decoded PCM chunks are POSTed; `None` disables audio forwarding.
    pub audio_ingest_url: Option<Url>,
    /// Where normalized `event` commands are POSTed; `None` disables event forwarding.
    pub event_ingest_url: Option<Url>,
    pub sample_rate_default: u32,
    pub channels_default: u16,
    pub http_timeout_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_seconds: f64,
    pub flush_interval_ms: u64,
    pub min_chunk_duration_ms: u64,
    pub max_chunk_duration_ms: u64,
    pub health_stale_seconds: u64,
}

impl Default for AudioHookConfig {
    fn default() -> Self {
        Self {
            host: AUDIOHOOK_DEFAULT_HOST.to_string(),
            port: AUDIOHOOK_DEFAULT_PORT,
            path: AUDIOHOOK_DEFAULT_PATH.to_string(),
            ingest_token: String::new(),
            audio_ingest_url: None,
            event_ingest_url: None,
            sample_rate_default: DEFAULT_AUDIO_SAMPLE_RATE,
            channels_default: DEFAULT_AUDIO_CHANNELS,
            http_timeout_seconds: AUDIOHOOK_DEFAULT_HTTP_TIMEOUT_SECS,
            retry_max_attempts: AUDIOHOOK_DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_backoff_seconds: AUDIOHOOK_DEFAULT_RETRY_BACKOFF_SECONDS,
            flush_interval_ms: AUDIOHOOK_DEFAULT_FLUSH_INTERVAL_MS,
            min_chunk_duration_ms: AUDIOHOOK_DEFAULT_MIN_CHUNK_DURATION_MS,
            max_chunk_duration_ms: AUDIOHOOK_DEFAULT_MAX_CHUNK_DURATION_MS,
            health_stale_seconds: AUDIOHOOK_DEFAULT_HEALTH_STALE_SECONDS,
        }
    }
}
