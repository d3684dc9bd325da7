//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides, the
//! same two-layer scheme the core library's components were built against
//! (§6): a config file for the stable shape, environment variables for the
//! secrets and per-deployment tunables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use telemetry_core::audiohook::AudioHookConfig;
use telemetry_core::connector::ConnectorConfig;
use telemetry_core::engine::ScoringConfig;
use telemetry_core::BootstrapConfig;

/// Server configuration loaded from YAML with environment overrides.
///
/// Mirrors [`BootstrapConfig`] field-for-field but keeps every URL as a
/// `String` (validated into a real `Url` only once, in [`Self::into_bootstrap_config`]),
/// since `serde_yaml` + raw env strings are easiest to model that way.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host the HTTP/SSE gateway binds to. Override: `TELEMETRY_GATEWAY_HOST`
    pub gateway_host: String,
    /// Port the HTTP/SSE gateway binds to. Override: `TELEMETRY_GATEWAY_PORT`
    pub gateway_port: u16,

    /// Directory rolling live-audio PCM chunks are persisted under. Override: `TELEMETRY_AUDIO_DATA_DIR`
    pub audio_data_dir: PathBuf,
    /// Directory AudioHook/connector status files are written to. Override: `TELEMETRY_STATUS_DIR`
    pub status_dir: PathBuf,
    /// Directory of historical per-call recordings served as a fallback once the live window expires.
    pub fallback_audio_dir: Option<PathBuf>,
    pub audio_window_seconds: u64,
    pub max_audio_chunk_bytes: usize,
    pub event_mailbox_capacity: usize,
    pub dry_run: bool,

    pub audiohook: AudioHookSection,
    pub connector: ConnectorSection,
    pub scoring: ScoringSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioHookSection {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Shared secret required on the ingest endpoints AudioHook forwards to. Override: `TELEMETRY_INGEST_TOKEN`
    pub ingest_token: String,
    /// Where decoded PCM chunks are POSTed. Defaults to this same gateway's own `/ingest/audio`.
    pub audio_ingest_url: Option<String>,
    /// Where normalized events are POSTed. Defaults to this same gateway's own `/ingest/events`.
    pub event_ingest_url: Option<String>,
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

impl Default for AudioHookSection {
    fn default() -> Self {
        let defaults = AudioHookConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            path: defaults.path,
            ingest_token: defaults.ingest_token,
            audio_ingest_url: None,
            event_ingest_url: None,
            sample_rate_default: defaults.sample_rate_default,
            channels_default: defaults.channels_default,
            http_timeout_seconds: defaults.http_timeout_seconds,
            retry_max_attempts: defaults.retry_max_attempts,
            retry_backoff_seconds: defaults.retry_backoff_seconds,
            flush_interval_ms: defaults.flush_interval_ms,
            min_chunk_duration_ms: defaults.min_chunk_duration_ms,
            max_chunk_duration_ms: defaults.max_chunk_duration_ms,
            health_stale_seconds: defaults.health_stale_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectorSection {
    /// Override: `TELEMETRY_CONNECTOR_CLIENT_ID`
    pub client_id: String,
    /// Override: `TELEMETRY_CONNECTOR_CLIENT_SECRET`
    pub client_secret: String,
    pub login_base_url: String,
    pub api_base_url: String,
    pub subscription_topics: Vec<String>,
    pub queue_ids: Vec<String>,
    pub user_ids: Vec<String>,
    pub verify_ssl: bool,
    pub http_timeout_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_seconds: f64,
    pub reconnect_delay_seconds: u64,
    pub topic_builder_mode: String,
    pub topic_builder_queue_name_filters: Vec<String>,
    pub topic_builder_user_name_filters: Vec<String>,
    pub topic_builder_user_email_domain_filters: Vec<String>,
    pub topic_builder_max_queues: usize,
    pub topic_builder_max_users: usize,
    pub topic_builder_refresh_seconds: u64,
    pub health_stale_seconds: u64,
    pub dry_run: bool,
}

impl Default for ConnectorSection {
    fn default() -> Self {
        let defaults = ConnectorConfig::default();
        Self {
            client_id: defaults.client_id,
            client_secret: defaults.client_secret,
            login_base_url: defaults.login_base_url,
            api_base_url: defaults.api_base_url,
            subscription_topics: defaults.subscription_topics,
            queue_ids: defaults.queue_ids,
            user_ids: defaults.user_ids,
            verify_ssl: defaults.verify_ssl,
            http_timeout_seconds: defaults.http_timeout_seconds,
            retry_max_attempts: defaults.retry_max_attempts,
            retry_backoff_seconds: defaults.retry_backoff_seconds,
            reconnect_delay_seconds: defaults.reconnect_delay_seconds,
            topic_builder_mode: defaults.topic_builder_mode,
            topic_builder_queue_name_filters: defaults.topic_builder_queue_name_filters,
            topic_builder_user_name_filters: defaults.topic_builder_user_name_filters,
            topic_builder_user_email_domain_filters: defaults.topic_builder_user_email_domain_filters,
            topic_builder_max_queues: defaults.topic_builder_max_queues,
            topic_builder_max_users: defaults.topic_builder_max_users,
            topic_builder_refresh_seconds: defaults.topic_builder_refresh_seconds,
            health_stale_seconds: defaults.health_stale_seconds,
            dry_run: defaults.dry_run,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub negative_sentiment_threshold: f64,
    pub high_risk_threshold: f64,
    pub cooldown_seconds: i64,
    pub keyword_triggers: Vec<String>,
}

impl Default for ScoringSection {
    fn default() -> Self {
        let defaults = ScoringConfig::default();
        Self {
            negative_sentiment_threshold: defaults.negative_sentiment_threshold,
            high_risk_threshold: defaults.high_risk_threshold,
            cooldown_seconds: defaults.cooldown_seconds,
            keyword_triggers: defaults.keyword_triggers,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let bootstrap_defaults = BootstrapConfig::default();
        Self {
            gateway_host: bootstrap_defaults.gateway_host,
            gateway_port: bootstrap_defaults.gateway_port,
            audio_data_dir: bootstrap_defaults.audio_data_dir,
            status_dir: bootstrap_defaults.status_dir,
            fallback_audio_dir: bootstrap_defaults.fallback_audio_dir,
            audio_window_seconds: bootstrap_defaults.audio_window_seconds,
            max_audio_chunk_bytes: bootstrap_defaults.max_audio_chunk_bytes,
            event_mailbox_capacity: bootstrap_defaults.event_mailbox_capacity,
            dry_run: bootstrap_defaults.dry_run,
            audiohook: AudioHookSection::default(),
            connector: ConnectorSection::default(),
            scoring: ScoringSection::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TELEMETRY_GATEWAY_HOST") {
            self.gateway_host = val;
        }
        if let Ok(val) = std::env::var("TELEMETRY_GATEWAY_PORT") {
            if let Ok(port) = val.parse() {
                self.gateway_port = port;
            }
        }
        if let Ok(val) = std::env::var("TELEMETRY_AUDIO_DATA_DIR") {
            self.audio_data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TELEMETRY_STATUS_DIR") {
            self.status_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TELEMETRY_FALLBACK_AUDIO_DIR") {
            self.fallback_audio_dir = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("TELEMETRY_INGEST_TOKEN") {
            self.audiohook.ingest_token = val;
        }
        if let Ok(val) = std::env::var("TELEMETRY_AUDIOHOOK_PORT") {
            if let Ok(port) = val.parse() {
                self.audiohook.port = port;
            }
        }
        if let Ok(val) = std::env::var("TELEMETRY_CONNECTOR_CLIENT_ID") {
            self.connector.client_id = val;
        }
        if let Ok(val) = std::env::var("TELEMETRY_CONNECTOR_CLIENT_SECRET") {
            self.connector.client_secret = val;
        }
        if let Ok(val) = std::env::var("TELEMETRY_CONNECTOR_LOGIN_BASE_URL") {
            self.connector.login_base_url = val;
        }
        if let Ok(val) = std::env::var("TELEMETRY_CONNECTOR_API_BASE_URL") {
            self.connector.api_base_url = val;
        }
        if let Ok(val) = std::env::var("TELEMETRY_DRY_RUN") {
            if let Ok(dry_run) = val.parse() {
                self.dry_run = dry_run;
                self.connector.dry_run = dry_run;
            }
        }
    }

    /// Converts to telemetry-core's [`BootstrapConfig`], defaulting the
    /// AudioHook ingest sinks to this same gateway's own ingest endpoints
    /// when left unset, so a default deployment closes the AudioHook ingress
    /// to ingest-engine/live-audio-buffer loop without any extra configuration.
    pub fn into_bootstrap_config(self) -> Result<BootstrapConfig> {
        let gateway_self_url = format!("http://127.0.0.1:{}", self.gateway_port);

        let audio_ingest_url = self
            .audiohook
            .audio_ingest_url
            .unwrap_or_else(|| format!("{gateway_self_url}/ingest/audio"));
        let event_ingest_url = self
            .audiohook
            .event_ingest_url
            .unwrap_or_else(|| format!("{gateway_self_url}/ingest/events"));

        let audiohook = AudioHookConfig {
            host: self.audiohook.host,
            port: self.audiohook.port,
            path: self.audiohook.path,
            ingest_token: self.audiohook.ingest_token,
            audio_ingest_url: Some(audio_ingest_url.parse().context("invalid audio_ingest_url")?),
            event_ingest_url: Some(event_ingest_url.parse().context("invalid event_ingest_url")?),
            sample_rate_default: self.audiohook.sample_rate_default,
            channels_default: self.audiohook.channels_default,
            http_timeout_seconds: self.audiohook.http_timeout_seconds,
            retry_max_attempts: self.audiohook.retry_max_attempts,
            retry_backoff_seconds: self.audiohook.retry_backoff_seconds,
            flush_interval_ms: self.audiohook.flush_interval_ms,
            min_chunk_duration_ms: self.audiohook.min_chunk_duration_ms,
            max_chunk_duration_ms: self.audiohook.max_chunk_duration_ms,
            health_stale_seconds: self.audiohook.health_stale_seconds,
        };

        let connector = ConnectorConfig {
            client_id: self.connector.client_id,
            client_secret: self.connector.client_secret,
            login_base_url: self.connector.login_base_url,
            api_base_url: self.connector.api_base_url,
            subscription_topics: self.connector.subscription_topics,
            queue_ids: self.connector.queue_ids,
            user_ids: self.connector.user_ids,
            verify_ssl: self.connector.verify_ssl,
            http_timeout_seconds: self.connector.http_timeout_seconds,
            retry_max_attempts: self.connector.retry_max_attempts,
            retry_backoff_seconds: self.connector.retry_backoff_seconds,
            reconnect_delay_seconds: self.connector.reconnect_delay_seconds,
            topic_builder_mode: self.connector.topic_builder_mode,
            topic_builder_queue_name_filters: self.connector.topic_builder_queue_name_filters,
            topic_builder_user_name_filters: self.connector.topic_builder_user_name_filters,
            topic_builder_user_email_domain_filters: self.connector.topic_builder_user_email_domain_filters,
            topic_builder_max_queues: self.connector.topic_builder_max_queues,
            topic_builder_max_users: self.connector.topic_builder_max_users,
            topic_builder_refresh_seconds: self.connector.topic_builder_refresh_seconds,
            health_stale_seconds: self.connector.health_stale_seconds,
            dry_run: self.connector.dry_run,
        };

        let scoring = ScoringConfig {
            negative_sentiment_threshold: self.scoring.negative_sentiment_threshold,
            high_risk_threshold: self.scoring.high_risk_threshold,
            cooldown_seconds: self.scoring.cooldown_seconds,
            keyword_triggers: self.scoring.keyword_triggers,
        };

        Ok(BootstrapConfig {
            audiohook,
            connector,
            scoring,
            gateway_host: self.gateway_host,
            gateway_port: self.gateway_port,
            audio_data_dir: self.audio_data_dir,
            status_dir: self.status_dir,
            audio_window_seconds: self.audio_window_seconds,
            max_audio_chunk_bytes: self.max_audio_chunk_bytes,
            event_mailbox_capacity: self.event_mailbox_capacity,
            fallback_audio_dir: self.fallback_audio_dir,
            dry_run: self.dry_run,
        })
    }
}
