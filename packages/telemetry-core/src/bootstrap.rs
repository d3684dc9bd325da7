//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root - the single place where the ingest
//! engine, live-audio buffer, event bus, AudioHook ingress, vendor connector,
//! and HTTP/SSE gateway are instantiated and wired together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::audio::LiveAudioBuffer;
use crate::audiohook::{AudioHookConfig, AudioHookContext};
use crate::clock::{Clock, SystemClock};
use crate::connector::{Connector, ConnectorConfig};
use crate::engine::{IngestEngine, ScoringConfig};
use crate::error::{TelemetryError, TelemetryResult};
use crate::events::EventBus;
use crate::status_store::StatusStore;

/// Top-level configuration for [`bootstrap`], gathering the tunables each
/// wired component needs. `telemetry-server`'s own config layer builds one of
/// these from YAML + environment overrides.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub audiohook: AudioHookConfig,
    pub connector: ConnectorConfig,
    pub scoring: ScoringConfig,
    pub gateway_host: String,
    pub gateway_port: u16,
    /// Directory the live-audio buffer persists rolling PCM chunks under.
    pub audio_data_dir: PathBuf,
    /// Directory the AudioHook and connector status files are written to.
    pub status_dir: PathBuf,
    pub audio_window_seconds: u64,
    pub max_audio_chunk_bytes: usize,
    pub event_mailbox_capacity: usize,
    /// Optional directory of historical call recordings served as a fallback
    /// by `GET /calls/{id}/audio.wav?fallback=true` once the live window expires.
    pub fallback_audio_dir: Option<PathBuf>,
    pub dry_run: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            audiohook: AudioHookConfig::default(),
            connector: ConnectorConfig::default(),
            scoring: ScoringConfig::default(),
            gateway_host: "0.0.0.0".to_string(),
            gateway_port: 8080,
            audio_data_dir: PathBuf::from("./data/audio"),
            status_dir: PathBuf::from("./data/status"),
            audio_window_seconds: crate::constants::DEFAULT_AUDIO_WINDOW_SECONDS,
            max_audio_chunk_bytes: crate::constants::MAX_AUDIO_CHUNK_BYTES,
            event_mailbox_capacity: crate::constants::EVENT_MAILBOX_CAPACITY,
            fallback_audio_dir: None,
            dry_run: false,
        }
    }
}

/// Container for every wired service plus the background tasks running them.
pub struct BootstrappedServices {
    pub app_state: AppState,
    pub audiohook_ctx: Arc<AudioHookContext>,
    pub connector: Arc<Connector>,
    /// Cancellation token shared by every background task; cancel it to begin shutdown.
    pub stop: CancellationToken,
}

impl BootstrappedServices {
    /// Spawns the AudioHook listener and the vendor connector as background
    /// tasks, returning their join handles so the caller can await a clean exit.
    pub fn spawn_background_tasks(&self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let audiohook_ctx = self.audiohook_ctx.clone();
        let addr = match crate::audiohook::bind_addr(&audiohook_ctx.config) {
            Ok(addr) => addr,
            Err(err) => {
                log::error!("invalid AudioHook bind address: {err}");
                return (tokio::spawn(async {}), tokio::spawn(async {}));
            }
        };
        let audiohook_handle = tokio::spawn(async move {
            let router = crate::audiohook::audiohook_router(audiohook_ctx.clone());
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    log::info!("AudioHook listener bound to {addr}");
                    if let Err(err) = axum::serve(listener, router)
                        .with_graceful_shutdown(audiohook_ctx.stop.clone().cancelled_owned())
                        .await
                    {
                        log::error!("AudioHook listener exited with error: {err}");
                    }
                }
                Err(err) => log::error!("failed to bind AudioHook listener to {addr}: {err}"),
            }
        });

        let connector = self.connector.clone();
        let connector_handle = tokio::spawn(async move { connector.run().await });

        (audiohook_handle, connector_handle)
    }

    /// Cancels every background task's cooperative stop token.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }
}

/// Builds the shared HTTP client used by the AudioHook forwarder and the
/// vendor connector's REST calls.
fn create_http_client(config: &BootstrapConfig) -> TelemetryResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.audiohook.http_timeout_seconds.max(config.connector.http_timeout_seconds)))
        .danger_accept_invalid_certs(!config.connector.verify_ssl)
        .build()
        .map_err(|err| TelemetryError::InternalError(format!("failed to build HTTP client: {err}")))
}

/// Bootstraps every service and returns them wired together, ready for
/// [`BootstrappedServices::spawn_background_tasks`] and serving `app_state` over HTTP.
///
/// Wiring order:
/// 1. Clock, event bus, cancellation token.
/// 2. Live-audio buffer and ingest engine (no external dependencies).
/// 3. Shared HTTP client.
/// 4. AudioHook status store + context.
/// 5. Connector status store + connector (depends on the ingest engine).
/// 6. HTTP/SSE gateway application state.
pub fn bootstrap(config: BootstrapConfig) -> TelemetryResult<BootstrappedServices> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = EventBus::new(config.event_mailbox_capacity);
    let stop = CancellationToken::new();

    let audio_buffer = Arc::new(LiveAudioBuffer::new(
        config.audio_data_dir.clone(),
        config.audio_window_seconds,
        config.max_audio_chunk_bytes,
        clock.clone(),
    ));

    let engine = Arc::new(IngestEngine::new(bus.clone(), clock.clone(), config.scoring.clone()));

    let http_client = create_http_client(&config)?;

    let audiohook_status = Arc::new(StatusStore::new(
        config.status_dir.join("audiohook_status.json"),
        clock.clone(),
        config.dry_run,
    )?);
    let audiohook_ctx = Arc::new(AudioHookContext {
        config: config.audiohook.clone(),
        clock: clock.clone(),
        http_client: http_client.clone(),
        status: audiohook_status.clone(),
        stop: stop.clone(),
    });

    let connector_status = Arc::new(StatusStore::new(
        config.status_dir.join("connector_status.json"),
        clock.clone(),
        config.dry_run,
    )?);
    let connector = Arc::new(Connector::new(
        config.connector.clone(),
        http_client.clone(),
        connector_status.clone(),
        clock.clone(),
        engine.clone(),
        stop.clone(),
    ));

    let app_state = AppState {
        engine,
        audio_buffer,
        bus,
        audiohook_status,
        connector_status,
        clock,
        ingest_token: config.audiohook.ingest_token.clone(),
        audiohook_health_stale_seconds: config.audiohook.health_stale_seconds,
        connector_health_stale_seconds: config.connector.health_stale_seconds,
        fallback_audio_dir: config.fallback_audio_dir.clone(),
    };

    Ok(BootstrappedServices {
        app_state,
        audiohook_ctx,
        connector,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_wires_every_component_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BootstrapConfig {
            audio_data_dir: dir.path().join("audio"),
            status_dir: dir.path().join("status"),
            gateway_port: 0,
            ..BootstrapConfig::default()
        };
        let services = bootstrap(config).unwrap();
        assert!(!services.stop.is_cancelled());
        services.shutdown();
        assert!(services.stop.is_cancelled());
    }
}
