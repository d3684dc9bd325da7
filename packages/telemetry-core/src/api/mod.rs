//! HTTP/SSE gateway (C8).
//!
//! Thin handlers that delegate to the ingest engine, live-audio buffer, and
//! status stores. All business logic lives in those components; this module
//! only wires the router and does transport-level work (SSE framing, header
//! negotiation, request parsing).

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::audio::LiveAudioBuffer;
use crate::clock::Clock;
use crate::engine::IngestEngine;
use crate::events::EventBus;
use crate::status_store::StatusStore;

pub mod http;

/// Errors that can occur when starting the HTTP/SSE gateway.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server exited with error: {0}")]
    Serve(std::io::Error),
}

/// Shared application state for the HTTP/SSE gateway.
///
/// A thin aggregate of handles into the already-wired components; every
/// handler reaches through this rather than owning any state of its own.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<IngestEngine>,
    pub audio_buffer: Arc<LiveAudioBuffer>,
    pub bus: EventBus,
    pub audiohook_status: Arc<StatusStore>,
    pub connector_status: Arc<StatusStore>,
    pub clock: Arc<dyn Clock>,
    /// Shared secret required on the ingest endpoints the AudioHook forwarder
    /// and vendor connector (if configured to use an HTTP sink) POST to.
    /// Empty disables auth.
    pub ingest_token: String,
    pub audiohook_health_stale_seconds: u64,
    pub connector_health_stale_seconds: u64,
    /// Directory of historical per-call recordings served as a fallback once
    /// a call's live rolling window has expired. `None` disables the fallback.
    pub fallback_audio_dir: Option<PathBuf>,
}

/// Builds the gateway's router.
pub fn router(state: AppState) -> axum::Router {
    http::create_router(state)
}

/// Binds `host:port` and serves the gateway until `stop` is cancelled.
pub async fn serve(state: AppState, host: &str, port: u16, stop: tokio_util::sync::CancellationToken) -> Result<(), ServerError> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
    log::info!("HTTP/SSE gateway listening on http://{addr}");
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
        .map_err(ServerError::Serve)
}
