//! Core library for the real-time contact-center telemetry plane.
//!
//! Four components compose into one process:
//!
//! - [`audiohook`]: the AudioHook websocket ingress (C6), decoding vendor
//!   media framing and forwarding normalized audio/event payloads.
//! - [`connector`]: the vendor notification connector (C7), an outbound
//!   OAuth client that consumes a vendor notification websocket.
//! - [`engine`]: the realtime ingest and scoring engine (C5), the in-memory
//!   source of truth for call state, risk/sentiment scoring, and alerting.
//! - [`audio`]: the rolling live-audio buffer (C4).
//!
//! [`api`] exposes all of the above over HTTP/SSE (C8), and [`bootstrap`] is
//! the composition root that wires every component together for the
//! `telemetry-server` binary.

pub mod api;
pub mod audio;
pub mod audiohook;
pub mod bootstrap;
pub mod clock;
pub mod connector;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod retry;
pub mod status_store;
pub mod stream;
pub mod utils;

pub use api::{serve, AppState};
pub use audio::LiveAudioBuffer;
pub use audiohook::{AudioHookConfig, AudioHookContext};
pub use bootstrap::{bootstrap, BootstrapConfig, BootstrappedServices};
pub use clock::{Clock, SystemClock};
pub use connector::{Connector, ConnectorConfig};
pub use engine::{IngestEngine, ScoringConfig};
pub use error::{TelemetryError, TelemetryResult};
pub use events::EventBus;
pub use status_store::StatusStore;
