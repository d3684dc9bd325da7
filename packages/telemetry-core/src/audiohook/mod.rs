//! Genesys AudioHook websocket ingress (C6): accepts the vendor's audio
//! websocket, negotiates media, decodes and chunks PCM, and forwards audio
//! chunks and transcript events to the configured HTTP sinks (§4.4, §6).

pub mod chunker;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod forward;
pub mod framing;
pub mod header;
pub mod server;

pub use config::AudioHookConfig;
pub use connection::AudioHookConnection;
pub use server::{audiohook_router, bind_addr, parse_sink_url, AudioHookContext};
