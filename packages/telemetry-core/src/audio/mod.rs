//! Rolling live-audio buffer (C4): per-call, sample-format-aware, byte-bounded,
//! render-to-WAV on demand.

pub mod buffer;

pub use buffer::{AudioStateSummary, LiveAudioBuffer};
