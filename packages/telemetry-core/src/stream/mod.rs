//! WAV container helpers used when rendering buffered audio to clients.

pub mod wav;

pub use wav::{create_wav_header, create_wav_header_with_width, wrap_pcm_as_wav};
