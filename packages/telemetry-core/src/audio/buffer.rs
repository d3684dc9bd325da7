//! In-memory index + on-disk chunk files backing the rolling per-call audio window.
//!
//! Each call gets its own directory under `base_dir` holding one file per
//! retained PCM chunk (`{seq:09}_{chunk_id}.pcm`). The index (sequence,
//! sample/byte counts, timestamps) lives in memory, guarded by a per-call
//! mutex so concurrent calls never contend with each other's file IO.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::clock::Clock;
use crate::error::{TelemetryError, TelemetryResult};
use crate::stream::create_wav_header_with_width;
use crate::utils::sanitize_call_id;

/// The `(sample_rate, channels, sample_width)` triple a call's buffered chunks share.
///
/// A chunk arriving with a different triple than the call's current one resets
/// the whole buffer (state and files) before it is accepted - see
/// [`LiveAudioBuffer::append_pcm_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioFormat {
    sample_rate: u32,
    channels: u16,
    sample_width: u16,
}

/// One retained chunk's index entry.
#[derive(Debug, Clone)]
struct ChunkRecord {
    seq: u64,
    file_name: String,
    samples: u64,
    bytes: usize,
    occurred_at: DateTime<Utc>,
}

struct CallAudioState {
    format: AudioFormat,
    chunks: VecDeque<ChunkRecord>,
    total_samples: u64,
    next_seq: u64,
    last_chunk_id: Option<String>,
    updated_at: DateTime<Utc>,
}

impl CallAudioState {
    fn new(format: AudioFormat, now: DateTime<Utc>) -> Self {
        Self {
            format,
            chunks: VecDeque::new(),
            total_samples: 0,
            next_seq: 0,
            last_chunk_id: None,
            updated_at: now,
        }
    }
}

/// Read-only summary of a call's buffered audio, returned by [`LiveAudioBuffer::append_pcm_chunk`]
/// and [`LiveAudioBuffer::get_state`].
#[derive(Debug, Clone, Serialize)]
pub struct AudioStateSummary {
    pub available: bool,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
    pub chunk_count: usize,
    pub last_chunk_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AudioStateSummary {
    fn unavailable() -> Self {
        Self {
            available: false,
            duration_seconds: 0.0,
            sample_rate: 0,
            channels: 0,
            sample_width: 0,
            chunk_count: 0,
            last_chunk_id: None,
            updated_at: None,
        }
    }

    fn from_state(state: &CallAudioState) -> Self {
        let duration_seconds = if state.format.sample_rate > 0 {
            state.total_samples as f64 / state.format.sample_rate as f64
        } else {
            0.0
        };
        Self {
            available: true,
            duration_seconds,
            sample_rate: state.format.sample_rate,
            channels: state.format.channels,
            sample_width: state.format.sample_width,
            chunk_count: state.chunks.len(),
            last_chunk_id: state.last_chunk_id.clone(),
            updated_at: Some(state.updated_at),
        }
    }
}

/// The rolling per-call audio window (C4).
pub struct LiveAudioBuffer {
    base_dir: PathBuf,
    window_seconds: u64,
    max_chunk_bytes: usize,
    clock: Arc<dyn Clock>,
    calls: DashMap<String, Arc<Mutex<CallAudioState>>>,
}

impl LiveAudioBuffer {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        window_seconds: u64,
        max_chunk_bytes: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            window_seconds,
            max_chunk_bytes,
            clock,
            calls: DashMap::new(),
        }
    }

    fn call_dir(&self, sanitized_id: &str) -> PathBuf {
        self.base_dir.join(sanitized_id)
    }

    /// Appends one PCM chunk to `call_id`'s rolling window, resetting the
    /// buffer first if the format changed, and trimming chunks older than
    /// `window_seconds` once more than one chunk remains.
    pub fn append_pcm_chunk(
        &self,
        call_id: &str,
        pcm_bytes: &[u8],
        sample_rate: u32,
        channels: u16,
        sample_width: u16,
        chunk_id: Option<&str>,
        occurred_at: Option<DateTime<Utc>>,
    ) -> TelemetryResult<AudioStateSummary> {
        if pcm_bytes.is_empty() {
            return Err(TelemetryError::ClientError("pcm_bytes must not be empty".into()));
        }
        if pcm_bytes.len() > self.max_chunk_bytes {
            return Err(TelemetryError::ClientError(format!(
                "chunk of {} bytes exceeds max_chunk_bytes ({})",
                pcm_bytes.len(),
                self.max_chunk_bytes
            )));
        }
        if sample_rate == 0 || channels == 0 || sample_width == 0 {
            return Err(TelemetryError::ClientError(
                "sample_rate, channels, and sample_width must be positive".into(),
            ));
        }

        let sanitized_id = sanitize_call_id(call_id);
        let call_dir = self.call_dir(&sanitized_id);
        let now = occurred_at.unwrap_or_else(|| self.clock.now_utc());
        let format = AudioFormat {
            sample_rate,
            channels,
            sample_width,
        };

        let entry = self
            .calls
            .entry(sanitized_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CallAudioState::new(format, now))))
            .clone();
        let mut state = entry.lock();

        if state.format != format && !state.chunks.is_empty() {
            self.reset_locked(&mut state, &call_dir, format, now);
        } else if state.chunks.is_empty() {
            *state = CallAudioState::new(format, now);
        }

        std::fs::create_dir_all(&call_dir)?;

        let samples = pcm_bytes.len() as u64 / (channels as u64 * sample_width as u64);
        let seq = state.next_seq;
        state.next_seq += 1;
        let chunk_id = chunk_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("auto{seq}"));
        let file_name = format!("{seq:09}_{chunk_id}.pcm");
        std::fs::write(call_dir.join(&file_name), pcm_bytes)?;

        state.chunks.push_back(ChunkRecord {
            seq,
            file_name,
            samples,
            bytes: pcm_bytes.len(),
            occurred_at: now,
        });
        state.total_samples += samples;
        state.last_chunk_id = Some(chunk_id);
        state.updated_at = now;

        let window_samples = self.window_seconds * sample_rate as u64;
        while state.total_samples > window_samples && state.chunks.len() > 1 {
            if let Some(oldest) = state.chunks.pop_front() {
                state.total_samples = state.total_samples.saturating_sub(oldest.samples);
                let path = call_dir.join(&oldest.file_name);
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!(call_id = %sanitized_id, file = %path.display(), error = %err, "failed to delete trimmed audio chunk");
                }
            }
        }

        Ok(AudioStateSummary::from_state(&state))
    }

    /// Deletes every chunk file and resets the in-memory state for a format change.
    fn reset_locked(
        &self,
        state: &mut CallAudioState,
        call_dir: &std::path::Path,
        format: AudioFormat,
        now: DateTime<Utc>,
    ) {
        for chunk in state.chunks.drain(..) {
            let path = call_dir.join(&chunk.file_name);
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %path.display(), error = %err, "failed to delete chunk during format-change reset");
                }
            }
        }
        *state = CallAudioState::new(format, now);
    }

    /// Returns the current state summary for `call_id`, or an unavailable summary
    /// if nothing has been buffered yet.
    pub fn get_state(&self, call_id: &str) -> AudioStateSummary {
        let sanitized_id = sanitize_call_id(call_id);
        match self.calls.get(&sanitized_id) {
            Some(entry) => {
                let state = entry.lock();
                if state.chunks.is_empty() {
                    AudioStateSummary::unavailable()
                } else {
                    AudioStateSummary::from_state(&state)
                }
            }
            None => AudioStateSummary::unavailable(),
        }
    }

    /// Renders the buffered chunks for `call_id` as a WAV byte stream, optionally
    /// truncated to the most recent `max_seconds` of audio. Returns `None` if
    /// nothing has been buffered.
    pub fn get_wav_bytes(&self, call_id: &str, max_seconds: Option<u64>) -> TelemetryResult<Option<Vec<u8>>> {
        let sanitized_id = sanitize_call_id(call_id);
        let Some(entry) = self.calls.get(&sanitized_id) else {
            return Ok(None);
        };
        let (call_dir, format, chunks) = {
            let state = entry.lock();
            if state.chunks.is_empty() {
                return Ok(None);
            }
            (
                self.call_dir(&sanitized_id),
                state.format,
                state.chunks.clone(),
            )
        };

        let max_samples = max_seconds.map(|secs| secs * format.sample_rate as u64);
        let selected = select_chunks_for_window(&chunks, max_samples);

        let mut pcm = Vec::new();
        for (chunk, skip_samples) in &selected {
            let path = call_dir.join(&chunk.file_name);
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let skip_bytes = (*skip_samples as usize) * format.channels as usize * format.sample_width as usize;
                    if skip_bytes < bytes.len() {
                        pcm.extend_from_slice(&bytes[skip_bytes..]);
                    }
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "failed to read audio chunk while rendering WAV; skipping");
                }
            }
        }

        let header = create_wav_header_with_width(
            format.sample_rate,
            format.channels,
            format.sample_width,
            pcm.len() as u32,
        );
        let mut wav = Vec::with_capacity(header.len() + pcm.len());
        wav.extend_from_slice(&header);
        wav.extend_from_slice(&pcm);
        Ok(Some(wav))
    }

    /// Whether anything has ever been buffered for `call_id`.
    pub fn has_call(&self, call_id: &str) -> bool {
        let sanitized_id = sanitize_call_id(call_id);
        self.calls
            .get(&sanitized_id)
            .map(|entry| !entry.lock().chunks.is_empty())
            .unwrap_or(false)
    }
}

/// Picks the ordered subset of `chunks` needed to cover the most recent
/// `max_samples` (oldest-to-newest order, as stored), returning each chosen
/// chunk paired with how many leading samples within it to skip. `None`
/// means "no limit" - every chunk is returned unskipped.
fn select_chunks_for_window(
    chunks: &VecDeque<ChunkRecord>,
    max_samples: Option<u64>,
) -> Vec<(ChunkRecord, u64)> {
    let Some(max_samples) = max_samples else {
        return chunks.iter().cloned().map(|c| (c, 0)).collect();
    };
    if max_samples == 0 {
        return Vec::new();
    }

    let mut picked: Vec<(ChunkRecord, u64)> = Vec::new();
    let mut accumulated = 0u64;
    for chunk in chunks.iter().rev() {
        if accumulated >= max_samples {
            break;
        }
        let remaining = max_samples - accumulated;
        let skip = chunk.samples.saturating_sub(remaining);
        accumulated += chunk.samples.min(remaining);
        picked.push((chunk.clone(), skip));
    }
    picked.reverse();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn buffer(window_seconds: u64) -> (tempfile::TempDir, LiveAudioBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(1_700_000_000_000));
        let buf = LiveAudioBuffer::new(dir.path(), window_seconds, 2_000_000, clock);
        (dir, buf)
    }

    #[test]
    fn rejects_empty_payload() {
        let (_dir, buf) = buffer(60);
        let err = buf
            .append_pcm_chunk("call-1", &[], 8000, 1, 2, None, None)
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ClientError(_)));
    }

    #[test]
    fn rejects_oversized_payload() {
        let (_dir, buf) = buffer(60);
        let big = vec![0u8; 3_000_000];
        let err = buf
            .append_pcm_chunk("call-1", &big, 8000, 1, 2, None, None)
            .unwrap_err();
        assert!(matches!(err, TelemetryError::ClientError(_)));
    }

    #[test]
    fn tracks_total_samples_across_chunks() {
        let (_dir, buf) = buffer(300);
        let chunk = vec![0u8; 1600]; // 800 samples at 2 bytes/sample mono
        let summary = buf
            .append_pcm_chunk("call-1", &chunk, 8000, 1, 2, Some("a"), None)
            .unwrap();
        assert_eq!(summary.chunk_count, 1);
        assert!((summary.duration_seconds - 0.1).abs() < 1e-9);

        let summary = buf
            .append_pcm_chunk("call-1", &chunk, 8000, 1, 2, Some("b"), None)
            .unwrap();
        assert_eq!(summary.chunk_count, 2);
        assert!((summary.duration_seconds - 0.2).abs() < 1e-9);
    }

    #[test]
    fn trims_oldest_chunks_past_the_window() {
        let (dir, buf) = buffer(1); // 1 second window at 8kHz mono = 8000 samples = 16000 bytes
        let chunk = vec![0u8; 16000]; // exactly one window's worth
        buf.append_pcm_chunk("call-1", &chunk, 8000, 1, 2, Some("a"), None)
            .unwrap();
        let summary = buf
            .append_pcm_chunk("call-1", &chunk, 8000, 1, 2, Some("b"), None)
            .unwrap();

        // Oldest chunk should have been trimmed since more than one chunk remained
        // and total_samples exceeded the window.
        assert_eq!(summary.chunk_count, 1);
        let call_dir = dir.path().join("call-1");
        let remaining: Vec<_> = std::fs::read_dir(&call_dir).unwrap().collect();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn format_change_resets_buffer_and_deletes_old_files() {
        let (dir, buf) = buffer(300);
        let chunk_8k = vec![0u8; 1600];
        buf.append_pcm_chunk("call-1", &chunk_8k, 8000, 1, 2, Some("a"), None)
            .unwrap();
        let call_dir = dir.path().join("call-1");
        let first_file = std::fs::read_dir(&call_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert!(first_file.exists());

        let chunk_16k = vec![0u8; 6400]; // 16kHz stereo 2-byte: 1600 samples
        let summary = buf
            .append_pcm_chunk("call-1", &chunk_16k, 16000, 2, 2, Some("b"), None)
            .unwrap();

        assert_eq!(summary.chunk_count, 1);
        assert_eq!(summary.sample_rate, 16000);
        assert_eq!(summary.channels, 2);
        assert!(!first_file.exists());
    }

    #[test]
    fn get_state_is_unavailable_for_unknown_call() {
        let (_dir, buf) = buffer(300);
        let summary = buf.get_state("nonexistent");
        assert!(!summary.available);
    }

    #[test]
    fn get_wav_bytes_concatenates_chunks_in_order() {
        let (_dir, buf) = buffer(300);
        let chunk_a = vec![1u8; 1600];
        let chunk_b = vec![2u8; 1600];
        buf.append_pcm_chunk("call-1", &chunk_a, 8000, 1, 2, Some("a"), None)
            .unwrap();
        buf.append_pcm_chunk("call-1", &chunk_b, 8000, 1, 2, Some("b"), None)
            .unwrap();

        let wav = buf.get_wav_bytes("call-1", None).unwrap().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 3200);
        assert_eq!(wav[44], 1);
        assert_eq!(wav[44 + 1600], 2);
    }

    #[test]
    fn get_wav_bytes_truncates_to_most_recent_seconds() {
        let (_dir, buf) = buffer(300);
        let chunk_a = vec![1u8; 16000]; // 1 second at 8kHz mono
        let chunk_b = vec![2u8; 8000]; // 0.5 second
        buf.append_pcm_chunk("call-1", &chunk_a, 8000, 1, 2, Some("a"), None)
            .unwrap();
        buf.append_pcm_chunk("call-1", &chunk_b, 8000, 1, 2, Some("b"), None)
            .unwrap();

        // Ask for only the most recent 0.5s - should be entirely chunk_b.
        let wav = buf.get_wav_bytes("call-1", Some(0)).unwrap().unwrap();
        assert_eq!(wav.len(), 44); // 0 seconds -> no data

        let wav = buf.get_wav_bytes("call-1", None).unwrap().unwrap();
        assert_eq!(wav.len(), 44 + 24000);
    }

    #[test]
    fn get_wav_bytes_returns_none_for_unknown_call() {
        let (_dir, buf) = buffer(300);
        assert!(buf.get_wav_bytes("nonexistent", None).unwrap().is_none());
    }
}
