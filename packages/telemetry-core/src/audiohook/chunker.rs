//! Flush-policy arithmetic for the per-connection PCM buffer (§4.4 Chunking).

/// Derived byte thresholds for one connection's media format.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub bytes_per_second: u64,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub flush_interval_ms: u64,
}

impl FlushPolicy {
    pub fn new(sample_rate: u32, channels: u16, flush_interval_ms: u64, min_chunk_duration_ms: u64, max_chunk_duration_ms: u64) -> Self {
        let bytes_per_second = sample_rate as u64 * channels as u64 * 2;
        let min_bytes = ((bytes_per_second as f64) * (min_chunk_duration_ms as f64) / 1000.0) as usize;
        let max_bytes = ((bytes_per_second as f64) * (max_chunk_duration_ms as f64) / 1000.0).max(2.0) as usize;
        Self {
            bytes_per_second,
            min_bytes,
            max_bytes,
            flush_interval_ms,
        }
    }

    /// Whether a time- or size-based flush should trigger right now.
    pub fn should_flush(&self, buffered_bytes: usize, elapsed_since_last_flush_ms: u64) -> bool {
        buffered_bytes > 0 && (elapsed_since_last_flush_ms >= self.flush_interval_ms || buffered_bytes >= self.min_bytes)
    }
}

/// Splits `buffer` into chunks of at most `max_bytes` each, in order.
/// A forced flush (socket close/error) calls this against the whole buffer
/// regardless of `min_bytes`; a normal flush calls it against whatever is
/// currently buffered once [`FlushPolicy::should_flush`] says to go.
pub fn split_into_chunks(buffer: &[u8], max_bytes: usize) -> Vec<Vec<u8>> {
    if buffer.is_empty() {
        return Vec::new();
    }
    let max_bytes = max_bytes.max(2);
    buffer.chunks(max_bytes).map(<[u8]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_byte_thresholds_from_sample_rate_and_channels() {
        let policy = FlushPolicy::new(8000, 1, 750, 300, 2000);
        assert_eq!(policy.bytes_per_second, 16000);
        assert_eq!(policy.min_bytes, 4800);
        assert_eq!(policy.max_bytes, 32000);
    }

    #[test]
    fn flushes_when_buffer_crosses_min_bytes_even_before_the_interval() {
        let policy = FlushPolicy::new(8000, 1, 750, 300, 2000);
        assert!(policy.should_flush(4800, 50));
        assert!(!policy.should_flush(100, 50));
    }

    #[test]
    fn flushes_on_elapsed_interval_even_with_little_buffered() {
        let policy = FlushPolicy::new(8000, 1, 750, 300, 2000);
        assert!(policy.should_flush(10, 800));
    }

    #[test]
    fn never_flushes_an_empty_buffer() {
        let policy = FlushPolicy::new(8000, 1, 750, 300, 2000);
        assert!(!policy.should_flush(0, 10_000));
    }

    #[test]
    fn splits_oversized_buffer_into_capped_chunks() {
        let buffer = vec![7u8; 100];
        let chunks = split_into_chunks(&buffer, 30);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 30);
        assert_eq!(chunks.last().unwrap().len(), 10);
    }

    #[test]
    fn single_chunk_when_under_max_bytes() {
        let buffer = vec![1u8; 16000];
        let chunks = split_into_chunks(&buffer, 32000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 16000);
    }
}
