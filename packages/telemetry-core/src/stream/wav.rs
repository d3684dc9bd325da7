use bytes::{BufMut, Bytes, BytesMut};

/// Builds a standards-compliant 44-byte PCM WAVE header for `data_len` bytes
/// of 16-bit little-endian samples.
///
/// Unlike a live-streaming header (which has no known final length and so
/// writes a sentinel size), this always knows its total byte count up front -
/// the live-audio buffer renders from a closed, already-persisted set of
/// chunk files.
pub fn create_wav_header(sample_rate: u32, channels: u16, data_len: u32) -> Bytes {
    create_wav_header_with_width(sample_rate, channels, 2, data_len)
}

/// Like [`create_wav_header`] but for an arbitrary `sample_width` (bytes/sample),
/// as produced by the live-audio buffer's generic chunk format.
pub fn create_wav_header_with_width(
    sample_rate: u32,
    channels: u16,
    sample_width: u16,
    data_len: u32,
) -> Bytes {
    let bits_per_sample = sample_width * 8;

    let mut header = BytesMut::with_capacity(44);

    let byte_rate = sample_rate * channels as u32 * sample_width as u32;
    let block_align = channels * sample_width;

    header.put_slice(b"RIFF");
    header.put_u32_le(36 + data_len);
    header.put_slice(b"WAVE");

    header.put_slice(b"fmt ");
    header.put_u32_le(16); // fmt chunk size
    header.put_u16_le(1); // audio format: PCM
    header.put_u16_le(channels);
    header.put_u32_le(sample_rate);
    header.put_u32_le(byte_rate);
    header.put_u16_le(block_align);
    header.put_u16_le(bits_per_sample);

    header.put_slice(b"data");
    header.put_u32_le(data_len);

    header.freeze()
}

/// Wraps `pcm` in a WAV container, prefixing it with a matching header.
pub fn wrap_pcm_as_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Bytes {
    let header = create_wav_header(sample_rate, channels, pcm.len() as u32);
    let mut buf = BytesMut::with_capacity(header.len() + pcm.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(pcm);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_reports_correct_finite_sizes() {
        let header = create_wav_header(16000, 1, 3200);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 36 + 3200);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 3200);
    }

    #[test]
    fn wrap_pcm_as_wav_prepends_matching_header() {
        let pcm = vec![0u8; 100];
        let wav = wrap_pcm_as_wav(&pcm, 8000, 1);
        assert_eq!(wav.len(), 44 + 100);
        assert_eq!(&wav[0..4], b"RIFF");
    }
}
