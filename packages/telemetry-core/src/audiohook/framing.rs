//! Binary packet framing for AudioHook websocket messages (§4.4).
//!
//! ```text
//! byte 0:    type (0x01 = command JSON, 0x10 = audio)
//! bytes 1-3: 24-bit big-endian payload length N (max 0xFFFFFF)
//! bytes 4..N+3: payload
//! ```
//! A message is a concatenation of packets. Decoding stops silently at a
//! truncated or malformed trailing packet rather than erroring - a partial
//! final packet is not unusual at a buffer boundary.

/// Packet type tag for a JSON command payload.
pub const PACKET_TYPE_COMMAND: u8 = 0x01;

/// Packet type tag for a raw audio payload.
pub const PACKET_TYPE_AUDIO: u8 = 0x10;

/// One decoded packet: its type tag and payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    pub packet_type: u8,
    pub payload: &'a [u8],
}

/// Decodes `bytes` into a sequence of packets, stopping at the first
/// incomplete trailing packet (I6: lossless round trip for well-formed input).
pub fn decode_packets(bytes: &[u8]) -> Vec<Packet<'_>> {
    let mut packets = Vec::new();
    let mut offset = 0usize;

    while offset + 4 <= bytes.len() {
        let packet_type = bytes[offset];
        let len = u32::from_be_bytes([0, bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as usize;
        let payload_start = offset + 4;
        let payload_end = payload_start + len;
        if payload_end > bytes.len() {
            break;
        }
        packets.push(Packet {
            packet_type,
            payload: &bytes[payload_start..payload_end],
        });
        offset = payload_end;
    }

    packets
}

/// Encodes a single packet (used by tests and any echo/loopback tooling).
pub fn encode_packet(packet_type: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(0x00FF_FFFF) as u32;
    let len_bytes = len.to_be_bytes();
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(packet_type);
    out.extend_from_slice(&len_bytes[1..4]);
    out.extend_from_slice(&payload[..len as usize]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_command_packet() {
        let encoded = encode_packet(PACKET_TYPE_COMMAND, b"{\"type\":\"ping\"}");
        let decoded = decode_packets(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].packet_type, PACKET_TYPE_COMMAND);
        assert_eq!(decoded[0].payload, b"{\"type\":\"ping\"}");
    }

    #[test]
    fn decodes_a_concatenation_of_command_and_audio_packets() {
        let mut buf = encode_packet(PACKET_TYPE_COMMAND, b"{}");
        buf.extend(encode_packet(PACKET_TYPE_AUDIO, &[1, 2, 3, 4]));
        buf.extend(encode_packet(PACKET_TYPE_COMMAND, b"{\"type\":\"close\"}"));

        let decoded = decode_packets(&buf);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].packet_type, PACKET_TYPE_AUDIO);
        assert_eq!(decoded[1].payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn stops_silently_at_a_truncated_trailing_packet() {
        let mut buf = encode_packet(PACKET_TYPE_COMMAND, b"{}");
        buf.extend_from_slice(&[PACKET_TYPE_AUDIO, 0x00, 0x00, 0x10]); // header claims 16 bytes, none follow
        let decoded = decode_packets(&buf);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn stops_silently_on_an_incomplete_header() {
        let decoded = decode_packets(&[PACKET_TYPE_COMMAND, 0x00]);
        assert!(decoded.is_empty());
    }

    #[test]
    fn empty_payload_packet_decodes_cleanly() {
        let encoded = encode_packet(PACKET_TYPE_COMMAND, b"");
        let decoded = decode_packets(&encoded);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].payload.is_empty());
    }
}
