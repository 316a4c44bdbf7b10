//! RTP packet structure and serialization.
//!
//! Implements the RFC 3550 fixed header. Room audio travels as L16
//! (RFC 3551: big-endian signed 16-bit PCM) at 16kHz mono under a dynamic
//! payload type.

use anyhow::Result;

/// RTP packet version 2 (as per RFC 3550)
const RTP_VERSION: u8 = 2;

/// Fixed header length in bytes.
const HEADER_LEN: usize = 12;

/// Dynamic payload type carrying L16/16000/1.
pub const PAYLOAD_TYPE_L16: u8 = 97;

/// RTP packet for audio transmission.
///
/// # Protocol Details
///
/// - Version: Always 2 (RFC 3550)
/// - Payload Type: 97 (dynamic assignment for L16 mono 16kHz)
/// - Sequence: Increments by 1 for each packet
/// - Timestamp: Increments by the samples carried (160 for 10ms @ 16kHz)
/// - Marker: Set on the first packet after a silence gap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    // ---
    /// Marker bit
    pub marker: bool,

    /// Payload type (7 bits)
    pub payload_type: u8,

    /// Packet sequence number (wraps at 65535)
    pub sequence: u16,

    /// RTP timestamp in sample units
    pub timestamp: u32,

    /// Synchronization source identifier
    pub ssrc: u32,

    /// Audio payload
    pub payload: Vec<u8>,
}

impl RtpPacket {
    // ---
    /// Creates an L16 packet without the marker bit.
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32, payload: Vec<u8>) -> Self {
        // ---
        Self {
            marker: false,
            payload_type: PAYLOAD_TYPE_L16,
            sequence,
            timestamp,
            ssrc,
            payload,
        }
    }

    /// Creates an L16 packet from PCM samples.
    pub fn from_samples(sequence: u16, timestamp: u32, ssrc: u32, samples: &[i16]) -> Self {
        // ---
        Self::new(sequence, timestamp, ssrc, encode_l16(samples))
    }

    /// Serializes the packet into wire format.
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |                           payload...                          |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        // ---
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());

        // P=0, X=0, CC=0
        buf.push(RTP_VERSION << 6);
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Deserializes a packet from wire format.
    ///
    /// CSRC entries and header extensions are skipped; trailing padding is
    /// stripped from the payload.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Packet is smaller than its declared header
    /// - RTP version is not 2
    /// - Padding length exceeds the payload
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < HEADER_LEN {
            anyhow::bail!("packet too small: {} bytes", data.len());
        }

        let version = (data[0] >> 6) & 0x03;
        if version != RTP_VERSION {
            anyhow::bail!("invalid RTP version: {}", version);
        }

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = HEADER_LEN + csrc_count * 4;
        if has_extension {
            if data.len() < offset + 4 {
                anyhow::bail!("truncated header extension");
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }
        if data.len() < offset {
            anyhow::bail!("packet too small for header: {} < {}", data.len(), offset);
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                anyhow::bail!("invalid padding length: {}", pad);
            }
            end -= pad;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: data[offset..end].to_vec(),
        })
    }
}

/// Encodes samples as L16 network byte order.
pub fn encode_l16(samples: &[i16]) -> Vec<u8> {
    // ---
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

/// Converts an L16 payload to little-endian PCM16 bytes. A trailing odd
/// byte is dropped.
pub fn l16_to_le_bytes(payload: &[u8]) -> Vec<u8> {
    // ---
    payload
        .chunks_exact(2)
        .flat_map(|pair| [pair[1], pair[0]])
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_rtp_packet_serialization() {
        // ---
        let packet = RtpPacket::new(100, 32000, 0x12345678, vec![1, 2, 3, 4]);
        let serialized = packet.serialize();

        assert_eq!(serialized[0] >> 6, 2); // Version
        assert_eq!(serialized[1] & 0x7F, PAYLOAD_TYPE_L16);
        assert_eq!(serialized[1] & 0x80, 0); // Marker
        assert_eq!(u16::from_be_bytes([serialized[2], serialized[3]]), 100);
        assert_eq!(&serialized[12..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_marker_bit_survives() {
        // ---
        let mut packet = RtpPacket::new(200, 64000, 0xAABBCCDD, vec![5, 6]);
        packet.marker = true;

        let parsed = RtpPacket::deserialize(&packet.serialize()).expect("valid packet");
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_rtp_packet_too_small() {
        // ---
        assert!(RtpPacket::deserialize(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_rtp_invalid_version() {
        // ---
        let mut data = vec![0; 12];
        data[0] = 1 << 6;

        assert!(RtpPacket::deserialize(&data).is_err());
    }

    #[test]
    fn test_csrc_and_extension_are_skipped() {
        // ---
        let mut data = vec![0x80 | 0x10 | 0x02, PAYLOAD_TYPE_L16];
        data.extend_from_slice(&7u16.to_be_bytes());
        data.extend_from_slice(&160u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0xAA; 8]); // two CSRCs
        data.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // one extension word
        data.extend_from_slice(&[0xFF; 4]);
        data.extend_from_slice(&[9, 8]);

        let packet = RtpPacket::deserialize(&data).expect("valid packet");
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.payload, vec![9, 8]);
    }

    #[test]
    fn test_padding_is_stripped() {
        // ---
        let mut data = RtpPacket::new(1, 0, 0, vec![1, 2, 0, 0, 3]).serialize();
        data[0] |= 0x20;

        let packet = RtpPacket::deserialize(&data).expect("valid packet");
        assert_eq!(packet.payload, vec![1, 2]);
    }

    #[test]
    fn test_bogus_padding_rejected() {
        // ---
        let mut data = RtpPacket::new(1, 0, 0, vec![1, 2, 40]).serialize();
        data[0] |= 0x20;

        assert!(RtpPacket::deserialize(&data).is_err());
    }

    #[test]
    fn test_l16_byte_order() {
        // ---
        let packet = RtpPacket::from_samples(0, 0, 0, &[0x0102, -2]);
        assert_eq!(packet.payload, vec![0x01, 0x02, 0xFF, 0xFE]);
        assert_eq!(
            l16_to_le_bytes(&packet.payload),
            vec![0x02, 0x01, 0xFE, 0xFF]
        );
    }

    #[test]
    fn test_sequence_wraparound() {
        // ---
        let packet = RtpPacket::new(65535, 0, 0, vec![]);
        let parsed = RtpPacket::deserialize(&packet.serialize()).expect("valid packet");

        assert_eq!(parsed.sequence, 65535);
    }
}
