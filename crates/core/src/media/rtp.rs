use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, StreamError};

/// Size of the fixed RTP header in bytes.
pub const HEADER_SIZE: usize = 12;

/// The only RTP version this crate emits.
pub const RTP_VERSION: u8 = 2;

/// Video media clock (RFC 3551 §5), in ticks per second.
pub const CLOCK_RATE: u32 = 90_000;

/// RTP fixed header fields (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Fields wider than their wire slot are masked on [`write`](Self::write):
/// version to 2 bits, CSRC count to 4 bits, payload type to 7 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header with version 2, no padding/extension/CSRCs and a zero timestamp.
    pub fn new(payload_type: u8, sequence: u16, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type,
            sequence,
            timestamp: 0,
            ssrc,
        }
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Serialize to the 12-byte big-endian wire layout.
    pub fn write(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = ((self.version & 0x03) << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0x0f);
        header[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parse the 12-byte wire layout. No field is validated.
    pub fn read(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            version: bytes[0] >> 6,
            padding: (bytes[0] >> 5) & 1 == 1,
            extension: (bytes[0] >> 4) & 1 == 1,
            csrc_count: bytes[0] & 0x0f,
            marker: bytes[1] >> 7 == 1,
            payload_type: bytes[1] & 0x7f,
            sequence: u16::from_be_bytes([bytes[2], bytes[3]]),
            timestamp: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ssrc: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

/// Current wall-clock time as a 90 kHz tick count, truncated to 32 bits.
pub fn wallclock_timestamp() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    (secs * CLOCK_RATE as f64) as u64 as u32
}

/// A received or about-to-be-sent RTP packet: raw header plus opaque payload.
///
/// Accessors are pure bit extraction over the stored header bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    header: [u8; HEADER_SIZE],
    payload: Vec<u8>,
}

impl RtpPacket {
    /// Encode `header ‖ payload` into a datagram.
    ///
    /// When `timestamp` is `None`, the header's timestamp is replaced with
    /// [`wallclock_timestamp`].
    pub fn encode(header: &RtpHeader, payload: &[u8], timestamp: Option<u32>) -> Vec<u8> {
        let header = header.with_timestamp(timestamp.unwrap_or_else(wallclock_timestamp));
        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(&header.write());
        packet.extend_from_slice(payload);
        packet
    }

    /// Split a datagram into header and payload.
    ///
    /// Version, padding and CSRC fields are not checked. Inputs shorter than
    /// the header are rejected with [`StreamError::TruncatedPacket`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (header, payload) = bytes
            .split_first_chunk::<HEADER_SIZE>()
            .ok_or(StreamError::TruncatedPacket(bytes.len()))?;
        Ok(Self {
            header: *header,
            payload: payload.to_vec(),
        })
    }

    pub fn header(&self) -> RtpHeader {
        RtpHeader::read(&self.header)
    }

    pub fn version(&self) -> u8 {
        self.header[0] >> 6
    }

    pub fn padding(&self) -> bool {
        (self.header[0] >> 5) & 1 == 1
    }

    pub fn extension(&self) -> bool {
        (self.header[0] >> 4) & 1 == 1
    }

    pub fn csrc_count(&self) -> u8 {
        self.header[0] & 0x0f
    }

    pub fn marker(&self) -> bool {
        self.header[1] >> 7 == 1
    }

    /// Payload type with the marker bit masked out.
    pub fn payload_type(&self) -> u8 {
        self.header[1] & 0x7f
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.header[2], self.header[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([
            self.header[4],
            self.header[5],
            self.header[6],
            self.header[7],
        ])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([
            self.header[8],
            self.header[9],
            self.header[10],
            self.header[11],
        ])
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
