//! MJPEG RTP packetizer.
//!
//! - Each JPEG frame maps to one or more RTP packets.
//! - Payload is the raw JPEG byte slice (no RFC 2435 JPEG header); the
//!   receiver validates SOI/EOI after reassembly.
//! - Uses static payload type 26 and the 90 kHz video clock.

use super::Packetizer;
use super::fragment::Fragmenter;
use super::rtp::{RtpHeader, RtpPacket};

/// Static RTP payload type for JPEG video (RFC 3551).
pub const MJPEG_PAYLOAD_TYPE: u8 = 26;

/// Synchronization source used when none is configured.
pub const DEFAULT_SSRC: u32 = 0x1234_5678;

/// JPEG RTP packetizer.
///
/// Holds the session-wide RTP state:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet,
///   fragments included.
/// - **SSRC**: fixed for the session.
#[derive(Debug)]
pub struct MjpegPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    fragmenter: Fragmenter,
}

impl MjpegPacketizer {
    pub fn new(ssrc: u32, fragmenter: Fragmenter) -> Self {
        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            max_payload = fragmenter.max_payload(),
            "MJPEG packetizer created"
        );
        Self {
            payload_type: MJPEG_PAYLOAD_TYPE,
            ssrc,
            sequence: 0,
            fragmenter,
        }
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type & 0x7f;
        self
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Build the header for the next packet and advance the sequence number.
    fn next_header(&mut self, marker: bool, timestamp: u32) -> RtpHeader {
        let header = RtpHeader::new(self.payload_type, self.sequence, self.ssrc)
            .with_marker(marker)
            .with_timestamp(timestamp);
        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}

impl Packetizer for MjpegPacketizer {
    fn packetize(&mut self, frame: &[u8], timestamp: u32) -> Vec<Vec<u8>> {
        let fragmenter = self.fragmenter;
        fragmenter
            .fragment(frame)
            .map(|fragment| {
                let header = self.next_header(fragment.marker, timestamp);
                RtpPacket::encode(&header, fragment.payload, Some(timestamp))
            })
            .collect()
    }

    fn next_sequence(&self) -> u16 {
        self.sequence
    }
}
