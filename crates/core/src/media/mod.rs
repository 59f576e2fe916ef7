//! Media framing and RTP packetization.
//!
//! This module converts encoded JPEG frames into RTP packets and back.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each frame is split into one or more RTP packets. Every packet carries a
//! 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping): one per packet, fragments included.
//! - **Timestamp** (32-bit): 90 kHz media clock, the frame fetch time.
//! - **SSRC** (32-bit): constant for the session.
//! - **Marker bit**: set on the packet holding the frame's final byte.
//!
//! Unlike RFC 2435 there is no JPEG payload header: the payload is the raw
//! slice of the frame, and receivers reassemble by concatenating payloads up
//! to the marker packet ([`fragment::Reassembler`]).

pub mod fragment;
pub mod mjpeg;
pub mod rtp;
pub mod source;

pub use fragment::{Fragmenter, Reassembler};
pub use mjpeg::MjpegPacketizer;
pub use source::{MemorySource, MjpegFile, VideoSource};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end-of-image marker.
pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// One complete encoded image.
///
/// Frames are immutable once built and move by value between the
/// components that own them in turn.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Whether the bytes start with SOI and end with EOI.
    pub fn has_jpeg_boundaries(bytes: &[u8]) -> bool {
        bytes.starts_with(&JPEG_SOI) && bytes.ends_with(&JPEG_EOI)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.0.len()).finish()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Codec-specific RTP packetizer.
///
/// Owns the per-session RTP state (sequence counter, SSRC) so that the
/// sequence continues across PAUSE/PLAY cycles of the transmit worker.
pub trait Packetizer: Send {
    /// Split one frame into complete RTP datagrams (header + payload).
    ///
    /// All packets of the frame carry `timestamp`; the sequence number
    /// advances by one per returned packet.
    fn packetize(&mut self, frame: &[u8], timestamp: u32) -> Vec<Vec<u8>>;

    /// Sequence number the next packet will carry.
    fn next_sequence(&self) -> u16;
}
