//! Frame fragmentation and reassembly.
//!
//! The sender, not the network layer, decides datagram boundaries: a frame
//! larger than the safe payload is cut into consecutive chunks and only the
//! chunk holding the frame's final byte carries the marker bit.
//!
//! ```text
//! frame:   [FF D8 ........................................ FF D9]
//! chunks:  [  max_payload  ][  max_payload  ][  remainder  ]
//! marker:         0                0               1
//! ```
//!
//! The receiver concatenates payloads until a marker packet arrives. There
//! is no resequencing by RTP sequence number: chunks of one frame must
//! arrive in the order they were sent, otherwise the frame fails boundary
//! validation and is dropped.

use super::Frame;
use super::rtp::{HEADER_SIZE, RtpPacket};
use crate::error::{Result, StreamError};

/// Ethernet MTU.
pub const DEFAULT_MTU: usize = 1500;

/// IPv4 (20) + UDP (8) header bytes.
pub const IP_UDP_OVERHEAD: usize = 28;

/// `1500 - 28 - 12`.
pub const DEFAULT_MAX_PAYLOAD: usize = DEFAULT_MTU - IP_UDP_OVERHEAD - HEADER_SIZE;

/// Largest RTP payload that fits in one datagram of the given MTU.
pub fn max_payload_for_mtu(mtu: usize, overhead: usize) -> Result<usize> {
    match mtu.checked_sub(overhead + HEADER_SIZE) {
        Some(n) if n > 0 => Ok(n),
        _ => Err(StreamError::InvalidConfig(format!(
            "MTU {mtu} leaves no room for payload after {overhead}+{HEADER_SIZE} header bytes"
        ))),
    }
}

/// One contiguous slice of a frame, ready to become an RTP payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub payload: &'a [u8],
    /// Set only on the chunk that contains the frame's final byte.
    pub marker: bool,
}

/// Splits frames into chunks of at most `max_payload` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fragmenter {
    max_payload: usize,
}

impl Fragmenter {
    pub fn new(max_payload: usize) -> Result<Self> {
        if max_payload == 0 {
            return Err(StreamError::InvalidConfig(
                "max payload must be at least one byte".to_string(),
            ));
        }
        Ok(Self { max_payload })
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Chunks of `frame` in byte order. An empty frame yields no chunks.
    pub fn fragment<'a>(&self, frame: &'a [u8]) -> impl ExactSizeIterator<Item = Fragment<'a>> {
        let count = frame.len().div_ceil(self.max_payload);
        frame
            .chunks(self.max_payload)
            .enumerate()
            .map(move |(i, payload)| Fragment {
                payload,
                marker: i + 1 == count,
            })
    }
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Counters kept by a [`Reassembler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub packets: u64,
    pub frames: u64,
    /// Marker-terminated byte runs that failed JPEG boundary validation.
    pub discarded: u64,
}

/// Receive-side frame accumulator.
///
/// Holds a single in-progress buffer per stream. Every marker packet
/// resets the buffer, whether or not the accumulated bytes formed a
/// valid frame, so one corrupt frame never leaks into the next.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
    stats: ReassemblyStats,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet; returns a frame when a valid one completes.
    pub fn push(&mut self, packet: &RtpPacket) -> Option<Frame> {
        self.push_payload(packet.payload(), packet.marker())
    }

    /// Feed one payload chunk with its marker flag.
    pub fn push_payload(&mut self, payload: &[u8], marker: bool) -> Option<Frame> {
        self.stats.packets += 1;
        self.buffer.extend_from_slice(payload);
        if !marker {
            return None;
        }

        let bytes = std::mem::take(&mut self.buffer);
        if bytes.is_empty() {
            return None;
        }
        if Frame::has_jpeg_boundaries(&bytes) {
            self.stats.frames += 1;
            Some(Frame::new(bytes))
        } else {
            self.stats.discarded += 1;
            tracing::trace!(bytes = bytes.len(), "discarding frame with invalid JPEG boundaries");
            None
        }
    }

    /// Drop whatever has been accumulated so far.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for a marker packet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Adapt a live packet stream into a lazy stream of frames.
    pub fn frames<I>(self, packets: I) -> Frames<I::IntoIter>
    where
        I: IntoIterator<Item = RtpPacket>,
    {
        Frames {
            packets: packets.into_iter(),
            reassembler: self,
        }
    }
}

/// Iterator returned by [`Reassembler::frames`].
pub struct Frames<I> {
    packets: I,
    reassembler: Reassembler,
}

impl<I> Frames<I> {
    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }
}

impl<I: Iterator<Item = RtpPacket>> Iterator for Frames<I> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        for packet in self.packets.by_ref() {
            if let Some(frame) = self.reassembler.push(&packet) {
                return Some(frame);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpHeader;

    fn jpeg(len: usize) -> Vec<u8> {
        assert!(len >= 4);
        let mut frame = vec![0xFF, 0xD8];
        frame.extend((0..len - 4).map(|i| (i % 251) as u8));
        frame.extend_from_slice(&[0xFF, 0xD9]);
        frame
    }

    fn to_packets(fragmenter: &Fragmenter, frame: &[u8]) -> Vec<RtpPacket> {
        fragmenter
            .fragment(frame)
            .enumerate()
            .map(|(i, f)| {
                let header = RtpHeader::new(26, i as u16, 1).with_marker(f.marker);
                RtpPacket::decode(&RtpPacket::encode(&header, f.payload, Some(0))).unwrap()
            })
            .collect()
    }

    #[test]
    fn default_max_payload_is_1460() {
        assert_eq!(DEFAULT_MAX_PAYLOAD, 1460);
        assert_eq!(max_payload_for_mtu(1500, 28).unwrap(), 1460);
        assert!(max_payload_for_mtu(40, 28).is_err());
    }

    #[test]
    fn zero_max_payload_rejected() {
        assert!(Fragmenter::new(0).is_err());
    }

    #[test]
    fn small_frame_is_single_marked_chunk() {
        let f = Fragmenter::new(20).unwrap();
        let frame = jpeg(20);
        let chunks: Vec<_> = f.fragment(&frame).collect();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].marker);
        assert_eq!(chunks[0].payload, &frame[..]);
    }

    #[test]
    fn marker_only_on_last_chunk() {
        let f = Fragmenter::new(20).unwrap();
        for len in [21, 39, 40, 41, 100, 1000] {
            let frame = jpeg(len);
            let chunks: Vec<_> = f.fragment(&frame).collect();
            assert_eq!(chunks.len(), len.div_ceil(20), "len {len}");
            let (last, rest) = chunks.split_last().unwrap();
            assert!(last.marker);
            assert!(rest.iter().all(|c| !c.marker && c.payload.len() == 20));
            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.to_vec()).collect();
            assert_eq!(joined, frame);
        }
    }

    #[test]
    fn empty_frame_has_no_chunks() {
        let f = Fragmenter::default();
        assert_eq!(f.fragment(&[]).count(), 0);
    }

    #[test]
    fn reassembles_exact_multiple_of_payload() {
        let f = Fragmenter::new(25).unwrap();
        let frame = jpeg(100);
        let frames: Vec<_> = Reassembler::new().frames(to_packets(&f, &frame)).collect();
        assert_eq!(frames, vec![Frame::new(frame)]);
    }

    #[test]
    fn reassembles_consecutive_frames_in_order() {
        let f = Fragmenter::new(7).unwrap();
        let originals: Vec<Vec<u8>> = (4..40).map(jpeg).collect();
        let packets: Vec<RtpPacket> = originals.iter().flat_map(|fr| to_packets(&f, fr)).collect();
        let frames: Vec<Vec<u8>> = Reassembler::new()
            .frames(packets)
            .map(Frame::into_bytes)
            .collect();
        assert_eq!(frames, originals);
    }

    #[test]
    fn corrupt_frame_dropped_without_residue() {
        let mut r = Reassembler::new();
        assert!(r.push_payload(&[0xFF, 0xD8, 0x01], false).is_none());
        // Missing EOI: dropped at the marker.
        assert!(r.push_payload(&[0x02, 0x03], true).is_none());
        assert_eq!(r.pending(), 0);
        assert_eq!(r.stats().discarded, 1);

        let next = r.push_payload(&[0xFF, 0xD8, 0xFF, 0xD9], true).unwrap();
        assert_eq!(next.as_bytes(), &[0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(r.stats().frames, 1);
    }

    #[test]
    fn lost_first_fragment_drops_frame() {
        let f = Fragmenter::new(10).unwrap();
        let frame = jpeg(30);
        let mut packets = to_packets(&f, &frame);
        packets.remove(0);
        packets.extend(to_packets(&f, &frame));
        let frames: Vec<_> = Reassembler::new().frames(packets).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &frame[..]);
    }

    #[test]
    fn empty_marker_packet_is_ignored() {
        let mut r = Reassembler::new();
        assert!(r.push_payload(&[], true).is_none());
        assert_eq!(r.stats().discarded, 0);
    }
}
