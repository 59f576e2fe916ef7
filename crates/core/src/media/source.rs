//! Frame sources consumed by the transmit worker.

use std::path::Path;

use super::{Frame, JPEG_EOI, JPEG_SOI};
use crate::error::{Result, StreamError};

/// Frames of this size or smaller are skipped when scanning concatenated JPEGs.
const MIN_SCANNED_FRAME: usize = 100;

/// Width of the length prefix in the length-prefixed container.
const LENGTH_PREFIX: usize = 5;

/// Upper bound on a length-prefixed frame.
const MAX_PREFIXED_FRAME: usize = 10 * 1024 * 1024;

/// Sequential supplier of encoded frames.
///
/// Owned and called by exactly one transmit worker at a time.
pub trait VideoSource: Send {
    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Number of frames handed out so far (1-based index of the last one).
    fn current_index(&self) -> usize;
}

/// In-memory source over a fixed list of frames.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    frames: Vec<Frame>,
    index: usize,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, index: 0 }
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }
}

impl VideoSource for MemorySource {
    fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.get(self.index)?.clone();
        self.index += 1;
        Some(frame)
    }

    fn current_index(&self) -> usize {
        self.index
    }
}

/// MJPEG file loaded fully into memory.
///
/// Two layouts are recognised:
///
/// 1. Concatenated JPEG images, split on `FFD8 … FFD9`.
/// 2. Length-prefixed frames: a 5-byte big-endian length followed by
///    the JPEG bytes.
///
/// The concatenated layout is tried first; the length-prefixed one only if
/// it yields nothing.
#[derive(Debug)]
pub struct MjpegFile {
    source: MemorySource,
}

impl MjpegFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let data = std::fs::read(path).map_err(|e| {
            tracing::warn!(file = %name, error = %e, "cannot read video file");
            StreamError::SourceNotFound(name.clone())
        })?;
        Self::from_bytes(&data).ok_or(StreamError::EmptySource(name))
    }

    /// Parse an in-memory container; `None` if no frame could be extracted.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (frames, layout) = match scan_concatenated(data) {
            frames if !frames.is_empty() => (frames, "concatenated"),
            _ => (scan_length_prefixed(data), "length-prefixed"),
        };
        if frames.is_empty() {
            return None;
        }
        tracing::info!(frames = frames.len(), layout, "video loaded");
        Some(Self {
            source: MemorySource::new(frames),
        })
    }

    pub fn total_frames(&self) -> usize {
        self.source.total_frames()
    }

    /// Rewind to the first frame.
    pub fn reset(&mut self) {
        self.source.index = 0;
    }

    /// Position so that the next call returns frame `index` (0-based).
    pub fn seek(&mut self, index: usize) -> bool {
        if index < self.source.total_frames() {
            self.source.index = index;
            true
        } else {
            tracing::warn!(index, total = self.source.total_frames(), "seek out of range");
            false
        }
    }
}

impl VideoSource for MjpegFile {
    fn next_frame(&mut self) -> Option<Frame> {
        self.source.next_frame()
    }

    fn current_index(&self) -> usize {
        self.source.current_index()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn scan_concatenated(data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some(start) = find(data, &JPEG_SOI, pos) {
        let Some(end) = find(data, &JPEG_EOI, start) else {
            tracing::warn!(offset = start, "incomplete frame at end of file");
            break;
        };
        let frame = &data[start..end + 2];
        if frame.len() > MIN_SCANNED_FRAME {
            frames.push(Frame::new(frame.to_vec()));
        } else {
            tracing::debug!(offset = start, len = frame.len(), "skipping undersized frame");
        }
        pos = end + 2;
    }
    frames
}

fn scan_length_prefixed(data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + LENGTH_PREFIX < data.len() {
        let len = data[pos..pos + LENGTH_PREFIX]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        if len == 0 || len > MAX_PREFIXED_FRAME {
            tracing::warn!(offset = pos, len, "invalid frame length");
            break;
        }
        let start = pos + LENGTH_PREFIX;
        let Some(frame) = data.get(start..start + len) else {
            tracing::warn!(offset = pos, "frame extends beyond end of file");
            break;
        };
        if Frame::has_jpeg_boundaries(frame) {
            frames.push(Frame::new(frame.to_vec()));
        } else {
            tracing::warn!(offset = pos, "invalid JPEG structure");
        }
        pos = start + len;
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(len: usize, fill: u8) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xD8];
        frame.extend(std::iter::repeat_n(fill, len - 4));
        frame.extend_from_slice(&[0xFF, 0xD9]);
        frame
    }

    #[test]
    fn memory_source_yields_in_order_then_ends() {
        let mut src = MemorySource::new(vec![Frame::new(vec![1]), Frame::new(vec![2])]);
        assert_eq!(src.current_index(), 0);
        assert_eq!(src.next_frame().unwrap().as_bytes(), &[1]);
        assert_eq!(src.next_frame().unwrap().as_bytes(), &[2]);
        assert_eq!(src.current_index(), 2);
        assert!(src.next_frame().is_none());
        assert_eq!(src.current_index(), 2);
    }

    #[test]
    fn scans_concatenated_jpegs() {
        let mut data = vec![0x00, 0x01];
        data.extend(jpeg(200, 0x11));
        data.extend(jpeg(300, 0x22));
        let mut file = MjpegFile::from_bytes(&data).unwrap();
        assert_eq!(file.total_frames(), 2);
        assert_eq!(file.next_frame().unwrap().len(), 200);
        assert_eq!(file.next_frame().unwrap().len(), 300);
        assert!(file.next_frame().is_none());
    }

    #[test]
    fn skips_undersized_concatenated_frames() {
        let mut data = jpeg(50, 0x11);
        data.extend(jpeg(150, 0x22));
        let file = MjpegFile::from_bytes(&data).unwrap();
        assert_eq!(file.total_frames(), 1);
    }

    #[test]
    fn falls_back_to_length_prefixed() {
        // Frames of 50 bytes are too small for the concatenated scan.
        let mut data = Vec::new();
        for fill in [0x10, 0x20, 0x30] {
            let frame = jpeg(50, fill);
            data.extend_from_slice(&(frame.len() as u64).to_be_bytes()[3..]);
            data.extend(frame);
        }
        let mut file = MjpegFile::from_bytes(&data).unwrap();
        assert_eq!(file.total_frames(), 3);
        assert_eq!(file.next_frame().unwrap().as_bytes()[2], 0x10);
    }

    #[test]
    fn rejects_data_without_frames() {
        assert!(MjpegFile::from_bytes(&[0u8; 64]).is_none());
    }

    #[test]
    fn seek_and_reset() {
        let data: Vec<u8> = (0..4).flat_map(|i| jpeg(120, i)).collect();
        let mut file = MjpegFile::from_bytes(&data).unwrap();
        assert!(file.seek(2));
        assert_eq!(file.next_frame().unwrap().as_bytes()[2], 2);
        assert_eq!(file.current_index(), 3);
        assert!(!file.seek(4));
        file.reset();
        assert_eq!(file.next_frame().unwrap().as_bytes()[2], 0);
    }

    #[test]
    fn open_missing_file_is_not_found() {
        assert!(matches!(
            MjpegFile::open("/definitely/not/here.mjpeg"),
            Err(StreamError::SourceNotFound(_))
        ));
    }
}
