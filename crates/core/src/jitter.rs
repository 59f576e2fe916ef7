//! Receive-side jitter buffer.
//!
//! A FIFO of complete frames gated by a buffering flag:
//!
//! ```text
//!              size >= high
//!  BUFFERING ---------------> PLAYING
//!      ^                         |
//!      +-------------------------+
//!              size <= low (underrun)
//! ```
//!
//! While buffering, [`JitterBuffer::try_pop`] returns nothing even when
//! frames are queued, so playback only starts (and resumes after an
//! underrun) with a full cushion of frames.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::media::Frame;

/// Frames queued before playback starts.
pub const DEFAULT_HIGH_THRESHOLD: usize = 40;

/// Default bound on queued frames.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Thresholds and capacity policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterConfig {
    /// Queue size at which BUFFERING switches to PLAYING.
    pub high_threshold: usize,
    /// Queue size at or below which PLAYING falls back to BUFFERING.
    pub low_threshold: usize,
    /// Maximum queued frames; the oldest frame is evicted on overflow.
    /// `None` leaves the queue unbounded.
    pub capacity: Option<usize>,
}

impl JitterConfig {
    pub fn with_high_threshold(high_threshold: usize) -> Self {
        Self {
            high_threshold,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.high_threshold == 0 {
            return Err(StreamError::InvalidConfig(
                "high threshold must be at least 1".to_string(),
            ));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(StreamError::InvalidConfig(format!(
                "low threshold {} must be below high threshold {}",
                self.low_threshold, self.high_threshold
            )));
        }
        if let Some(capacity) = self.capacity
            && capacity < self.high_threshold
        {
            return Err(StreamError::InvalidConfig(format!(
                "capacity {capacity} is smaller than high threshold {}",
                self.high_threshold
            )));
        }
        Ok(())
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            low_threshold: 0,
            capacity: Some(DEFAULT_CAPACITY),
        }
    }
}

/// Counters kept by a [`JitterBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub pushed: u64,
    pub popped: u64,
    /// Frames evicted because the queue was at capacity.
    pub overflow: u64,
    /// PLAYING → BUFFERING transitions.
    pub underruns: u64,
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Frame>,
    buffering: bool,
    stats: JitterStats,
}

/// Thread-safe, threshold-gated frame queue.
///
/// Cloning shares the same queue, so one clone can live in the receive
/// worker (producer) and another in the display loop (consumer) without
/// any external locking.
#[derive(Clone)]
pub struct JitterBuffer {
    config: Arc<JitterConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl JitterBuffer {
    pub fn new(config: JitterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                buffering: true,
                stats: JitterStats::default(),
            })),
        })
    }

    pub fn config(&self) -> &JitterConfig {
        &self.config
    }

    /// Append a frame, evicting the oldest one if at capacity.
    pub fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if let Some(capacity) = self.config.capacity
            && inner.queue.len() >= capacity
        {
            inner.queue.pop_front();
            inner.stats.overflow += 1;
            tracing::debug!(capacity, "jitter buffer full, evicted oldest frame");
        }
        inner.queue.push_back(frame);
        inner.stats.pushed += 1;

        if inner.buffering && inner.queue.len() >= self.config.high_threshold {
            inner.buffering = false;
            tracing::debug!(size = inner.queue.len(), "jitter buffer filled, playing");
        }
    }

    /// Pop the oldest frame, unless buffering.
    ///
    /// Popping down to the low threshold (or finding the queue there)
    /// switches back to buffering.
    pub fn try_pop(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        if inner.buffering {
            return None;
        }
        let frame = inner.queue.pop_front();
        if frame.is_some() {
            inner.stats.popped += 1;
        }
        if inner.queue.len() <= self.config.low_threshold {
            inner.buffering = true;
            inner.stats.underruns += 1;
            tracing::debug!(size = inner.queue.len(), "jitter buffer underrun, buffering");
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_buffering(&self) -> bool {
        self.inner.lock().buffering
    }

    /// Drop every queued frame and return to buffering.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.buffering = true;
    }

    /// Take every queued frame, oldest first, ignoring the thresholds.
    /// Used to flush the tail of a stream that ended below the high mark.
    pub fn drain(&self) -> Vec<Frame> {
        let mut inner = self.inner.lock();
        inner.buffering = true;
        let frames: Vec<Frame> = inner.queue.drain(..).collect();
        inner.stats.popped += frames.len() as u64;
        frames
    }

    pub fn stats(&self) -> JitterStats {
        self.inner.lock().stats
    }
}

impl std::fmt::Debug for JitterBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JitterBuffer")
            .field("len", &inner.queue.len())
            .field("buffering", &inner.buffering)
            .field("config", &*self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(n: u8) -> Frame {
        Frame::new(vec![0xFF, 0xD8, n, 0xFF, 0xD9])
    }

    fn buffer(high: usize) -> JitterBuffer {
        JitterBuffer::new(JitterConfig::with_high_threshold(high)).unwrap()
    }

    #[test]
    fn hysteresis() {
        let jb = buffer(5);
        assert!(jb.is_buffering());

        for n in 0..4 {
            jb.push(frame(n));
        }
        assert!(jb.is_buffering());
        assert!(jb.try_pop().is_none());
        assert_eq!(jb.len(), 4);

        jb.push(frame(4));
        assert!(!jb.is_buffering());

        for n in 0..5 {
            assert_eq!(jb.try_pop(), Some(frame(n)));
        }
        assert!(jb.is_buffering());
        assert!(jb.try_pop().is_none());
        assert_eq!(jb.stats().underruns, 1);
    }

    #[test]
    fn refill_required_after_underrun() {
        let jb = buffer(3);
        for n in 0..3 {
            jb.push(frame(n));
        }
        while jb.try_pop().is_some() {}
        jb.push(frame(9));
        assert!(jb.is_buffering());
        assert!(jb.try_pop().is_none());
    }

    #[test]
    fn low_threshold_keeps_cushion() {
        let jb = JitterBuffer::new(JitterConfig {
            high_threshold: 4,
            low_threshold: 2,
            capacity: None,
        })
        .unwrap();
        for n in 0..4 {
            jb.push(frame(n));
        }
        assert_eq!(jb.try_pop(), Some(frame(0)));
        assert!(!jb.is_buffering());
        assert_eq!(jb.try_pop(), Some(frame(1)));
        assert!(jb.is_buffering());
        assert_eq!(jb.len(), 2);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let jb = JitterBuffer::new(JitterConfig {
            high_threshold: 2,
            low_threshold: 0,
            capacity: Some(3),
        })
        .unwrap();
        for n in 0..5 {
            jb.push(frame(n));
        }
        assert_eq!(jb.len(), 3);
        assert_eq!(jb.stats().overflow, 2);
        assert_eq!(jb.try_pop(), Some(frame(2)));
    }

    #[test]
    fn invalid_configs_rejected() {
        assert!(JitterBuffer::new(JitterConfig::with_high_threshold(0)).is_err());
        assert!(
            JitterBuffer::new(JitterConfig {
                high_threshold: 3,
                low_threshold: 3,
                capacity: None,
            })
            .is_err()
        );
        assert!(
            JitterBuffer::new(JitterConfig {
                high_threshold: 10,
                low_threshold: 0,
                capacity: Some(5),
            })
            .is_err()
        );
    }

    #[test]
    fn concurrent_producer_consumer_preserves_order() {
        let jb = buffer(8);
        let producer = {
            let jb = jb.clone();
            thread::spawn(move || {
                for n in 0..=255u8 {
                    jb.push(frame(n));
                }
            })
        };

        let mut received = Vec::new();
        loop {
            match jb.try_pop() {
                Some(f) => received.push(f.as_bytes()[2]),
                None if producer.is_finished() => break,
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        // Drain whatever the producer left after its final push.
        while let Some(f) = jb.try_pop() {
            received.push(f.as_bytes()[2]);
        }

        // Whatever is still held back is the tail below the threshold.
        assert_eq!(received.len() + jb.len(), 256);
        let expected: Vec<u8> = (0..received.len()).map(|n| n as u8).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn drain_ignores_threshold() {
        let jb = JitterBuffer::new(JitterConfig::with_high_threshold(5)).unwrap();
        jb.push(frame(1));
        jb.push(frame(2));
        assert!(jb.try_pop().is_none());

        let tail: Vec<u8> = jb.drain().iter().map(|f| f.as_bytes()[2]).collect();
        assert_eq!(tail, vec![1, 2]);
        assert!(jb.is_empty());
        assert!(jb.is_buffering());
        assert_eq!(jb.stats().popped, 2);
    }
}
