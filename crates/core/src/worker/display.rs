//! Client presentation loop: jitter buffer → render sink at a fixed rate.

use std::io;
use std::time::Duration;

use super::WorkerHandle;
use crate::jitter::JitterBuffer;
use crate::media::Frame;
use crate::pacing::Pacer;
use crate::signal::Signal;

/// How long the loop sleeps on a closed gate before re-checking its stop signal.
const GATE_POLL: Duration = Duration::from_millis(100);

/// What the viewer should show alongside (or instead of) the picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Waiting for `target` frames; `buffered` are queued so far.
    Buffering { buffered: usize, target: usize },
    /// Frames are being presented.
    Playing { buffered: usize },
}

/// Where decoded frames end up.
///
/// JPEG decoding is the sink's business; the loop hands over raw frame bytes.
pub trait RenderSink: Send {
    fn present(&mut self, frame: Frame);

    /// Called when the playback status changes.
    fn status(&mut self, _status: PlaybackStatus) {}
}

/// Fixed-rate loop presenting one buffered frame per tick.
///
/// It runs only while the `playing` gate is set. A closed gate (PAUSE)
/// freezes the loop without touching the buffer, so buffered frames are
/// still there on resume.
pub struct DisplayLoop {
    buffer: JitterBuffer,
    sink: Box<dyn RenderSink>,
    frame_rate: u32,
    playing: Signal,
    last_status: Option<PlaybackStatus>,
    presented: u64,
}

impl DisplayLoop {
    pub fn new(buffer: JitterBuffer, sink: Box<dyn RenderSink>, frame_rate: u32, playing: Signal) -> Self {
        Self {
            buffer,
            sink,
            frame_rate,
            playing,
            last_status: None,
            presented: 0,
        }
    }

    /// Frames handed to the sink so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn spawn(self, stop: Signal) -> io::Result<WorkerHandle<DisplayLoop>> {
        WorkerHandle::spawn("display", stop, move |stop| {
            let mut display = self;
            display.run(&stop);
            display
        })
    }

    pub fn run(&mut self, stop: &Signal) {
        let mut pacer = Pacer::from_rate(self.frame_rate);
        while !stop.is_set() {
            if !self.playing.is_set() {
                self.playing.wait_timeout(GATE_POLL);
                // Resume on a fresh schedule rather than catching up the paused interval.
                pacer = Pacer::from_rate(self.frame_rate);
                continue;
            }
            if !pacer.wait(stop) {
                break;
            }
            if self.playing.is_set() {
                self.tick();
            }
        }
        tracing::debug!(presented = self.presented, "display loop stopped");
    }

    /// One presentation cycle.
    pub fn tick(&mut self) {
        let target = self.buffer.config().high_threshold;
        if self.buffer.is_buffering() {
            self.report(PlaybackStatus::Buffering {
                buffered: self.buffer.len(),
                target,
            });
            return;
        }

        match self.buffer.try_pop() {
            Some(frame) => {
                self.report(PlaybackStatus::Playing {
                    buffered: self.buffer.len(),
                });
                self.sink.present(frame);
                self.presented += 1;
            }
            None => self.report(PlaybackStatus::Buffering {
                buffered: self.buffer.len(),
                target,
            }),
        }
    }

    /// Forward a status change. Playing is reported once per transition;
    /// buffering progress is reported whenever the count moves.
    fn report(&mut self, status: PlaybackStatus) {
        let changed = match (self.last_status, status) {
            (Some(PlaybackStatus::Playing { .. }), PlaybackStatus::Playing { .. }) => false,
            (last, status) => last != Some(status),
        };
        if changed {
            tracing::debug!(?status, "playback status");
            self.sink.status(status);
            self.last_status = Some(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::JitterConfig;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        statuses: Arc<Mutex<Vec<PlaybackStatus>>>,
    }

    impl RenderSink for Recorder {
        fn present(&mut self, frame: Frame) {
            self.frames.lock().push(frame.into_bytes());
        }

        fn status(&mut self, status: PlaybackStatus) {
            self.statuses.lock().push(status);
        }
    }

    fn frame(n: u8) -> Frame {
        Frame::new(vec![0xFF, 0xD8, n, 0xFF, 0xD9])
    }

    fn display(threshold: usize) -> (DisplayLoop, JitterBuffer, Recorder, Signal) {
        let buffer = JitterBuffer::new(JitterConfig::with_high_threshold(threshold)).unwrap();
        let recorder = Recorder::default();
        let playing = Signal::new();
        let display = DisplayLoop::new(buffer.clone(), Box::new(recorder.clone()), 200, playing.clone());
        (display, buffer, recorder, playing)
    }

    #[test]
    fn reports_buffering_until_threshold() {
        let (mut display, buffer, recorder, _) = display(3);
        display.tick();
        buffer.push(frame(0));
        display.tick();
        display.tick();
        assert!(recorder.frames.lock().is_empty());
        assert_eq!(
            *recorder.statuses.lock(),
            vec![
                PlaybackStatus::Buffering { buffered: 0, target: 3 },
                PlaybackStatus::Buffering { buffered: 1, target: 3 },
            ]
        );

        buffer.push(frame(1));
        buffer.push(frame(2));
        display.tick();
        display.tick();
        assert_eq!(recorder.frames.lock().len(), 2);
        assert_eq!(display.presented(), 2);
        assert_eq!(
            recorder.statuses.lock().last(),
            Some(&PlaybackStatus::Playing { buffered: 2 })
        );
    }

    #[test]
    fn presents_in_order_while_gate_open() {
        let (display, buffer, recorder, playing) = display(2);
        for n in 0..5 {
            buffer.push(frame(n));
        }
        let handle = display.spawn(Signal::new()).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert!(recorder.frames.lock().is_empty(), "gate closed");

        playing.set();
        for _ in 0..100 {
            if recorder.frames.lock().len() >= 5 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let display = handle.stop().unwrap();
        let frames = recorder.frames.lock().clone();
        assert_eq!(frames.len(), 5);
        for (n, bytes) in frames.iter().enumerate() {
            assert_eq!(bytes[2], n as u8);
        }
        assert_eq!(display.presented(), 5);
    }

    #[test]
    fn closed_gate_keeps_buffer() {
        let (display, buffer, recorder, playing) = display(1);
        let handle = display.spawn(Signal::new()).unwrap();
        playing.clear();
        buffer.push(frame(9));
        std::thread::sleep(Duration::from_millis(50));
        handle.stop().unwrap();
        assert!(recorder.frames.lock().is_empty());
        assert_eq!(buffer.len(), 1);
    }
}
