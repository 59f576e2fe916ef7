//! Long-lived data-plane loops.
//!
//! | Loop | Side | Owns | Paced by |
//! |------|------|------|----------|
//! | [`TransmitWorker`] | server | data socket, video source, packetizer | [`Pacer`](crate::pacing::Pacer) at the stream frame rate |
//! | [`ReceiveWorker`] | client | data socket, reassembler | receive timeout |
//! | [`DisplayLoop`] | client | render sink | [`Pacer`](crate::pacing::Pacer) at the display frame rate |
//!
//! Each runs on its own named thread and exits within one scheduling
//! quantum of its stop [`Signal`] being set. Per-packet and per-frame
//! faults are handled inside the loop; nothing escapes the thread.

pub mod display;
pub mod receive;
pub mod transmit;

use std::io;
use std::thread::{self, JoinHandle};

use crate::signal::Signal;

pub use display::{DisplayLoop, PlaybackStatus, RenderSink};
pub use receive::{ReceiveStats, ReceiveWorker};
pub use transmit::{TransmitExit, TransmitStats, TransmitWorker};

/// A running loop and the signal that stops it.
///
/// The thread hands its state back on exit, so a paused worker can be
/// restarted with its counters and position intact.
pub struct WorkerHandle<T> {
    name: &'static str,
    stop: Signal,
    thread: JoinHandle<T>,
}

impl<T: Send + 'static> WorkerHandle<T> {
    pub fn spawn<F>(name: &'static str, stop: Signal, body: F) -> io::Result<Self>
    where
        F: FnOnce(Signal) -> T + Send + 'static,
    {
        let signal = stop.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(signal))?;
        tracing::debug!(worker = name, "worker started");
        Ok(Self { name, stop, thread })
    }

    /// Whether the loop has already returned on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn signal(&self) -> &Signal {
        &self.stop
    }

    /// Raise the stop signal and wait for the loop to exit.
    pub fn stop(self) -> Option<T> {
        self.stop.set();
        self.join()
    }

    /// Wait for the loop to exit. `None` if it panicked.
    pub fn join(self) -> Option<T> {
        match self.thread.join() {
            Ok(state) => {
                tracing::debug!(worker = self.name, "worker stopped");
                Some(state)
            }
            Err(_) => {
                tracing::error!(worker = self.name, "worker panicked");
                None
            }
        }
    }
}
