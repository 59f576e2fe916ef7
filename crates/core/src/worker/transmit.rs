//! Server data-plane loop: source → fragments → paced datagrams.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use super::WorkerHandle;
use crate::media::rtp::wallclock_timestamp;
use crate::media::{Frame, Packetizer, VideoSource};
use crate::pacing::Pacer;
use crate::signal::Signal;

/// Default stream frame rate.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Interval between periodic statistics reports.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Why [`TransmitWorker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitExit {
    /// The stop signal was raised (PAUSE, TEARDOWN or disconnect).
    Stopped,
    /// The video source ran out of frames.
    EndOfStream,
}

/// Counters for one session's outbound stream.
#[derive(Debug, Clone, Default)]
pub struct TransmitStats {
    pub frames_sent: u64,
    pub fragmented_frames: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    /// When the first frame went out; `None` until the first PLAY sends one.
    pub started: Option<Instant>,
}

impl TransmitStats {
    fn elapsed_secs(&self) -> f64 {
        self.started
            .map_or(0.0, |started| started.elapsed().as_secs_f64())
            .max(f64::EPSILON)
    }

    pub fn log(&self, session_id: Option<u32>, next_sequence: u16, label: &'static str) {
        let elapsed = self.elapsed_secs();
        tracing::info!(
            session_id,
            frames = self.frames_sent,
            fragmented_frames = self.fragmented_frames,
            packets = self.packets_sent,
            dropped = self.packets_dropped,
            next_sequence,
            megabytes = format_args!("{:.2}", self.bytes_sent as f64 / (1024.0 * 1024.0)),
            mbps = format_args!("{:.2}", self.bytes_sent as f64 * 8.0 / (elapsed * 1_000_000.0)),
            packets_per_sec = format_args!("{:.1}", self.packets_sent as f64 / elapsed),
            frames_per_sec = format_args!("{:.1}", self.frames_sent as f64 / elapsed),
            duration_secs = format_args!("{:.1}", elapsed),
            "{label}"
        );
    }
}

/// Paced sender for one session.
///
/// The sequence counter lives in the packetizer and the read position in
/// the source, so a worker stopped by PAUSE and respawned by PLAY resumes
/// both exactly where it left off. A frame fetched but not yet started
/// when the stop arrives is held in `pending` and sent first on resume.
pub struct TransmitWorker {
    socket: UdpSocket,
    peer: SocketAddr,
    source: Box<dyn VideoSource>,
    packetizer: Box<dyn Packetizer>,
    frame_rate: u32,
    retry_delay: Duration,
    stats_interval: Duration,
    session_id: Option<u32>,
    stats: TransmitStats,
    pending: Option<Frame>,
}

impl TransmitWorker {
    pub fn new(
        socket: UdpSocket,
        peer: SocketAddr,
        source: Box<dyn VideoSource>,
        packetizer: Box<dyn Packetizer>,
    ) -> Self {
        Self {
            socket,
            peer,
            source,
            packetizer,
            frame_rate: DEFAULT_FRAME_RATE,
            retry_delay: Duration::from_micros(10),
            stats_interval: DEFAULT_STATS_INTERVAL,
            session_id: None,
            stats: TransmitStats::default(),
            pending: None,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_stats_interval(mut self, stats_interval: Duration) -> Self {
        self.stats_interval = stats_interval;
        self
    }

    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> &TransmitStats {
        &self.stats
    }

    /// Index of the last frame taken from the source.
    pub fn frame_index(&self) -> usize {
        self.source.current_index()
    }

    /// Log the counters together with the packetizer's sequence position.
    pub fn log_stats(&self, label: &'static str) {
        self.stats
            .log(self.session_id, self.packetizer.next_sequence(), label);
    }

    /// Run the loop on its own thread; the worker comes back on join.
    pub fn spawn(self, stop: Signal) -> io::Result<WorkerHandle<(TransmitWorker, TransmitExit)>> {
        WorkerHandle::spawn("rtp-transmit", stop, move |stop| {
            let mut worker = self;
            let exit = worker.run(&stop);
            (worker, exit)
        })
    }

    /// Pace frames out until stopped or the source ends.
    ///
    /// The stop signal is checked at every pacer wait and before each frame
    /// is packetized. Once a frame's first packet is out the whole frame is
    /// sent, so the wire never carries a partial frame or a sequence gap.
    pub fn run(&mut self, stop: &Signal) -> TransmitExit {
        tracing::debug!(
            session_id = self.session_id,
            peer = %self.peer,
            frame_rate = self.frame_rate,
            pending = self.pending.is_some(),
            "transmit loop started"
        );
        let mut pacer = Pacer::from_rate(self.frame_rate);
        let mut last_report = Instant::now();

        loop {
            if !pacer.wait(stop) {
                return TransmitExit::Stopped;
            }

            let frame = match self.pending.take() {
                Some(frame) => frame,
                None => match self.source.next_frame() {
                    Some(frame) => frame,
                    None => {
                        tracing::info!(
                            session_id = self.session_id,
                            frames = self.source.current_index(),
                            "end of video stream"
                        );
                        return TransmitExit::EndOfStream;
                    }
                },
            };

            if stop.is_set() {
                self.pending = Some(frame);
                return TransmitExit::Stopped;
            }

            self.send_frame(&frame, wallclock_timestamp());

            if last_report.elapsed() >= self.stats_interval {
                self.log_stats("streaming statistics");
                last_report = Instant::now();
            }
        }
    }

    /// Packetize one frame and send every fragment.
    fn send_frame(&mut self, frame: &Frame, timestamp: u32) {
        self.stats.started.get_or_insert_with(Instant::now);
        let packets = self.packetizer.packetize(frame.as_bytes(), timestamp);
        if packets.len() > 1 {
            self.stats.fragmented_frames += 1;
        }
        for packet in &packets {
            self.send_packet(packet);
        }
        self.stats.frames_sent += 1;
        tracing::trace!(
            frame = self.source.current_index(),
            bytes = frame.len(),
            packets = packets.len(),
            "frame sent"
        );
    }

    /// Send one datagram, retrying once if the socket buffer is full.
    /// A packet that still cannot be sent is dropped; the frame goes on.
    fn send_packet(&mut self, packet: &[u8]) {
        let result = match self.socket.send_to(packet, self.peer) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(self.retry_delay);
                self.socket.send_to(packet, self.peer)
            }
            other => other,
        };

        match result {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
            }
            Err(e) => {
                self.stats.packets_dropped += 1;
                tracing::warn!(
                    session_id = self.session_id,
                    frame = self.source.current_index(),
                    error = %e,
                    "dropped packet"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::media::{Fragmenter, MemorySource, MjpegPacketizer};
    use crate::transport::udp::{TransportConfig, bind_receiver_at, bind_sender};

    fn frames(count: u8, len: usize) -> Vec<Frame> {
        (0..count)
            .map(|n| {
                let mut bytes = vec![0xFF, 0xD8];
                bytes.extend(std::iter::repeat_n(n, len - 4));
                bytes.extend_from_slice(&[0xFF, 0xD9]);
                Frame::new(bytes)
            })
            .collect()
    }

    fn worker(frames: Vec<Frame>, max_payload: usize) -> (TransmitWorker, UdpSocket) {
        let config = TransportConfig {
            recv_timeout: Duration::from_millis(200),
            ..TransportConfig::default()
        };
        let rx = bind_receiver_at("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let tx = bind_sender(&config).unwrap();
        let packetizer = MjpegPacketizer::new(7, Fragmenter::new(max_payload).unwrap());
        let worker = TransmitWorker::new(
            tx,
            rx.local_addr().unwrap(),
            Box::new(MemorySource::new(frames)),
            Box::new(packetizer),
        )
        .with_frame_rate(500);
        (worker, rx)
    }

    #[test]
    fn sends_every_fragment_then_ends() {
        let (mut worker, rx) = worker(frames(5, 50), 20);
        assert_eq!(worker.run(&Signal::new()), TransmitExit::EndOfStream);
        assert_eq!(worker.stats().frames_sent, 5);
        assert_eq!(worker.stats().fragmented_frames, 5);
        assert_eq!(worker.stats().packets_sent, 15);

        let mut buf = [0u8; 2048];
        let mut sequences = Vec::new();
        for _ in 0..15 {
            let n = rx.recv(&mut buf).unwrap();
            let packet = RtpPacket::decode(&buf[..n]).unwrap();
            assert_eq!(packet.payload_type(), 26);
            assert_eq!(packet.ssrc(), 7);
            sequences.push(packet.sequence());
        }
        assert_eq!(sequences, (0..15).collect::<Vec<u16>>());
    }

    #[test]
    fn stop_signal_ends_loop_promptly() {
        let (worker, _rx) = worker(frames(200, 50), 1460);
        let handle = worker.with_frame_rate(10).spawn(Signal::new()).unwrap();
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        let (worker, exit) = handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(exit, TransmitExit::Stopped);
        assert!(worker.frame_index() < 200);
    }

    #[test]
    fn resumes_sequence_after_restart() {
        let (worker, rx) = worker(frames(4, 30), 1460);
        let stop = Signal::new();
        stop.set();
        // Stopped before the first frame: nothing sent.
        let (worker, exit) = worker.spawn(stop).unwrap().join().unwrap();
        assert_eq!(exit, TransmitExit::Stopped);
        assert_eq!(worker.frame_index(), 0);
        assert!(worker.stats().started.is_none());

        let (worker, exit) = worker.spawn(Signal::new()).unwrap().join().unwrap();
        assert_eq!(exit, TransmitExit::EndOfStream);
        assert_eq!(worker.stats().packets_sent, 4);
        assert!(worker.stats().started.is_some());

        let mut buf = [0u8; 2048];
        let n = rx.recv(&mut buf).unwrap();
        assert_eq!(RtpPacket::decode(&buf[..n]).unwrap().sequence(), 0);
    }

    /// Raises `stop` as it hands out frame `stop_at`.
    struct StopOnFetch {
        inner: MemorySource,
        stop: Signal,
        stop_at: usize,
    }

    impl VideoSource for StopOnFetch {
        fn next_frame(&mut self) -> Option<Frame> {
            if self.inner.current_index() == self.stop_at {
                self.stop.set();
            }
            self.inner.next_frame()
        }

        fn current_index(&self) -> usize {
            self.inner.current_index()
        }
    }

    #[test]
    fn stop_after_fetch_keeps_frame_and_sequence() {
        let config = TransportConfig {
            recv_timeout: Duration::from_millis(200),
            ..TransportConfig::default()
        };
        let rx = bind_receiver_at("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let tx = bind_sender(&config).unwrap();
        let stop = Signal::new();
        let source = StopOnFetch {
            inner: MemorySource::new(frames(4, 60)),
            stop: stop.clone(),
            stop_at: 1,
        };
        let mut worker = TransmitWorker::new(
            tx,
            rx.local_addr().unwrap(),
            Box::new(source),
            Box::new(MjpegPacketizer::new(7, Fragmenter::new(20).unwrap())),
        )
        .with_frame_rate(500);

        assert_eq!(worker.run(&stop), TransmitExit::Stopped);
        assert_eq!(worker.stats().frames_sent, 1);
        assert_eq!(worker.stats().packets_sent, 3);

        assert_eq!(worker.run(&Signal::new()), TransmitExit::EndOfStream);
        assert_eq!(worker.stats().frames_sent, 4);

        let mut buf = [0u8; 2048];
        let mut sequences = Vec::new();
        let mut frame_starts = Vec::new();
        let mut current = Vec::new();
        for _ in 0..12 {
            let n = rx.recv(&mut buf).unwrap();
            let packet = RtpPacket::decode(&buf[..n]).unwrap();
            sequences.push(packet.sequence());
            current.extend_from_slice(packet.payload());
            if packet.marker() {
                assert_eq!(current.len(), 60, "one whole frame per marker");
                frame_starts.push(current[2]);
                current.clear();
            }
        }
        assert_eq!(sequences, (0..12).collect::<Vec<u16>>());
        assert_eq!(frame_starts, vec![0, 1, 2, 3]);
    }
}
