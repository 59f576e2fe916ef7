//! Client data-plane loop: datagrams → reassembled frames → jitter buffer.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use super::WorkerHandle;
use crate::error::Result;
use crate::jitter::JitterBuffer;
use crate::media::Reassembler;
use crate::media::rtp::RtpPacket;
use crate::signal::Signal;

/// Largest datagram the loop will read.
pub const MAX_DATAGRAM: usize = 65_535;

/// Pause after an unexpected socket error before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub datagrams: u64,
    pub bytes: u64,
    /// Datagrams too short to carry an RTP header.
    pub truncated: u64,
    pub frames: u64,
    /// Frames rejected at reassembly for missing JPEG boundaries.
    pub discarded: u64,
}

pub struct ReceiveWorker {
    socket: UdpSocket,
    reassembler: Reassembler,
    buffer: JitterBuffer,
    stats: ReceiveStats,
}

impl ReceiveWorker {
    /// `socket` should carry a read timeout so the loop can observe its stop signal.
    pub fn new(socket: UdpSocket, buffer: JitterBuffer) -> Self {
        Self {
            socket,
            reassembler: Reassembler::new(),
            buffer,
            stats: ReceiveStats::default(),
        }
    }

    pub fn stats(&self) -> ReceiveStats {
        let reassembly = self.reassembler.stats();
        ReceiveStats {
            frames: reassembly.frames,
            discarded: reassembly.discarded,
            ..self.stats
        }
    }

    pub fn spawn(self, stop: Signal) -> io::Result<WorkerHandle<ReceiveWorker>> {
        WorkerHandle::spawn("rtp-receive", stop, move |stop| {
            let mut worker = self;
            worker.run(&stop);
            worker
        })
    }

    /// Receive until `stop` is set.
    pub fn run(&mut self, stop: &Signal) {
        tracing::debug!(local = ?self.socket.local_addr().ok(), "receive loop started");
        let mut datagram = vec![0u8; MAX_DATAGRAM];
        while !stop.is_set() {
            if let Err(e) = self.receive_one(&mut datagram) {
                if stop.is_set() {
                    break;
                }
                tracing::warn!(error = %e, "receive error");
                stop.wait_timeout(ERROR_BACKOFF);
            }
        }

        let stats = self.stats();
        tracing::info!(
            datagrams = stats.datagrams,
            bytes = stats.bytes,
            frames = stats.frames,
            truncated = stats.truncated,
            discarded = stats.discarded,
            "receive loop stopped"
        );
    }

    /// Read and process at most one datagram. A timeout is not an error.
    fn receive_one(&mut self, datagram: &mut [u8]) -> Result<()> {
        let len = match self.socket.recv_from(datagram) {
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.stats.datagrams += 1;
        self.stats.bytes += len as u64;

        let packet = match RtpPacket::decode(&datagram[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.truncated += 1;
                self.reassembler.reset();
                tracing::debug!(error = %e, "discarding datagram");
                return Ok(());
            }
        };

        if let Some(frame) = self.reassembler.push(&packet) {
            tracing::trace!(
                sequence = packet.sequence(),
                bytes = frame.len(),
                "frame reassembled"
            );
            self.buffer.push(frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::JitterConfig;
    use crate::media::rtp::RtpHeader;
    use crate::transport::udp::{TransportConfig, bind_receiver_at};

    fn setup() -> (ReceiveWorker, UdpSocket, JitterBuffer) {
        let config = TransportConfig {
            recv_timeout: Duration::from_millis(20),
            ..TransportConfig::default()
        };
        let rx = bind_receiver_at("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
        tx.connect(rx.local_addr().unwrap()).unwrap();
        let buffer = JitterBuffer::new(JitterConfig::with_high_threshold(1)).unwrap();
        (ReceiveWorker::new(rx, buffer.clone()), tx, buffer)
    }

    fn packet(seq: u16, payload: &[u8], marker: bool) -> Vec<u8> {
        RtpPacket::encode(&RtpHeader::new(26, seq, 1).with_marker(marker), payload, Some(0))
    }

    #[test]
    fn reassembles_into_buffer() {
        let (worker, tx, buffer) = setup();
        let handle = worker.spawn(Signal::new()).unwrap();

        tx.send(&packet(0, &[0xFF, 0xD8, 1], false)).unwrap();
        tx.send(&packet(1, &[2, 0xFF, 0xD9], true)).unwrap();

        let mut frame = None;
        for _ in 0..100 {
            frame = buffer.try_pop();
            if frame.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let worker = handle.stop().unwrap();
        assert_eq!(frame.unwrap().as_bytes(), &[0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
        assert_eq!(worker.stats().datagrams, 2);
        assert_eq!(worker.stats().frames, 1);
    }

    #[test]
    fn truncated_datagram_discards_partial_frame() {
        let (worker, tx, buffer) = setup();
        let handle = worker.spawn(Signal::new()).unwrap();

        tx.send(&packet(0, &[0xFF, 0xD8, 1], false)).unwrap();
        tx.send(&[0x80, 26, 0, 1]).unwrap();
        tx.send(&packet(2, &[2, 0xFF, 0xD9], true)).unwrap();
        tx.send(&packet(3, &[0xFF, 0xD8, 0xFF, 0xD9], true)).unwrap();

        let mut frame = None;
        for _ in 0..100 {
            frame = buffer.try_pop();
            if frame.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let worker = handle.stop().unwrap();
        assert_eq!(frame.unwrap().as_bytes(), &[0xFF, 0xD8, 0xFF, 0xD9]);
        let stats = worker.stats();
        assert_eq!(stats.truncated, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.frames, 1);
    }

    #[test]
    fn stops_while_idle() {
        let (worker, _tx, _buffer) = setup();
        let handle = worker.spawn(Signal::new()).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let started = std::time::Instant::now();
        assert!(handle.stop().is_some());
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
