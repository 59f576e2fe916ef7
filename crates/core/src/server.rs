use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::media::{Fragmenter, MjpegPacketizer};
use crate::media::mjpeg::{DEFAULT_SSRC, MJPEG_PAYLOAD_TYPE};
use crate::registry::SourceRegistry;
use crate::signal::Signal;
use crate::transport::TransportConfig;
use crate::transport::tcp::{self, Connections};
use crate::worker::transmit::{DEFAULT_FRAME_RATE, DEFAULT_STATS_INTERVAL};

/// Per-session streaming parameters used by the responder.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: TransportConfig,
    /// Frames per second sent to each playing session.
    pub frame_rate: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    /// Interval between periodic transmit statistics.
    pub stats_interval: Duration,
}

impl ServerConfig {
    /// A fresh packetizer for one session, sized from the transport config.
    pub fn packetizer(&self) -> Result<MjpegPacketizer> {
        let fragmenter = Fragmenter::new(self.transport.max_payload()?)?;
        Ok(MjpegPacketizer::new(self.ssrc, fragmenter).with_payload_type(self.payload_type))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            frame_rate: DEFAULT_FRAME_RATE,
            ssrc: DEFAULT_SSRC,
            payload_type: MJPEG_PAYLOAD_TYPE,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Listening endpoint for the control protocol.
///
/// Each accepted connection gets its own thread and its own session;
/// sessions never share sockets, sources, or workers.
pub struct Server {
    bind_addr: String,
    registry: SourceRegistry,
    config: Arc<ServerConfig>,
    stop: Signal,
    connections: Connections,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            registry: SourceRegistry::new(),
            config: Arc::new(config),
            stop: Signal::new(),
            connections: Connections::default(),
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Serve files from `root` for resource names that are not registered.
    pub fn with_media_root(self, root: impl Into<PathBuf>) -> Self {
        self.registry.set_media_root(root);
        self
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn start(&mut self) -> Result<()> {
        if self.accept_thread.is_some() {
            return Err(StreamError::AlreadyRunning);
        }
        self.config.transport.max_payload()?;

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.stop.clear();
        let stop = self.stop.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let connections = self.connections.clone();

        let thread = thread::Builder::new()
            .name("control-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, registry, config, connections, stop))?;

        tracing::info!(addr = %local_addr, "control server listening");
        self.local_addr = Some(local_addr);
        self.accept_thread = Some(thread);
        Ok(())
    }

    /// Stop accepting and close every open control connection.
    ///
    /// Closing a connection tears its session down, stopping its worker.
    pub fn stop(&mut self) {
        let Some(thread) = self.accept_thread.take() else {
            return;
        };
        tracing::info!("server stopping");
        self.stop.set();
        if thread.join().is_err() {
            tracing::error!("accept loop panicked");
        }
        self.connections.shutdown_all();
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.accept_thread.is_some()
    }

    /// Bound address once started; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(StreamError::NotStarted)
    }

    /// Number of open control connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
