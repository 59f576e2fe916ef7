use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::{Responder, RtspRequest};
use crate::registry::SourceRegistry;
use crate::server::ServerConfig;
use crate::signal::Signal;

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read one control message: lines up to and including a blank line.
///
/// Leading blank lines are skipped. Returns `None` once the peer has
/// closed the stream; a message cut short by the close is returned as is.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut message = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok((!message.trim().is_empty()).then_some(message));
        }
        let blank = line.trim().is_empty();
        if blank && message.is_empty() {
            continue;
        }
        message.push_str(&line);
        if blank {
            return Ok(Some(message));
        }
    }
}

/// Write handles to every open control connection, so the server can
/// close them all when it stops.
#[derive(Clone, Default)]
pub struct Connections {
    streams: Arc<Mutex<HashMap<SocketAddr, TcpStream>>>,
}

impl Connections {
    fn insert(&self, peer: SocketAddr, stream: TcpStream) {
        self.streams.lock().insert(peer, stream);
    }

    fn remove(&self, peer: &SocketAddr) {
        self.streams.lock().remove(peer);
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down every tracked stream; their connection threads see EOF.
    pub fn shutdown_all(&self) {
        let streams: Vec<_> = self.streams.lock().drain().collect();
        for (peer, stream) in streams {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                tracing::debug!(%peer, error = %e, "shutdown of control stream failed");
            }
        }
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks `stop` between accepts with a 50ms poll interval so that
/// [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    registry: SourceRegistry,
    config: Arc<ServerConfig>,
    connections: Connections,
    stop: Signal,
) {
    while !stop.is_set() {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let registry = registry.clone();
                let config = config.clone();
                let connections = connections.clone();
                let spawned = thread::Builder::new()
                    .name(format!("control-{peer}"))
                    .spawn(move || Connection::handle(stream, registry, config, connections));
                if let Err(e) = spawned {
                    tracing::error!(%peer, error = %e, "cannot spawn connection thread");
                }
            }
            Err(e) => accept_backoff(&e, &stop),
        }
    }
    tracing::debug!("accept loop exited");
}

/// Wait one poll interval after a failed accept. Errors other than
/// `WouldBlock` (EMFILE and the like) are logged and back off the same way,
/// so a persistent failure does not spin.
fn accept_backoff(error: &io::Error, stop: &Signal) {
    if error.kind() != io::ErrorKind::WouldBlock && !stop.is_set() {
        tracing::warn!(error = %error, "TCP accept error");
    }
    stop.wait_timeout(ACCEPT_POLL);
}

/// A single control connection and the session it carries.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    responder: Responder,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    fn handle(
        stream: TcpStream,
        registry: SourceRegistry,
        config: Arc<ServerConfig>,
        connections: Connections,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let (reader_stream, tracked) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(reader), Ok(tracked)) => (reader, tracked),
            _ => return,
        };
        connections.insert(peer_addr, tracked);

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            responder: Responder::new(peer_addr, registry, config),
            peer_addr,
        };

        let reason = conn.run();
        conn.cleanup();
        connections.remove(&peer_addr);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/reply loop. Returns the reason for exiting.
    fn run(&mut self) -> &'static str {
        loop {
            let text = match read_message(&mut self.reader) {
                Ok(Some(text)) => text,
                Ok(None) => return "connection closed by client",
                Err(_) => return "read error",
            };

            let request = match RtspRequest::parse(&text) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    continue;
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                resource = %request.resource,
                cseq = ?request.cseq().ok(),
                "request"
            );

            if let Some(response) = self.responder.handle(&request) {
                tracing::debug!(
                    peer = %self.peer_addr,
                    status = response.status_code,
                    "response"
                );
                if self
                    .writer
                    .write_all(response.serialize().as_bytes())
                    .is_err()
                {
                    return "write error";
                }
            }

            if self.responder.is_torn_down() {
                return "session torn down";
            }
        }
    }

    /// Stop any worker still running for this connection's session.
    fn cleanup(&mut self) {
        self.responder.shutdown();
        if let Err(e) = self.writer.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(peer = %self.peer_addr, error = %e, "control stream shutdown failed");
        }
    }
}
