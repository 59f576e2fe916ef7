use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::registry::SourceRegistry;
use crate::server::ServerConfig;
use crate::session::{Command, Session, SessionState, generate_session_id};
use crate::signal::Signal;
use crate::transport::udp;
use crate::worker::{TransmitExit, TransmitWorker, WorkerHandle};

type TransmitHandle = WorkerHandle<(TransmitWorker, TransmitExit)>;

/// Server side of one control connection.
///
/// Owns the connection's session and, after SETUP, its transmit worker.
/// The worker is parked while READY and running while PLAYING, so PAUSE
/// and PLAY keep the source position and sequence counter.
pub struct Responder {
    session: Session,
    registry: SourceRegistry,
    config: Arc<ServerConfig>,
    idle: Option<TransmitWorker>,
    running: Option<TransmitHandle>,
}

impl Responder {
    pub fn new(peer: SocketAddr, registry: SourceRegistry, config: Arc<ServerConfig>) -> Self {
        Self {
            session: Session::new(peer),
            registry,
            config,
            idle: None,
            running: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_torn_down(&self) -> bool {
        self.session.state == SessionState::TornDown
    }

    /// Handle one request. `None` means the request is ignored and no
    /// reply is sent: the command is not legal in the current state, or it
    /// names a different session.
    pub fn handle(&mut self, request: &RtspRequest) -> Option<RtspResponse> {
        self.reap_finished();

        let cseq = request.cseq().ok()?;
        if let (Some(ours), Some(theirs)) = (self.session.id, request.session_id())
            && ours != theirs
        {
            tracing::warn!(session_id = ours, requested = theirs, "request for another session ignored");
            return None;
        }
        if !self.session.state.accepts(request.method) {
            tracing::debug!(
                method = %request.method,
                state = %self.session.state,
                cseq,
                "command not valid in current state, ignoring"
            );
            return None;
        }

        self.session.cseq = cseq;
        self.session.last_command = Some(request.method);

        match request.method {
            Command::Setup => self.handle_setup(cseq, request),
            Command::Play => Some(self.handle_play(cseq)),
            Command::Pause => Some(self.handle_pause(cseq)),
            Command::Teardown => Some(self.handle_teardown(cseq)),
        }
    }

    fn handle_setup(&mut self, cseq: u32, request: &RtspRequest) -> Option<RtspResponse> {
        let Some(transport) = request.transport() else {
            tracing::warn!(cseq, "SETUP without a usable Transport header, ignoring");
            return None;
        };

        let source = match self.registry.open(&request.resource) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(resource = %request.resource, error = %e, "SETUP for unknown resource");
                return Some(RtspResponse::not_found().with_session(cseq, None));
            }
        };

        let prepared = self.config.packetizer().and_then(|packetizer| {
            udp::bind_sender(&self.config.transport).map(|socket| (packetizer, socket))
        });
        let (packetizer, socket) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(error = %e, "cannot prepare data channel");
                return Some(RtspResponse::connection_error().with_session(cseq, None));
            }
        };

        let id = generate_session_id();
        let peer = SocketAddr::new(self.session.control_peer.ip(), transport.client_port);
        self.session.id = Some(id);
        self.session.data_peer = Some(peer);
        self.idle = Some(
            TransmitWorker::new(socket, peer, source, Box::new(packetizer))
                .with_frame_rate(self.config.frame_rate)
                .with_retry_delay(self.config.transport.send_retry_delay)
                .with_stats_interval(self.config.stats_interval)
                .with_session_id(id),
        );
        self.session.transition(Command::Setup);

        tracing::info!(
            session_id = id,
            resource = %request.resource,
            data_peer = %peer,
            "session set up"
        );
        Some(RtspResponse::ok().with_session(cseq, Some(id)))
    }

    fn handle_play(&mut self, cseq: u32) -> RtspResponse {
        if self.running.is_none() {
            let Some(worker) = self.idle.take() else {
                tracing::error!(session_id = ?self.session.id, "no transmit worker to start");
                return RtspResponse::connection_error().with_session(cseq, self.session.id);
            };
            match worker.spawn(Signal::new()) {
                Ok(handle) => self.running = Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "cannot start transmit worker");
                    return RtspResponse::connection_error().with_session(cseq, self.session.id);
                }
            }
        }

        self.session.transition(Command::Play);
        tracing::info!(session_id = ?self.session.id, "playing");
        RtspResponse::ok().with_session(cseq, self.session.id)
    }

    fn handle_pause(&mut self, cseq: u32) -> RtspResponse {
        self.park();
        self.session.transition(Command::Pause);
        tracing::info!(session_id = ?self.session.id, "paused");
        RtspResponse::ok().with_session(cseq, self.session.id)
    }

    fn handle_teardown(&mut self, cseq: u32) -> RtspResponse {
        let reply = RtspResponse::ok().with_session(cseq, self.session.id);
        self.release();
        self.session.transition(Command::Teardown);
        tracing::info!(session_id = ?self.session.id, "session torn down");
        reply
    }

    /// Stop the running worker, if any, and keep it for the next PLAY.
    fn park(&mut self) {
        if let Some(handle) = self.running.take()
            && let Some((worker, _)) = handle.stop()
        {
            self.idle = Some(worker);
        }
    }

    /// Stop the worker and drop it, closing the data socket.
    fn release(&mut self) {
        self.park();
        if let Some(worker) = self.idle.take() {
            worker.log_stats("final streaming statistics");
        }
    }

    /// Collect a worker that ended on its own because the source ran out.
    /// The session falls back to READY.
    fn reap_finished(&mut self) {
        if !self.running.as_ref().is_some_and(|handle| handle.is_finished()) {
            return;
        }
        if let Some(handle) = self.running.take()
            && let Some((worker, exit)) = handle.join()
        {
            if exit == TransmitExit::EndOfStream && self.session.state == SessionState::Playing {
                self.session.state = SessionState::Ready;
                tracing::info!(session_id = ?self.session.id, "stream ended, session back to READY");
            }
            self.idle = Some(worker);
        }
    }

    /// Release everything this connection holds. Called when the control
    /// connection goes away without a TEARDOWN.
    pub fn shutdown(&mut self) {
        if self.session.state == SessionState::TornDown {
            return;
        }
        self.release();
        if self.session.id.is_some() {
            tracing::info!(session_id = ?self.session.id, "session released on disconnect");
        }
        self.session.state = SessionState::TornDown;
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.shutdown();
    }
}
