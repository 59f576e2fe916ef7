use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, StreamError};
use crate::jitter::{JitterBuffer, JitterConfig};
use crate::protocol::RtspResponse;
use crate::session::{Command, Controller, ReplyOutcome, SessionState};
use crate::signal::Signal;
use crate::transport::TransportConfig;
use crate::transport::tcp::read_message;
use crate::transport::udp;
use crate::worker::{DisplayLoop, ReceiveWorker, RenderSink, WorkerHandle};

/// Default local port for incoming media datagrams.
pub const DEFAULT_RTP_PORT: u16 = 25_000;

/// How long [`Client::close`] waits for the TEARDOWN reply.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    /// Local port advertised in SETUP and bound for the data channel.
    pub rtp_port: u16,
    /// Display rate, independent of the server's send rate.
    pub frame_rate: u32,
    pub jitter: JitterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            rtp_port: DEFAULT_RTP_PORT,
            frame_rate: 30,
            jitter: JitterConfig::default(),
        }
    }
}

/// State shared between the caller and the control reader thread.
struct Shared {
    controller: Mutex<Controller>,
    state_changed: Condvar,
    config: ClientConfig,
    buffer: JitterBuffer,
    /// Gate for the display loop: set while PLAYING.
    playing: Signal,
    sink: Mutex<Option<Box<dyn RenderSink>>>,
    receiver: Mutex<Option<WorkerHandle<ReceiveWorker>>>,
    display: Mutex<Option<WorkerHandle<DisplayLoop>>>,
    warning: Mutex<Option<String>>,
}

impl Shared {
    fn warn(&self, message: String) {
        tracing::warn!("{message}");
        *self.warning.lock() = Some(message);
    }

    /// Side effects of a reply the controller accepted. Runs with the
    /// controller locked, so no new command can race the workers.
    fn on_applied(&self, command: Command, controller: &mut MutexGuard<'_, Controller>) {
        match command {
            Command::Setup => self.start_receiver(controller),
            Command::Play => {
                self.start_display();
                self.playing.set();
            }
            Command::Pause => self.playing.clear(),
            Command::Teardown => self.stop_workers(),
        }
    }

    fn start_receiver(&self, controller: &mut MutexGuard<'_, Controller>) {
        let port = self.config.rtp_port;
        let socket = match udp::bind_receiver(port, &self.config.transport) {
            Ok(socket) => socket,
            Err(e) => {
                self.warn(format!("unable to bind data port {port}: {e}"));
                return;
            }
        };
        if let Ok(local) = socket.local_addr() {
            controller.set_data_peer(local);
        }
        match ReceiveWorker::new(socket, self.buffer.clone()).spawn(Signal::new()) {
            Ok(handle) => *self.receiver.lock() = Some(handle),
            Err(e) => self.warn(format!("cannot start receive worker: {e}")),
        }
    }

    fn start_display(&self) {
        let mut display = self.display.lock();
        if display.is_some() {
            return;
        }
        let Some(sink) = self.sink.lock().take() else {
            return;
        };
        let display_loop = DisplayLoop::new(
            self.buffer.clone(),
            sink,
            self.config.frame_rate,
            self.playing.clone(),
        );
        match display_loop.spawn(Signal::new()) {
            Ok(handle) => *display = Some(handle),
            Err(e) => self.warn(format!("cannot start display loop: {e}")),
        }
    }

    fn stop_workers(&self) {
        self.playing.clear();
        if let Some(handle) = self.receiver.lock().take() {
            handle.stop();
        }
        if let Some(handle) = self.display.lock().take() {
            handle.stop();
        }
    }
}

/// Client end of one session.
///
/// Commands are sent from the caller's thread; replies are read and
/// applied on a background thread. State changes only when a matching
/// reply arrives, so callers that need to sequence commands should use
/// [`wait_for_state`](Self::wait_for_state).
pub struct Client {
    shared: Arc<Shared>,
    writer: TcpStream,
    server: SocketAddr,
    reader: Option<JoinHandle<()>>,
}

impl Client {
    /// Open the control connection. No command is sent yet.
    pub fn connect(
        server: impl ToSocketAddrs,
        resource: &str,
        config: ClientConfig,
        sink: Box<dyn RenderSink>,
    ) -> Result<Self> {
        let buffer = JitterBuffer::new(config.jitter.clone())?;
        let writer = TcpStream::connect(server)?;
        let server = writer.peer_addr()?;
        let reader = BufReader::new(writer.try_clone()?);

        let shared = Arc::new(Shared {
            controller: Mutex::new(Controller::new(server, resource, config.rtp_port)),
            state_changed: Condvar::new(),
            config,
            buffer,
            playing: Signal::new(),
            sink: Mutex::new(Some(sink)),
            receiver: Mutex::new(None),
            display: Mutex::new(None),
            warning: Mutex::new(None),
        });

        let reader_shared = shared.clone();
        let reader = thread::Builder::new()
            .name("control-reader".to_string())
            .spawn(move || reader_loop(reader_shared, reader))?;

        tracing::info!(%server, resource, "connected");
        Ok(Self {
            shared,
            writer,
            server,
            reader: Some(reader),
        })
    }

    pub fn setup(&mut self) -> Result<bool> {
        self.send(Command::Setup)
    }

    pub fn play(&mut self) -> Result<bool> {
        self.send(Command::Play)
    }

    pub fn pause(&mut self) -> Result<bool> {
        self.send(Command::Pause)
    }

    pub fn teardown(&mut self) -> Result<bool> {
        self.send(Command::Teardown)
    }

    /// Send `command` if it is legal in the current state.
    ///
    /// Returns `Ok(false)` when the command was not sent.
    pub fn send(&mut self, command: Command) -> Result<bool> {
        if self.reader.as_ref().is_none_or(|reader| reader.is_finished()) {
            return Err(StreamError::NotConnected);
        }
        let Some(request) = self.shared.controller.lock().request(command) else {
            return Ok(false);
        };
        tracing::debug!(%command, cseq = ?request.cseq().ok(), "request");
        self.writer.write_all(request.serialize().as_bytes())?;
        Ok(true)
    }

    pub fn state(&self) -> SessionState {
        self.shared.controller.lock().state()
    }

    pub fn session_id(&self) -> Option<u32> {
        self.shared.controller.lock().session().id
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Block until the session reaches `state` or `timeout` passes.
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut controller = self.shared.controller.lock();
        while controller.state() != state {
            if self
                .shared
                .state_changed
                .wait_until(&mut controller, deadline)
                .timed_out()
            {
                return controller.state() == state;
            }
        }
        true
    }

    /// The most recent user-facing warning, if any (e.g. the data port
    /// could not be bound, or the server refused a command).
    pub fn take_warning(&self) -> Option<String> {
        self.shared.warning.lock().take()
    }

    /// Frames received but not yet displayed.
    pub fn buffer(&self) -> &JitterBuffer {
        &self.shared.buffer
    }

    /// Tear the session down (if one is open) and close the connection.
    pub fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        if !reader.is_finished() && matches!(self.state(), SessionState::Ready | SessionState::Playing) {
            let sent = self
                .shared
                .controller
                .lock()
                .request(Command::Teardown)
                .map(|request| self.writer.write_all(request.serialize().as_bytes()));
            if let Some(Ok(())) = sent {
                self.wait_for_state(SessionState::TornDown, TEARDOWN_GRACE);
            }
        }

        let _ = self.writer.shutdown(Shutdown::Both);
        if reader.join().is_err() {
            tracing::error!("control reader panicked");
        }
        self.shared.stop_workers();
        tracing::info!(server = %self.server, "disconnected");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read replies until the connection closes or the session is torn down.
fn reader_loop(shared: Arc<Shared>, mut reader: BufReader<TcpStream>) {
    loop {
        let text = match read_message(&mut reader) {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::info!("control connection closed by server");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "control read ended");
                break;
            }
        };

        let reply = match RtspResponse::parse(&text) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable reply");
                continue;
            }
        };

        let mut controller = shared.controller.lock();
        let outcome = controller.accept(&reply);
        match outcome {
            ReplyOutcome::Applied { command, from, to } => {
                tracing::info!(%command, %from, %to, session_id = ?controller.session().id, "reply applied");
                shared.on_applied(command, &mut controller);
            }
            ReplyOutcome::Failed {
                command,
                status_code,
            } => {
                shared.warn(format!("{command} failed: {status_code} {}", reply.status_text));
            }
            ReplyOutcome::StaleSequence { expected, got } => {
                tracing::debug!(?expected, ?got, "discarding reply with unexpected CSeq");
            }
            ReplyOutcome::WrongSession { expected, got } => {
                tracing::debug!(expected, ?got, "discarding reply for another session");
            }
        }
        let torn_down = controller.state() == SessionState::TornDown;
        drop(controller);
        shared.state_changed.notify_all();

        if torn_down {
            break;
        }
    }

    shared.stop_workers();
    shared.state_changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Frame;
    use std::io::BufRead;
    use std::net::TcpListener;

    struct NullSink;

    impl RenderSink for NullSink {
        fn present(&mut self, _frame: Frame) {}
    }

    fn config() -> ClientConfig {
        ClientConfig {
            rtp_port: 0,
            ..ClientConfig::default()
        }
    }

    /// Accepts one connection and answers each request with 200, echoing its CSeq.
    fn echo_server(session: u32) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut methods = Vec::new();
            while let Ok(Some(text)) = read_message(&mut reader) {
                let request = crate::protocol::RtspRequest::parse(&text).unwrap();
                methods.push(request.method.to_string());
                let reply = RtspResponse::ok().with_session(request.cseq().unwrap(), Some(session));
                writer.write_all(reply.serialize().as_bytes()).unwrap();
            }
            methods
        });
        (addr, handle)
    }

    #[test]
    fn walks_the_state_machine() {
        let (addr, server) = echo_server(424242);
        let mut client = Client::connect(addr, "movie.mjpeg", config(), Box::new(NullSink)).unwrap();

        assert!(!client.play().unwrap(), "PLAY before SETUP is not sent");
        assert!(client.setup().unwrap());
        assert!(client.wait_for_state(SessionState::Ready, Duration::from_secs(2)));
        assert_eq!(client.session_id(), Some(424242));
        assert!(client.take_warning().is_none());

        assert!(client.play().unwrap());
        assert!(client.wait_for_state(SessionState::Playing, Duration::from_secs(2)));
        assert!(client.pause().unwrap());
        assert!(client.wait_for_state(SessionState::Ready, Duration::from_secs(2)));
        assert!(client.teardown().unwrap());
        assert!(client.wait_for_state(SessionState::TornDown, Duration::from_secs(2)));

        client.close();
        assert_eq!(
            server.join().unwrap(),
            vec!["SETUP", "PLAY", "PAUSE", "TEARDOWN"]
        );
    }

    #[test]
    fn close_sends_teardown() {
        let (addr, server) = echo_server(111111);
        let mut client = Client::connect(addr, "movie.mjpeg", config(), Box::new(NullSink)).unwrap();
        client.setup().unwrap();
        assert!(client.wait_for_state(SessionState::Ready, Duration::from_secs(2)));
        drop(client);
        assert_eq!(server.join().unwrap(), vec!["SETUP", "TEARDOWN"]);
    }

    #[test]
    fn bind_failure_becomes_warning() {
        let taken = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let (addr, _server) = echo_server(123456);
        let config = ClientConfig {
            rtp_port: port,
            ..ClientConfig::default()
        };
        let mut client = Client::connect(addr, "movie.mjpeg", config, Box::new(NullSink)).unwrap();
        client.setup().unwrap();
        assert!(client.wait_for_state(SessionState::Ready, Duration::from_secs(2)));
        let warning = client.take_warning().unwrap();
        assert!(warning.contains(&port.to_string()), "{warning}");
    }

    #[test]
    fn error_reply_keeps_state_and_warns() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let text = read_message(&mut reader).unwrap().unwrap();
            let cseq = crate::protocol::RtspRequest::parse(&text).unwrap().cseq().unwrap();
            let reply = RtspResponse::not_found().with_session(cseq, None);
            writer.write_all(reply.serialize().as_bytes()).unwrap();
            // Hold the connection open until the client hangs up.
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
        });

        let mut client = Client::connect(addr, "missing.mjpeg", config(), Box::new(NullSink)).unwrap();
        client.setup().unwrap();
        let mut warning = None;
        for _ in 0..200 {
            warning = client.take_warning();
            if warning.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(warning.unwrap().contains("404"));
        assert_eq!(client.state(), SessionState::Init);
        drop(client);
        server.join().unwrap();
    }
}
