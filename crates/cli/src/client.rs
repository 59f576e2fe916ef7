use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use clap::Parser;
use mjpeg_rtsp::{
    Client, ClientConfig, Command, Frame, JitterConfig, PlaybackStatus, RenderSink, SessionState,
};

/// How long to wait for a reply before giving the prompt back.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "mjpeg-client", about = "Play an MJPEG stream from an mjpeg-server")]
struct Args {
    /// Server control address (host:port)
    #[arg(long, short, default_value = "127.0.0.1:8554")]
    server: String,

    /// Video file to request
    resource: String,

    /// Local UDP port for incoming media
    #[arg(long, short = 'p', default_value_t = 25000)]
    rtp_port: u16,

    /// Display frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Frames to buffer before playback starts
    #[arg(long, default_value_t = 40)]
    buffer: usize,

    /// Directory for the displayed-frame cache file
    #[arg(long, default_value = ".")]
    cache_dir: PathBuf,
}

/// Writes the most recent frame to `cache-<session>.jpg` for an external viewer.
struct FileSink {
    dir: PathBuf,
    /// Set by the command loop once SETUP has been answered.
    session: Arc<AtomicU32>,
    written: Option<PathBuf>,
    frames: u64,
}

impl FileSink {
    fn new(dir: PathBuf, session: Arc<AtomicU32>) -> Self {
        Self {
            dir,
            session,
            written: None,
            frames: 0,
        }
    }
}

impl RenderSink for FileSink {
    fn present(&mut self, frame: Frame) {
        let path = self
            .dir
            .join(format!("cache-{}.jpg", self.session.load(Ordering::Relaxed)));
        if let Err(e) = fs::write(&path, frame.as_bytes()) {
            tracing::warn!(path = %path.display(), error = %e, "cannot write frame");
            return;
        }
        self.written = Some(path);
        self.frames += 1;
    }

    fn status(&mut self, status: PlaybackStatus) {
        match status {
            PlaybackStatus::Buffering { buffered, target } => {
                println!("Buffering... ({buffered}/{target})");
            }
            PlaybackStatus::Playing { buffered } => {
                println!("Playing (buffer: {buffered})");
            }
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        tracing::debug!(frames = self.frames, "display sink closed");
        if let Some(path) = self.written.take() {
            let _ = fs::remove_file(path);
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ClientConfig {
        rtp_port: args.rtp_port,
        frame_rate: args.fps,
        jitter: JitterConfig::with_high_threshold(args.buffer),
        ..ClientConfig::default()
    };

    let session = Arc::new(AtomicU32::new(0));
    let sink = Box::new(FileSink::new(args.cache_dir.clone(), session.clone()));

    let mut client = match Client::connect(&args.server, &args.resource, config, sink) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Connection to {} failed: {e}", args.server);
            std::process::exit(1);
        }
    };

    println!("Commands: setup, play, pause, teardown, quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let command = match line.trim().to_ascii_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "setup" => Command::Setup,
            "play" => Command::Play,
            "pause" => Command::Pause,
            "teardown" => Command::Teardown,
            other => {
                println!("unknown command: {other}");
                continue;
            }
        };

        match client.send(command) {
            Ok(true) => {
                let expected = client.state().apply(command).unwrap_or(client.state());
                client.wait_for_state(expected, REPLY_TIMEOUT);
            }
            Ok(false) => println!("{command} is not valid while {}", client.state()),
            Err(e) => {
                eprintln!("{command} failed: {e}");
                break;
            }
        }

        if let Some(warning) = client.take_warning() {
            println!("warning: {warning}");
        }
        print!("[{}", client.state());
        if let Some(id) = client.session_id() {
            session.store(id, Ordering::Relaxed);
            print!(" session {id}");
        }
        println!("]");
        let _ = io::stdout().flush();

        if client.state() == SessionState::TornDown {
            break;
        }
    }

    client.close();
}
