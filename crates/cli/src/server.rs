use std::io;
use std::path::PathBuf;

use clap::Parser;
use mjpeg_rtsp::{Server, ServerConfig, TransportConfig};

#[derive(Parser)]
#[command(name = "mjpeg-server", about = "Stream MJPEG files to clients over RTP/UDP")]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Directory holding the video files clients may request
    #[arg(long, short = 'm', default_value = ".")]
    media_root: PathBuf,

    /// Frames sent per second to each playing client
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Link MTU used to size RTP payloads
    #[arg(long, default_value_t = 1500)]
    mtu: usize,

    /// Fixed RTP payload size, overriding the MTU-derived one
    #[arg(long)]
    max_payload: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ServerConfig {
        frame_rate: args.fps,
        transport: TransportConfig {
            mtu: args.mtu,
            max_payload_override: args.max_payload,
            ..TransportConfig::default()
        },
        ..ServerConfig::default()
    };
    let mut server = Server::with_config(&args.bind, config).with_media_root(&args.media_root);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {e}");
        std::process::exit(1);
    }

    println!(
        "Serving {} on {}, press Enter to stop",
        args.media_root.display(),
        args.bind
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    server.stop();
}
