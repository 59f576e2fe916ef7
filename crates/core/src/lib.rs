pub mod client;
pub mod error;
pub mod jitter;
pub mod media;
pub mod pacing;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod signal;
pub mod transport;
pub mod worker;

pub use client::{Client, ClientConfig};
pub use error::{Result, StreamError};
pub use jitter::{JitterBuffer, JitterConfig};
pub use media::{Frame, MemorySource, MjpegFile, Packetizer, VideoSource};
pub use pacing::Pacer;
pub use registry::SourceRegistry;
pub use server::{Server, ServerConfig};
pub use session::{Command, SessionState};
pub use signal::Signal;
pub use transport::TransportConfig;
pub use worker::{PlaybackStatus, RenderSink};
