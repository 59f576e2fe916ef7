//! Text control protocol.
//!
//! Requests and replies are line-oriented, with RTSP-style framing. Each
//! message ends with a blank line:
//!
//! ```text
//! SETUP movie.mjpeg RTSP/1.0
//! CSeq: 1
//! Transport: RTP/UDP; client_port= 25000
//!
//! RTSP/1.0 200 OK
//! CSeq: 1
//! Session: 123456
//! ```
//!
//! ## Methods
//!
//! | Method | Legal in | Effect |
//! |--------|----------|--------|
//! | SETUP | INIT | Open the source, allocate a session id and data socket |
//! | PLAY | READY, PLAYING | Start (or keep) the transmit worker |
//! | PAUSE | PLAYING | Stop the transmit worker, keep its position |
//! | TEARDOWN | any but TORN_DOWN | Stop everything and close the session |
//!
//! A command that is not legal in the current state gets no reply at all.
//! Replies use three codes: `200 OK`, `404 Not Found`, `500 Connection Error`.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::Responder;
pub use request::RtspRequest;
pub use response::RtspResponse;
