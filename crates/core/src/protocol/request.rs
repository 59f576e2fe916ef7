use std::fmt::Write as _;

use crate::error::{ParseErrorKind, Result, StreamError};
use crate::session::{Command, TransportHeader};

/// Protocol version on every request and reply line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// A control request.
///
/// Wire format:
///
/// ```text
/// Method SP resource-name SP RTSP/1.0 CRLF
/// CSeq: <int> CRLF
/// [Transport: RTP/UDP; client_port= <port> CRLF]   (SETUP only)
/// [Session: <id> CRLF]                              (all but the first SETUP)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Command,
    /// Name of the video resource (e.g. `movie.mjpeg`).
    pub resource: String,
    pub version: String,
    /// Headers as ordered (name, value) pairs.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Command, resource: &str, cseq: u32) -> Self {
        Self {
            method,
            resource: resource.to_string(),
            version: RTSP_VERSION.to_string(),
            headers: vec![("CSeq".to_string(), cseq.to_string())],
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Parse a complete request (request line, headers, blank line).
    ///
    /// Returns [`StreamError::Parse`] on malformed input, an unknown
    /// method, or a missing/non-numeric `CSeq`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(StreamError::parse(ParseErrorKind::EmptyMessage))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, resource, version] = parts[..] else {
            return Err(StreamError::parse(ParseErrorKind::InvalidRequestLine));
        };

        let method: Command = method.parse()?;
        if version != RTSP_VERSION {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let headers = parse_headers(lines)?;
        let request = Self {
            method,
            resource: resource.to_string(),
            version: version.to_string(),
            headers,
        };
        request.cseq()?;
        Ok(request)
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The request's `CSeq`, which the reply must echo.
    pub fn cseq(&self) -> Result<u32> {
        self.get_header("CSeq")
            .and_then(|v| v.parse().ok())
            .ok_or(StreamError::parse(ParseErrorKind::MissingCSeq))
    }

    /// The `Session` header as an integer, if present and numeric.
    pub fn session_id(&self) -> Option<u32> {
        self.get_header("Session")
            .and_then(|s| s.split(';').next())
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn transport(&self) -> Option<TransportHeader> {
        self.get_header("Transport").and_then(TransportHeader::parse)
    }

    /// Serialize to the text wire format, terminated by a blank line.
    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.resource, self.version);
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("\r\n");
        out
    }
}

pub(crate) fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(StreamError::parse(ParseErrorKind::InvalidHeader))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
