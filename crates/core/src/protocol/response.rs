use std::fmt::Write as _;

use super::request::{RTSP_VERSION, find_header, parse_headers};
use crate::error::{ParseErrorKind, Result, StreamError};

/// A control reply.
///
/// Serializes to:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Session: 123456\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then
/// call [`serialize`](Self::serialize). The controller side reads replies
/// back with [`parse`](Self::parse).
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
        }
    }

    /// 200 OK: the command was applied.
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found: the requested video resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 500 Connection Error: the data channel could not be set up.
    pub fn connection_error() -> Self {
        Self::new(500, "Connection Error")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// `CSeq` followed by `Session` (when one exists): the headers every reply carries.
    pub fn with_session(self, cseq: u32, session_id: Option<u32>) -> Self {
        let resp = self.add_header("CSeq", &cseq.to_string());
        match session_id {
            Some(id) => resp.add_header("Session", &id.to_string()),
            None => resp,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.parse().ok())
    }

    pub fn session_id(&self) -> Option<u32> {
        self.get_header("Session")
            .and_then(|s| s.split(';').next())
            .and_then(|s| s.trim().parse().ok())
    }

    /// Serialize to the text wire format, terminated by a blank line.
    pub fn serialize(&self) -> String {
        let mut response = format!("{RTSP_VERSION} {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            let _ = write!(response, "{name}: {value}\r\n");
        }
        response.push_str("\r\n");
        response
    }

    /// Parse a reply (status line, headers, blank line).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(StreamError::parse(ParseErrorKind::EmptyMessage))?;

        let mut parts = status_line.splitn(3, ' ');
        let (Some(version), Some(code), reason) = (parts.next(), parts.next(), parts.next()) else {
            return Err(StreamError::parse(ParseErrorKind::InvalidStatusLine));
        };
        if !version.starts_with("RTSP/") {
            return Err(StreamError::parse(ParseErrorKind::InvalidStatusLine));
        }
        let status_code = code
            .trim()
            .parse()
            .map_err(|_| StreamError::parse(ParseErrorKind::InvalidStatusLine))?;

        let resp = Self {
            status_code,
            status_text: reason.unwrap_or("").trim().to_string(),
            headers: parse_headers(lines)?,
        };
        if resp.cseq().is_none() {
            return Err(StreamError::parse(ParseErrorKind::MissingCSeq));
        }
        Ok(resp)
    }
}
