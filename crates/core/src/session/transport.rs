/// Client-side transport info from the `Transport` header of SETUP.
///
/// The client names the UDP port it listens on for media:
///
/// ```text
/// Transport: RTP/UDP; client_port= 25000
/// ```
///
/// A `client_port=RTP-RTCP` range is also accepted; only the RTP port is
/// used since no RTCP flow exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    /// Client's RTP receive port.
    pub client_port: u16,
}

impl TransportHeader {
    pub fn new(client_port: u16) -> Self {
        Self { client_port }
    }

    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use mjpeg_rtsp::session::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/UDP; client_port= 25000").unwrap();
    /// assert_eq!(th.client_port, 25000);
    ///
    /// assert!(TransportHeader::parse("RTP/UDP").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        header.split(';').find_map(|part| {
            let ports = part.trim().strip_prefix("client_port=")?;
            let rtp = ports.split('-').next()?.trim();
            rtp.parse().ok().map(Self::new)
        })
    }

    /// Header value in the form clients send.
    pub fn format(&self) -> String {
        format!("RTP/UDP; client_port= {}", self.client_port)
    }
}
