//! Controller-side (client) view of the session.
//!
//! The controller only issues commands that are legal in its current
//! state, numbers them with a monotonically increasing `CSeq`, and moves
//! state only when the matching reply arrives:
//!
//! - the reply's `CSeq` must equal the most recent request's;
//! - once a session id has been learned, the reply's id must equal it.
//!
//! Replies failing either check are discarded without a state change.

use std::net::SocketAddr;

use super::{Command, Session, SessionState, TransportHeader};
use crate::protocol::{RtspRequest, RtspResponse};

/// What an incoming reply did to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// 200 reply to the request in flight; the session moved `from` → `to`.
    Applied {
        command: Command,
        from: SessionState,
        to: SessionState,
    },
    /// Matching reply with a non-200 code; state unchanged.
    Failed { command: Command, status_code: u16 },
    /// `CSeq` does not match the request in flight.
    StaleSequence { expected: Option<u32>, got: Option<u32> },
    /// Session id differs from the one already learned.
    WrongSession { expected: u32, got: Option<u32> },
}

#[derive(Debug, Clone)]
pub struct Controller {
    session: Session,
    resource: String,
    rtp_port: u16,
    /// `CSeq` of the request awaiting a reply.
    in_flight: Option<u32>,
}

impl Controller {
    pub fn new(server: SocketAddr, resource: &str, rtp_port: u16) -> Self {
        Self {
            session: Session::new(server),
            resource: resource.to_string(),
            rtp_port,
            in_flight: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Build the next request, or `None` if `command` is not legal now.
    pub fn request(&mut self, command: Command) -> Option<RtspRequest> {
        if !self.session.state.accepts(command) {
            tracing::debug!(%command, state = %self.session.state, "command not valid in current state");
            return None;
        }

        self.session.cseq += 1;
        self.session.last_command = Some(command);
        self.in_flight = Some(self.session.cseq);

        let mut request = RtspRequest::new(command, &self.resource, self.session.cseq);
        if command == Command::Setup {
            request = request.add_header("Transport", &TransportHeader::new(self.rtp_port).format());
        }
        if let Some(id) = self.session.id {
            request = request.add_header("Session", &id.to_string());
        }
        Some(request)
    }

    /// Validate a reply against the request in flight and apply it.
    pub fn accept(&mut self, reply: &RtspResponse) -> ReplyOutcome {
        let got = reply.cseq();
        if self.in_flight.is_none() || got != self.in_flight {
            return ReplyOutcome::StaleSequence {
                expected: self.in_flight,
                got,
            };
        }

        match (self.session.id, reply.session_id()) {
            (Some(expected), got) if got != Some(expected) => {
                return ReplyOutcome::WrongSession { expected, got };
            }
            (None, Some(id)) => {
                self.session.id = Some(id);
                tracing::debug!(session_id = id, "learned session id");
            }
            _ => {}
        }

        self.in_flight = None;
        // in_flight is only ever set together with last_command.
        let Some(command) = self.session.last_command else {
            return ReplyOutcome::StaleSequence { expected: None, got };
        };

        if !reply.is_ok() {
            return ReplyOutcome::Failed {
                command,
                status_code: reply.status_code,
            };
        }

        let from = self.session.state;
        match self.session.transition(command) {
            Some(to) => ReplyOutcome::Applied { command, from, to },
            None => ReplyOutcome::Failed {
                command,
                status_code: reply.status_code,
            },
        }
    }

    /// Record where media datagrams are received.
    pub fn set_data_peer(&mut self, addr: SocketAddr) {
        self.session.data_peer = Some(addr);
    }
}
