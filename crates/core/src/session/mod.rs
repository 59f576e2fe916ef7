//! Session state machine shared by both control endpoints.
//!
//! A session pairs one controller (client) with one responder (server)
//! across one control connection and one datagram flow. Both ends walk
//! the same transition table:
//!
//! ```text
//! SETUP     INIT    -> READY
//! PLAY      READY   -> PLAYING   (PLAYING -> PLAYING is a no-op success)
//! PAUSE     PLAYING -> READY
//! TEARDOWN  any     -> TORN_DOWN
//! ```
//!
//! Commands outside their source state are ignored: no transition, and
//! no reply from the responder.

pub mod controller;
pub mod transport;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use rand::Rng;

use crate::error::{ParseErrorKind, StreamError};
pub use controller::{Controller, ReplyOutcome};
pub use transport::TransportHeader;

/// Range of server-chosen session identifiers (six decimal digits).
pub const SESSION_ID_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// Control-protocol session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Ready,
    Playing,
    /// Terminal; every command is ignored from here on.
    TornDown,
}

impl SessionState {
    /// State reached by applying `command`, or `None` if it is not legal here.
    pub fn apply(self, command: Command) -> Option<SessionState> {
        use Command::*;
        use SessionState::*;
        match (self, command) {
            (Init, Setup) => Some(Ready),
            (Ready | Playing, Play) => Some(Playing),
            (Playing, Pause) => Some(Ready),
            (TornDown, Teardown) => None,
            (_, Teardown) => Some(TornDown),
            _ => None,
        }
    }

    pub fn accepts(self, command: Command) -> bool {
        self.apply(command).is_some()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Playing => "PLAYING",
            Self::TornDown => "TORN_DOWN",
        })
    }
}

/// Control-protocol method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Setup,
    Play,
    Pause,
    Teardown,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETUP" => Ok(Self::Setup),
            "PLAY" => Ok(Self::Play),
            "PAUSE" => Ok(Self::Pause),
            "TEARDOWN" => Ok(Self::Teardown),
            _ => Err(StreamError::parse(ParseErrorKind::UnknownMethod)),
        }
    }
}

/// Per-session control record, held by whichever endpoint owns the session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Server-chosen identifier; `None` until SETUP succeeds (or, on the
    /// controller, until the first reply carrying it is accepted).
    pub id: Option<u32>,
    pub state: SessionState,
    /// Last CSeq sent (controller) or received (responder).
    pub cseq: u32,
    pub last_command: Option<Command>,
    /// Remote end of the control connection.
    pub control_peer: SocketAddr,
    /// Where media datagrams go (responder) or are received (controller).
    pub data_peer: Option<SocketAddr>,
}

impl Session {
    pub fn new(control_peer: SocketAddr) -> Self {
        Self {
            id: None,
            state: SessionState::Init,
            cseq: 0,
            last_command: None,
            control_peer,
            data_peer: None,
        }
    }

    /// Apply a command; returns the new state if the transition was legal.
    pub fn transition(&mut self, command: Command) -> Option<SessionState> {
        let next = self.state.apply(command)?;
        tracing::debug!(
            session_id = ?self.id,
            old_state = %self.state,
            new_state = %next,
            %command,
            "state transition"
        );
        self.state = next;
        Some(next)
    }
}

/// Random six-digit session identifier.
pub fn generate_session_id() -> u32 {
    rand::thread_rng().gen_range(SESSION_ID_RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Command::*;
    use SessionState::*;

    #[test]
    fn legal_transitions() {
        assert_eq!(Init.apply(Setup), Some(Ready));
        assert_eq!(Ready.apply(Play), Some(Playing));
        assert_eq!(Playing.apply(Play), Some(Playing));
        assert_eq!(Playing.apply(Pause), Some(Ready));
        for state in [Init, Ready, Playing] {
            assert_eq!(state.apply(Teardown), Some(TornDown));
        }
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        assert_eq!(Init.apply(Play), None);
        assert_eq!(Init.apply(Pause), None);
        assert_eq!(Ready.apply(Setup), None);
        assert_eq!(Ready.apply(Pause), None);
        assert_eq!(Playing.apply(Setup), None);
        for command in [Setup, Play, Pause, Teardown] {
            assert_eq!(TornDown.apply(command), None);
        }
    }

    #[test]
    fn session_walks_full_cycle() {
        let mut session = Session::new("127.0.0.1:1".parse().unwrap());
        assert!(session.transition(Play).is_none());
        assert_eq!(session.state, Init);
        for command in [Setup, Play, Pause, Play, Teardown] {
            assert!(session.transition(command).is_some(), "{command}");
        }
        assert_eq!(session.state, TornDown);
    }

    #[test]
    fn command_parse() {
        assert_eq!("SETUP".parse::<Command>().unwrap(), Setup);
        assert_eq!("TEARDOWN".parse::<Command>().unwrap(), Teardown);
        assert!("DESCRIBE".parse::<Command>().is_err());
        assert!("play".parse::<Command>().is_err());
    }

    #[test]
    fn session_ids_have_six_digits() {
        for _ in 0..100 {
            let id = generate_session_id();
            assert!(SESSION_ID_RANGE.contains(&id));
        }
    }
}
