//! Call Session State Machine
//!
//! The complete transition table for one call attempt, expressed as the pure
//! function [`transition`], and the [`CallSession`] record the controller
//! owns for the lifetime of that attempt.

use secrecy::SecretString;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    Connecting,
    Active,
    Ending,
    Ended,
    Failed,
}

impl SessionState {
    pub const ALL: [SessionState; 7] = [
        SessionState::Idle,
        SessionState::Requesting,
        SessionState::Connecting,
        SessionState::Active,
        SessionState::Ending,
        SessionState::Ended,
        SessionState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }

    /// A new session may only be started from these states.
    pub fn accepts_new_session(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Ended | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Inputs to the state machine. Payloads (tokens, reasons) travel alongside
/// the event in the controller; the table only depends on the event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// User-initiated start with a non-empty agent id.
    Start,
    /// Backend returned a valid `{access_token, call_id}` pair.
    Registered,
    /// Registration errored or returned a malformed payload.
    RegistrationFailed,
    TransportStarted,
    /// Normal remote termination.
    TransportEnded,
    /// Connection error or fatal transport error.
    TransportFailed,
    ConnectTimedOut,
    /// User-initiated stop or cancel.
    UserEnd,
    TeardownAcknowledged,
}

impl SessionEvent {
    pub const ALL: [SessionEvent; 9] = [
        SessionEvent::Start,
        SessionEvent::Registered,
        SessionEvent::RegistrationFailed,
        SessionEvent::TransportStarted,
        SessionEvent::TransportEnded,
        SessionEvent::TransportFailed,
        SessionEvent::ConnectTimedOut,
        SessionEvent::UserEnd,
        SessionEvent::TeardownAcknowledged,
    ];
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("no transition from `{from}` on {event:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

/// The transition table. Every pair not listed here is rejected.
pub fn transition(
    from: SessionState,
    event: SessionEvent,
) -> Result<SessionState, InvalidTransition> {
    use SessionEvent as E;
    use SessionState as S;

    let to = match (from, event) {
        (S::Idle, E::Start) => S::Requesting,

        (S::Requesting, E::Registered) => S::Connecting,
        (S::Requesting, E::RegistrationFailed | E::UserEnd) => S::Failed,

        (S::Connecting, E::TransportStarted) => S::Active,
        (
            S::Connecting,
            E::TransportFailed | E::TransportEnded | E::ConnectTimedOut | E::UserEnd,
        ) => S::Failed,

        (S::Active, E::UserEnd | E::TransportFailed) => S::Ending,
        (S::Active, E::TransportEnded) => S::Ended,

        (S::Ending, E::TeardownAcknowledged) => S::Ended,

        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(to)
}

/// One attempt to establish and run a single live call.
///
/// Sessions are never reused: once terminal, a new call needs a new session
/// with a fresh [`CallSession::id`].
#[derive(Debug)]
pub struct CallSession {
    id: Uuid,
    agent_id: String,
    state: SessionState,
    call_id: Option<String>,
    access_token: Option<SecretString>,
    last_error: Option<String>,
}

impl CallSession {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            state: SessionState::Idle,
            call_id: None,
            access_token: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn access_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Applies `event`, clearing `last_error` on success.
    ///
    /// `TeardownAcknowledged` keeps the error that caused the teardown so the
    /// final state still carries its reason. The access token is dropped as
    /// soon as the session leaves `Connecting`/`Active`.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        let next = transition(self.state, event)?;
        self.state = next;
        if event != SessionEvent::TeardownAcknowledged {
            self.last_error = None;
        }
        if !matches!(next, SessionState::Connecting | SessionState::Active) {
            self.access_token = None;
        }
        Ok(next)
    }

    /// Applies `event` and records `reason` as the session's last error.
    pub fn apply_with_error(
        &mut self,
        event: SessionEvent,
        reason: impl Into<String>,
    ) -> Result<SessionState, InvalidTransition> {
        let next = self.apply(event)?;
        self.last_error = Some(reason.into());
        Ok(next)
    }

    /// Moves to `Connecting` with the registration's credentials attached.
    pub fn registered(
        &mut self,
        call_id: String,
        access_token: SecretString,
    ) -> Result<SessionState, InvalidTransition> {
        let next = self.apply(SessionEvent::Registered)?;
        self.call_id = Some(call_id);
        self.access_token = Some(access_token);
        Ok(next)
    }
}
