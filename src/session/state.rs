//! Session state machine.
//!
//! ```text
//! Disconnected ──send Handshake──► Handshaking ──recv ack──► Authenticated
//!      Authenticated ──send Auth──► Authenticating ──recv ack──► Idle
//!      Idle ──send Query──► Querying ──recv Schema──► Streaming
//!      Streaming ──recv Batch──► Streaming ──recv Complete──► Idle
//!      Querying | Streaming ──recv Error──► Failed (recoverable) ──reset──► Idle
//! ```
//!
//! Every legal ordering is one arm of [`transition`]; anything that falls
//! through is `UnexpectedMessageOrder`. The machine performs no I/O.

use std::fmt;

use crate::codec::Message;
use crate::error::CubeError;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handshake sent yet.
    Disconnected,
    /// Handshake sent, awaiting the server's answer.
    Handshaking,
    /// Handshake accepted; credentials not sent yet.
    Authenticated,
    /// Auth sent, awaiting the server's answer.
    Authenticating,
    /// Ready for a query.
    Idle,
    /// Query sent, awaiting the schema.
    Querying,
    /// Schema received; batches until completion.
    Streaming,
    /// The last exchange failed. Recoverable failures can return to `Idle`.
    Failed { recoverable: bool },
    /// Closed by the caller.
    Closed,
}

impl SessionState {
    /// Stable name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Handshaking => "Handshaking",
            SessionState::Authenticated => "Authenticated",
            SessionState::Authenticating => "Authenticating",
            SessionState::Idle => "Idle",
            SessionState::Querying => "Querying",
            SessionState::Streaming => "Streaming",
            SessionState::Failed { .. } => "Failed",
            SessionState::Closed => "Closed",
        }
    }

    /// Whether a query is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Querying | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something sent or received on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<'a> {
    SendHandshake,
    SendAuth,
    SendQuery,
    /// Any non-`Error` frame during handshake or auth; payload is opaque.
    Ack,
    Schema,
    Batch,
    Complete { rows_affected: u64 },
    ServerError { message: &'a str },
    /// A client-only message (Handshake/Auth/Query) arriving from the server.
    Misdirected { message: &'static str },
}

impl<'a> Event<'a> {
    /// Map a received message to its event.
    pub fn received(message: &'a Message) -> Self {
        match message {
            Message::QueryResponseSchema { .. } => Event::Schema,
            Message::QueryResponseBatch { .. } => Event::Batch,
            Message::QueryComplete { rows_affected } => Event::Complete {
                rows_affected: *rows_affected,
            },
            Message::Error { message } => Event::ServerError { message },
            other => Event::Misdirected {
                message: other.message_type().name(),
            },
        }
    }

    /// Name reported in `UnexpectedMessageOrder`.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SendHandshake => "send Handshake",
            Event::SendAuth => "send Auth",
            Event::SendQuery => "send Query",
            Event::Ack => "acknowledgement",
            Event::Schema => "QueryResponseSchema",
            Event::Batch => "QueryResponseBatch",
            Event::Complete { .. } => "QueryComplete",
            Event::ServerError { .. } => "Error",
            Event::Misdirected { message } => *message,
        }
    }

    fn is_send(&self) -> bool {
        matches!(
            self,
            Event::SendHandshake | Event::SendAuth | Event::SendQuery
        )
    }
}

/// What a successful transition means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    HandshakeAccepted,
    AuthAccepted,
    SchemaReceived,
    BatchReceived,
    Completed { rows_affected: u64 },
}

/// Result of applying one event to one state.
#[derive(Debug)]
pub struct Step {
    pub next: SessionState,
    pub outcome: Result<Outcome, CubeError>,
}

impl Step {
    fn ok(next: SessionState, outcome: Outcome) -> Self {
        Self {
            next,
            outcome: Ok(outcome),
        }
    }

    fn fail(next: SessionState, err: CubeError) -> Self {
        Self {
            next,
            outcome: Err(err),
        }
    }
}

/// The transition table.
pub fn transition(state: SessionState, event: &Event<'_>) -> Step {
    use Event as E;
    use SessionState as S;

    const FATAL: S = S::Failed { recoverable: false };
    const RECOVERABLE: S = S::Failed { recoverable: true };

    match (state, event) {
        (S::Disconnected, E::SendHandshake) => Step::ok(S::Handshaking, Outcome::Sent),
        (S::Handshaking, E::Ack) => Step::ok(S::Authenticated, Outcome::HandshakeAccepted),
        (S::Handshaking, E::ServerError { message }) => {
            Step::fail(FATAL, CubeError::HandshakeRejected(message.to_string()))
        }

        (S::Authenticated, E::SendAuth) => Step::ok(S::Authenticating, Outcome::Sent),
        (S::Authenticating, E::Ack) => Step::ok(S::Idle, Outcome::AuthAccepted),
        (S::Authenticating, E::ServerError { message }) => {
            Step::fail(FATAL, CubeError::AuthenticationFailed(message.to_string()))
        }

        (S::Idle, E::SendQuery) => Step::ok(S::Querying, Outcome::Sent),
        (S::Querying, E::Schema) => Step::ok(S::Streaming, Outcome::SchemaReceived),
        (S::Streaming, E::Batch) => Step::ok(S::Streaming, Outcome::BatchReceived),
        (S::Streaming, E::Complete { rows_affected }) => Step::ok(
            S::Idle,
            Outcome::Completed {
                rows_affected: *rows_affected,
            },
        ),
        (S::Querying | S::Streaming, E::ServerError { message }) => {
            Step::fail(RECOVERABLE, CubeError::Server(message.to_string()))
        }

        // Misuse by the caller: nothing was sent, the state stays put.
        (state, event) if event.is_send() || state == S::Closed => Step::fail(
            state,
            if state == S::Closed {
                CubeError::SessionClosed
            } else {
                CubeError::InvalidState {
                    state: state.name(),
                    operation: event.name(),
                }
            },
        ),

        (state, event) => Step::fail(
            FATAL,
            CubeError::UnexpectedMessageOrder {
                state: state.name(),
                event: event.name(),
            },
        ),
    }
}

/// Owned session state with transition bookkeeping.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    failure: Option<String>,
}

impl Session {
    /// A session that has not connected yet.
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply an event and move to the resulting state.
    pub fn apply(&mut self, event: Event<'_>) -> Result<Outcome, CubeError> {
        let from = self.state;
        let step = transition(from, &event);
        self.state = step.next;

        match &step.outcome {
            Ok(_) => {
                tracing::trace!(from = %from, to = %step.next, event = event.name(), "session transition")
            }
            Err(err) => {
                tracing::debug!(from = %from, to = %step.next, event = event.name(), error = %err, "session transition failed");
                if matches!(step.next, SessionState::Failed { .. }) {
                    self.failure = Some(err.to_string());
                }
            }
        }

        step.outcome
    }

    /// Why the session entered `Failed`, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Acknowledge a recoverable failure and return to `Idle`.
    pub fn reset(&mut self) -> Result<(), CubeError> {
        match self.state {
            SessionState::Failed { recoverable: true } => {
                self.state = SessionState::Idle;
                self.failure = None;
                Ok(())
            }
            SessionState::Closed => Err(CubeError::SessionClosed),
            other => Err(CubeError::InvalidState {
                state: other.name(),
                operation: "reset",
            }),
        }
    }

    /// Mark the session unusable after a transport or framing failure.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Failed { recoverable: false };
            self.failure = Some(reason.into());
        }
    }

    /// Close; idempotent.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
