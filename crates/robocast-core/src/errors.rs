use thiserror::Error;

use crate::events::{MediaKind, ParticipantId};

#[derive(Debug, Error)]
pub enum RobocastError {
    /// Malformed or unknown event shape. State is never mutated.
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    /// Unpublish/leave for a participant the registry has never seen.
    #[error("out-of-order event for unknown participant {participant}: {event}")]
    OutOfOrderEvent {
        participant: ParticipantId,
        event: &'static str,
    },
    #[error("subscribe to {kind} of participant {participant} failed: {reason}")]
    SubscriptionFailure {
        participant: ParticipantId,
        kind: MediaKind,
        reason: String,
    },
    #[error("session credential unavailable: {0}")]
    CredentialUnavailable(String),
    #[error("connection failed: {0}")]
    ConnectionFailure(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid room: {0}")]
    InvalidRoom(String),
    #[error("a command is already in flight")]
    ControlBusy,
    #[error("controls are disabled in this room")]
    ControlDisabled,
}
