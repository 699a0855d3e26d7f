//! Errors reported back to a single connection.
//!
//! Everything that can go wrong while serving a request ends up as a
//! [`SessionError`]. The connection task turns it into a `CommandError` event
//! for the requesting client; no error ever changes another connection's state.

use huddle_api::proto::{self, server_event::Kind, ErrorKind};
use std::{future::Future, time::Duration};
use thiserror::Error;

use crate::registry::ConnId;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Invalid username or password.")]
    Unauthenticated,

    #[error("Room '{0}' does not exist.")]
    RoomNotFound(String),

    #[error("You are not in a room. Join one first.")]
    NotInRoom,

    #[error("You are not in the specified room. Please join it first.")]
    RoomMismatch { declared: String, current: String },

    #[error("delivery to connection {0} failed")]
    DeliveryFailure(ConnId),

    #[error("The server timed out, please try again.")]
    LookupTimeout,

    #[error("{0}")]
    InvalidRequest(&'static str),

    #[error("Username '{0}' is already taken.")]
    UsernameTaken(String),

    #[error("Could not allocate a room code after {attempts} attempts.")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("room code {0} is already in use")]
    RoomCodeTaken(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::RoomNotFound(_) => ErrorKind::RoomNotFound,
            Self::NotInRoom => ErrorKind::NotInRoom,
            Self::RoomMismatch { .. } => ErrorKind::RoomMismatch,
            Self::LookupTimeout => ErrorKind::LookupTimeout,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::UsernameTaken(_) => ErrorKind::UsernameTaken,
            Self::CodeSpaceExhausted { .. } => ErrorKind::CodeSpaceExhausted,
            Self::DeliveryFailure(_) | Self::RoomCodeTaken(_) | Self::Storage(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Build the envelope sent to the client that caused this error.
    pub fn to_envelope(&self) -> proto::Envelope {
        // Storage details stay in the server log.
        let message = match self {
            Self::Storage(_) | Self::RoomCodeTaken(_) | Self::DeliveryFailure(_) => {
                "Server error, please try again.".to_string()
            }
            other => other.to_string(),
        };
        huddle_api::server_event(Kind::Error(proto::CommandError {
            kind: self.kind() as i32,
            message,
        }))
    }
}

impl From<sled::Error> for SessionError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<bincode::Error> for SessionError {
    fn from(e: bincode::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Run a collaborator call, failing with [`SessionError::LookupTimeout`] if it
/// does not finish within `limit`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> SessionResult<T>
where
    F: Future<Output = SessionResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::LookupTimeout),
    }
}
