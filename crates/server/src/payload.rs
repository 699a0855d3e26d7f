//! Messages fanned out to connections.

use bytes::Bytes;
use huddle_api::proto::{self, server_event::Kind};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::identity::IdentityHandle;

/// An encoded, length-prefixed envelope ready to be written to a stream.
/// Cloning is a reference-count bump, so one encoding serves every recipient.
pub type Frame = Bytes;

/// What gets delivered to a room. Built once, never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Server-generated notice (presence, room closed, confirmations).
    System { text: String },
    /// A user's chat line, stamped by the server.
    Chat {
        sender_id: u64,
        sender: String,
        text: String,
        timestamp_ms: i64,
    },
}

impl Payload {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    /// A chat message from `from`, stamped with the current time.
    pub fn chat(from: &IdentityHandle, text: impl Into<String>) -> Self {
        Self::Chat {
            sender_id: from.user_id,
            sender: from.username.clone(),
            text: text.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn to_envelope(&self) -> proto::Envelope {
        let kind = match self {
            Self::System { text } => Kind::System(proto::SystemNotice { text: text.clone() }),
            Self::Chat {
                sender_id,
                sender,
                text,
                timestamp_ms,
            } => Kind::Chat(proto::ChatBroadcast {
                sender_id: *sender_id,
                sender: sender.clone(),
                text: text.clone(),
                timestamp_ms: *timestamp_ms,
            }),
        };
        huddle_api::server_event(kind)
    }

    pub fn to_frame(&self) -> Frame {
        encode(&self.to_envelope())
    }
}

/// Encode any envelope into a frame.
pub fn encode(env: &proto::Envelope) -> Frame {
    Bytes::from(huddle_api::encode_frame(env))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
