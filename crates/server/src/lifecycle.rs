//! Room creation, listing and administrative deletion.
//!
//! Deletion is independent of any single session: any authenticated caller may
//! delete any room, and every member is evicted whether or not it is the
//! caller.

use huddle_api::{normalize_room_code, ROOM_CODE_LEN};
use rand::Rng;
use tracing::{info, warn};

use crate::directory::RoomRecord;
use crate::error::{bounded, SessionError, SessionResult};
use crate::identity::IdentityHandle;
use crate::payload::now_ms;
use crate::presence;
use crate::registry::Members;
use crate::state::ServerState;

/// Random room code: `ROOM_CODE_LEN` uppercase hex characters.
pub fn generate_room_code() -> String {
    let mut bytes = [0u8; ROOM_CODE_LEN / 2];
    rand::rng().fill(&mut bytes);
    hex::encode_upper(bytes)
}

pub struct RoomLifecycle<'a> {
    state: &'a ServerState,
}

impl<'a> RoomLifecycle<'a> {
    pub fn new(state: &'a ServerState) -> Self {
        Self { state }
    }

    /// Create a room with a fresh code.
    ///
    /// Codes are drawn at random until one is free, at most
    /// `room_code_attempts` times. Running out fails this request only.
    pub async fn create_room(&self, creator: &IdentityHandle, name: &str) -> SessionResult<RoomRecord> {
        let settings = self.state.settings();
        let name = match name.trim() {
            "" => format!("Room by {}", creator.username),
            given => given.to_string(),
        };

        for _ in 0..settings.room_code_attempts {
            let record = RoomRecord {
                code: generate_room_code(),
                name: name.clone(),
                created_by_id: creator.user_id,
                created_by: creator.username.clone(),
                created_at_ms: now_ms(),
            };
            match bounded(settings.lookup_timeout, self.state.directory().create(record.clone())).await {
                Ok(()) => {
                    info!(room = %record.code, user_id = creator.user_id, "room created");
                    return Ok(record);
                }
                Err(SessionError::RoomCodeTaken(code)) => {
                    warn!(room = %code, "room code collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::CodeSpaceExhausted {
            attempts: settings.room_code_attempts,
        })
    }

    pub async fn list_rooms(&self) -> SessionResult<Vec<RoomRecord>> {
        bounded(self.state.settings().lookup_timeout, self.state.directory().list()).await
    }

    /// Delete a room and evict everyone in it.
    ///
    /// Returns the evicted connections. Each of them receives the closing
    /// notice and has its current room cleared before the room lock is
    /// released, so a later send from any of them fails with `NotInRoom`.
    pub async fn delete_room(&self, raw_code: &str) -> SessionResult<Members> {
        let code = normalize_room_code(raw_code);
        if code.is_empty() {
            return Err(SessionError::InvalidRequest("Please provide a room code."));
        }

        let limit = self.state.settings().lookup_timeout;
        let directory = self.state.directory();
        if !bounded(limit, directory.exists(&code)).await? {
            return Err(SessionError::RoomNotFound(code));
        }
        if !bounded(limit, directory.delete(&code)).await? {
            // Someone else deleted it first.
            return Err(SessionError::RoomNotFound(code));
        }

        let router = self.state.router();
        let evicted = self.state.registry().evict_all_with(&code, |members| {
            for &conn_id in members {
                if let Some(client) = self.state.get_client(conn_id) {
                    client.clear_room_if(&code);
                }
            }
            router.deliver(members, &presence::room_closed(&code), None);
            members.clone()
        });

        info!(room = %code, evicted = evicted.len(), "room deleted");
        Ok(evicted)
    }
}
