//! Room metadata store.
//!
//! The fan-out core only needs to ask whether a room exists, what it is
//! called, and to create or delete its record. [`RoomDirectory`] is that seam;
//! [`Persistence`] is the sled-backed implementation used by the server.

use async_trait::async_trait;
use huddle_api::proto;
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;
use crate::persistence::Persistence;

/// Stored metadata for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Uppercase room code.
    pub code: String,
    pub name: String,
    pub created_by_id: u64,
    pub created_by: String,
    pub created_at_ms: i64,
}

impl RoomRecord {
    pub fn to_summary(&self) -> proto::RoomSummary {
        proto::RoomSummary {
            code: self.code.clone(),
            name: self.name.clone(),
            created_by_id: self.created_by_id,
            created_by: self.created_by.clone(),
            created_at_ms: self.created_at_ms,
        }
    }
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn exists(&self, code: &str) -> SessionResult<bool>;

    async fn describe(&self, code: &str) -> SessionResult<Option<RoomRecord>>;

    /// Store a new record; fails with `RoomCodeTaken` if the code is in use.
    async fn create(&self, room: RoomRecord) -> SessionResult<()>;

    /// Returns false if there was nothing to delete.
    async fn delete(&self, code: &str) -> SessionResult<bool>;

    /// Every room, newest first.
    async fn list(&self) -> SessionResult<Vec<RoomRecord>>;
}

#[async_trait]
impl RoomDirectory for Persistence {
    async fn exists(&self, code: &str) -> SessionResult<bool> {
        self.has_room(code)
    }

    async fn describe(&self, code: &str) -> SessionResult<Option<RoomRecord>> {
        self.get_room(code)
    }

    async fn create(&self, room: RoomRecord) -> SessionResult<()> {
        self.insert_room(&room)
    }

    async fn delete(&self, code: &str) -> SessionResult<bool> {
        self.remove_room(code)
    }

    async fn list(&self) -> SessionResult<Vec<RoomRecord>> {
        self.all_rooms()
    }
}
