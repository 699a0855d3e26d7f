//! Server persistence layer using sled for user accounts and room records.
//!
//! Trees:
//! - `users`: user id (8 bytes, big-endian) → [`UserRecord`]
//! - `usernames`: lowercased username → user id
//! - `rooms`: room code → [`RoomRecord`]
//!
//! Values are bincode-encoded. Uniqueness of usernames and room codes is
//! enforced with compare-and-swap so concurrent writers cannot both win.

use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

use crate::directory::RoomRecord;
use crate::error::{SessionError, SessionResult};

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// bcrypt hash, salt included.
    pub password_hash: String,
}

/// Server persistence layer using sled.
pub struct Persistence {
    db: Db,
    users: sled::Tree,
    usernames: sled::Tree,
    rooms: sled::Tree,
}

impl Persistence {
    /// Open the persistence layer at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self::from_db(db)?)
    }

    /// Create an in-memory persistence layer (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db)?)
    }

    fn from_db(db: Db) -> sled::Result<Self> {
        let users = db.open_tree("users")?;
        let usernames = db.open_tree("usernames")?;
        let rooms = db.open_tree("rooms")?;
        Ok(Self {
            db,
            users,
            usernames,
            rooms,
        })
    }

    /// Create an account. Usernames are unique ignoring case.
    pub fn insert_user(&self, user: &UserRecord) -> SessionResult<u64> {
        let id = self.db.generate_id()?;
        let name_key = user.username.to_lowercase();

        let claimed = self
            .usernames
            .compare_and_swap(name_key.as_bytes(), None as Option<&[u8]>, Some(&id.to_be_bytes()[..]))?;
        if claimed.is_err() {
            return Err(SessionError::UsernameTaken(user.username.clone()));
        }

        self.users.insert(id.to_be_bytes(), bincode::serialize(user)?)?;
        Ok(id)
    }

    /// Look up an account by username, ignoring case.
    pub fn find_user(&self, username: &str) -> SessionResult<Option<(u64, UserRecord)>> {
        let Some(id_bytes) = self.usernames.get(username.to_lowercase().as_bytes())? else {
            return Ok(None);
        };
        let id_bytes: [u8; 8] = id_bytes
            .as_ref()
            .try_into()
            .map_err(|_| SessionError::Storage(format!("corrupt user id for {username}")))?;
        let id = u64::from_be_bytes(id_bytes);

        match self.users.get(id_bytes)? {
            Some(data) => Ok(Some((id, bincode::deserialize(&data)?))),
            None => Ok(None),
        }
    }

    pub fn get_room(&self, code: &str) -> SessionResult<Option<RoomRecord>> {
        match self.rooms.get(code.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    pub fn has_room(&self, code: &str) -> SessionResult<bool> {
        Ok(self.rooms.contains_key(code.as_bytes())?)
    }

    /// Store a new room. Fails with [`SessionError::RoomCodeTaken`] if the code exists.
    pub fn insert_room(&self, room: &RoomRecord) -> SessionResult<()> {
        let data = bincode::serialize(room)?;
        let swapped = self
            .rooms
            .compare_and_swap(room.code.as_bytes(), None as Option<&[u8]>, Some(data))?;
        swapped.map_err(|_| SessionError::RoomCodeTaken(room.code.clone()))
    }

    /// Delete a room. Returns false if it did not exist.
    pub fn remove_room(&self, code: &str) -> SessionResult<bool> {
        Ok(self.rooms.remove(code.as_bytes())?.is_some())
    }

    /// All rooms, newest first.
    pub fn all_rooms(&self) -> SessionResult<Vec<RoomRecord>> {
        let mut rooms = Vec::new();
        for entry in self.rooms.iter() {
            let (_, value) = entry?;
            rooms.push(bincode::deserialize::<RoomRecord>(&value)?);
        }
        rooms.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| a.code.cmp(&b.code))
        });
        Ok(rooms)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(code: &str, created_at_ms: i64) -> RoomRecord {
        RoomRecord {
            code: code.to_string(),
            name: format!("Room {code}"),
            created_by_id: 1,
            created_by: "alice".to_string(),
            created_at_ms,
        }
    }

    #[test]
    fn test_users() {
        let persistence = Persistence::in_memory().unwrap();
        assert!(persistence.find_user("alice").unwrap().is_none());

        let user = UserRecord {
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
        };
        let id = persistence.insert_user(&user).unwrap();

        let (found_id, found) = persistence.find_user("ALICE").unwrap().unwrap();
        assert_eq!(found_id, id);
        assert_eq!(found, user);
    }

    #[test]
    fn test_username_taken_ignores_case() {
        let persistence = Persistence::in_memory().unwrap();
        let user = UserRecord {
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
        };
        persistence.insert_user(&user).unwrap();

        let clash = UserRecord {
            username: "Alice".to_string(),
            password_hash: "other".to_string(),
        };
        assert_eq!(
            persistence.insert_user(&clash),
            Err(SessionError::UsernameTaken("Alice".to_string()))
        );
    }

    #[test]
    fn test_room_persistence() {
        let persistence = Persistence::in_memory().unwrap();
        assert!(persistence.get_room("AB12CD").unwrap().is_none());
        assert!(!persistence.has_room("AB12CD").unwrap());

        persistence.insert_room(&room("AB12CD", 10)).unwrap();
        assert!(persistence.has_room("AB12CD").unwrap());
        assert_eq!(persistence.get_room("AB12CD").unwrap().unwrap().name, "Room AB12CD");

        assert!(persistence.remove_room("AB12CD").unwrap());
        assert!(!persistence.remove_room("AB12CD").unwrap());
        assert!(persistence.get_room("AB12CD").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_room_code_rejected() {
        let persistence = Persistence::in_memory().unwrap();
        persistence.insert_room(&room("AB12CD", 10)).unwrap();
        assert_eq!(
            persistence.insert_room(&room("AB12CD", 20)),
            Err(SessionError::RoomCodeTaken("AB12CD".to_string()))
        );
        // The original record is untouched.
        assert_eq!(persistence.get_room("AB12CD").unwrap().unwrap().created_at_ms, 10);
    }

    #[test]
    fn test_all_rooms_newest_first() {
        let persistence = Persistence::in_memory().unwrap();
        assert!(persistence.all_rooms().unwrap().is_empty());

        persistence.insert_room(&room("AAAAAA", 10)).unwrap();
        persistence.insert_room(&room("BBBBBB", 30)).unwrap();
        persistence.insert_room(&room("CCCCCC", 20)).unwrap();

        let codes: Vec<_> = persistence
            .all_rooms()
            .unwrap()
            .into_iter()
            .map(|r| r.code)
            .collect();
        assert_eq!(codes, vec!["BBBBBB", "CCCCCC", "AAAAAA"]);
    }
}
