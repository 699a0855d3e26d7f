//! Presence notifications.
//!
//! Join, leave and room-closed notices are derived here and pushed through the
//! [`Router`]. Each `announce_*` function performs the registry mutation
//! itself, so the notice is enqueued under the same room lock as the change it
//! describes.

use tracing::debug;

use crate::fanout::Router;
use crate::payload::Payload;
use crate::registry::RoomRegistry;
use crate::state::ClientHandle;

/// Sent to a connection that asked to disconnect, just before its stream ends.
pub const DISCONNECTED: &str = "Disconnected.";

pub fn joined_self(room_name: &str) -> Payload {
    Payload::system(format!("You have joined room: {room_name}"))
}

pub fn joined(username: &str) -> Payload {
    Payload::system(format!("{username} has joined this room."))
}

pub fn left(username: &str) -> Payload {
    Payload::system(format!("{username} has left the room."))
}

pub fn room_closed(code: &str) -> Payload {
    Payload::system(format!("Room '{code}' has been closed."))
}

pub fn disconnected() -> Payload {
    Payload::system(DISCONNECTED)
}

/// Join `client` to `code`, confirm to the mover and tell the other members.
///
/// When the client was already a member only the confirmation is sent.
pub fn announce_join(registry: &RoomRegistry, router: Router<'_>, client: &ClientHandle, code: &str, room_name: &str) {
    let username = &client.identity().username;
    registry.join_with(code, client.conn_id, |members, inserted| {
        client.set_current_room(code);
        if let Err(e) = client.push(joined_self(room_name).to_frame()) {
            debug!(conn_id = client.conn_id, error = %e, "join confirmation dropped");
        }
        if inserted {
            router.deliver(members, &joined(username), Some(client.conn_id));
        }
    });
}

/// Remove `client` from `code` and tell whoever is left.
///
/// Returns false if the client was not a member (e.g. the room was deleted
/// underneath it), in which case nobody is notified.
pub fn announce_leave(registry: &RoomRegistry, router: Router<'_>, client: &ClientHandle, code: &str) -> bool {
    let username = &client.identity().username;
    registry.leave_with(code, client.conn_id, |remaining, removed| {
        client.clear_room_if(code);
        if removed {
            router.deliver(remaining, &left(username), None);
        }
        removed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_texts() {
        assert_eq!(
            joined_self("Room by alice"),
            Payload::system("You have joined room: Room by alice")
        );
        assert_eq!(joined("bob"), Payload::system("bob has joined this room."));
        assert_eq!(left("bob"), Payload::system("bob has left the room."));
        assert_eq!(
            room_closed("AB12CD"),
            Payload::system("Room 'AB12CD' has been closed.")
        );
        assert_eq!(disconnected(), Payload::system("Disconnected."));
    }
}
