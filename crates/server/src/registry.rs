//! In-memory room membership.
//!
//! The registry maps a room code to the set of connection ids currently joined
//! to it. It knows nothing about payloads or identities.
//!
//! # Locking
//!
//! Rooms live in a `DashMap`, so a mutation locks only the shard holding that
//! room code; rooms in other shards proceed in parallel. Each mutation has a
//! `*_with` variant that runs a closure while the room is still locked and
//! hands it the member set as it stands after the mutation. Callers use that
//! to enqueue notifications, which makes "mutation then notify" atomic with
//! respect to every other operation on the same room. The closures must not
//! block or await, and must not touch the registry again.

use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::BTreeSet;

/// Stable connection identifier, allocated once per connection.
pub type ConnId = u64;

/// Members of one room.
pub type Members = BTreeSet<ConnId>;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Members>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `code`, creating the room entry on first join.
    /// Returns false if `id` was already a member.
    pub fn join(&self, code: &str, id: ConnId) -> bool {
        self.join_with(code, id, |_, inserted| inserted)
    }

    /// Like [`join`](Self::join), then call `then(members, inserted)` under the room lock.
    pub fn join_with<R>(&self, code: &str, id: ConnId, then: impl FnOnce(&Members, bool) -> R) -> R {
        let mut members = self.rooms.entry(code.to_string()).or_default();
        let inserted = members.insert(id);
        then(&*members, inserted)
    }

    /// Remove `id` from `code`. Empty rooms are pruned.
    /// Returns false if `id` was not a member.
    pub fn leave(&self, code: &str, id: ConnId) -> bool {
        self.leave_with(code, id, |_, removed| removed)
    }

    /// Like [`leave`](Self::leave), then call `then(remaining, removed)` under the room lock.
    pub fn leave_with<R>(&self, code: &str, id: ConnId, then: impl FnOnce(&Members, bool) -> R) -> R {
        match self.rooms.entry(code.to_string()) {
            Entry::Occupied(mut room) => {
                let removed = room.get_mut().remove(&id);
                let out = then(room.get(), removed);
                if room.get().is_empty() {
                    let _ = room.remove();
                }
                out
            }
            Entry::Vacant(_) => then(&Members::new(), false),
        }
    }

    /// Remove the whole room and return everyone who was in it.
    pub fn evict_all(&self, code: &str) -> Members {
        self.evict_all_with(code, Members::clone)
    }

    /// Like [`evict_all`](Self::evict_all); `then` sees the evicted set before
    /// the room lock is released.
    pub fn evict_all_with<R>(&self, code: &str, then: impl FnOnce(&Members) -> R) -> R {
        match self.rooms.entry(code.to_string()) {
            Entry::Occupied(room) => {
                let out = then(room.get());
                let _ = room.remove();
                out
            }
            Entry::Vacant(_) => then(&Members::new()),
        }
    }

    /// Snapshot of a room's members.
    pub fn members(&self, code: &str) -> Members {
        self.with_members(code, Members::clone)
    }

    /// Run `f` over a room's members while holding a read lock on the room.
    ///
    /// No join, leave or eviction on this room can interleave with `f`.
    pub fn with_members<R>(&self, code: &str, f: impl FnOnce(&Members) -> R) -> R {
        match self.rooms.get(code) {
            Some(members) => f(&*members),
            None => f(&Members::new()),
        }
    }

    pub fn is_member(&self, code: &str, id: ConnId) -> bool {
        self.rooms
            .get(code)
            .map(|members| members.contains(&id))
            .unwrap_or(false)
    }

    /// Every room `id` is currently registered in. Used for invariant checks;
    /// it walks all rooms.
    pub fn rooms_of(&self, id: ConnId) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|room| room.value().contains(&id))
            .map(|room| room.key().clone())
            .collect()
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
