//! Fan-out of payloads to room members.
//!
//! The router resolves connection ids through the client table and pushes one
//! shared frame to each. It does no authorization: whoever calls it has
//! already decided the payload belongs in that room.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::payload::{Frame, Payload};
use crate::registry::{ConnId, Members, RoomRegistry};
use crate::state::ClientHandle;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Copy)]
pub struct Router<'a> {
    registry: &'a RoomRegistry,
    clients: &'a DashMap<ConnId, Arc<ClientHandle>>,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a RoomRegistry, clients: &'a DashMap<ConnId, Arc<ClientHandle>>) -> Self {
        Self { registry, clients }
    }

    /// Deliver `payload` from `member` to the rest of room `code`.
    ///
    /// Membership is checked and the pushes happen under the room's lock, so
    /// a member evicted or moved since the caller last looked gets `NotInRoom`
    /// and nothing is delivered. The sender never receives its own payload.
    pub fn broadcast_if_member(&self, code: &str, member: ConnId, payload: &Payload) -> SessionResult<DeliveryReport> {
        self.registry.with_members(code, |members| {
            if !members.contains(&member) {
                return Err(SessionError::NotInRoom);
            }
            Ok(self.deliver(members, payload, Some(member)))
        })
    }

    /// Deliver to an already captured member set.
    pub fn deliver(&self, members: &Members, payload: &Payload, exclude: Option<ConnId>) -> DeliveryReport {
        self.deliver_frame(members, &payload.to_frame(), exclude)
    }

    /// Push one encoded frame to each member. A failed push is counted and
    /// skipped; it never stops delivery to the others.
    pub fn deliver_frame(&self, members: &Members, frame: &Frame, exclude: Option<ConnId>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for &conn_id in members {
            if Some(conn_id) == exclude {
                continue;
            }
            let Some(client) = self.clients.get(&conn_id) else {
                // Connection is tearing down; its close will fix the registry.
                report.failed += 1;
                continue;
            };
            match client.push(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(conn_id, error = %e, "fan-out push failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

}
