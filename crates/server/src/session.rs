//! Per-connection session: the room a connection is in and what it may do there.
//!
//! A [`Session`] exists only for authenticated connections. It owns the
//! connection's [`ClientHandle`] registration and guarantees the handle leaves
//! its room and the client table exactly once, either through
//! [`Session::close`] or, if the connection task is torn down early, on drop.

use huddle_api::{normalize_room_code, proto};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::directory::RoomRecord;
use crate::error::{bounded, SessionError, SessionResult};
use crate::fanout::DeliveryReport;
use crate::identity::IdentityHandle;
use crate::payload::{encode, Frame, Payload};
use crate::presence;
use crate::registry::ConnId;
use crate::state::{ClientHandle, ServerState};

pub struct Session {
    handle: Arc<ClientHandle>,
    state: Arc<ServerState>,
    closed: bool,
}

impl Session {
    /// Register a new connection for `identity`.
    ///
    /// Returns the session and the receiving end of its outbox, which the
    /// connection's writer task drains.
    pub fn open(state: Arc<ServerState>, identity: IdentityHandle) -> (Self, mpsc::Receiver<Frame>) {
        let conn_id = state.allocate_conn_id();
        let (tx, rx) = mpsc::channel(state.settings().outbox_capacity);
        let handle = Arc::new(ClientHandle::new(conn_id, identity, tx));
        state.register_client(handle.clone());
        info!(
            conn_id,
            user_id = handle.identity().user_id,
            username = %handle.identity().username,
            "session opened"
        );
        (
            Self {
                handle,
                state,
                closed: false,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> ConnId {
        self.handle.conn_id
    }

    pub fn identity(&self) -> &IdentityHandle {
        self.handle.identity()
    }

    pub fn current_room(&self) -> Option<String> {
        self.handle.current_room()
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Move into `raw_code`, leaving the current room if it is a different one.
    ///
    /// An unknown room fails with `RoomNotFound` and leaves the session where
    /// it was. Joining the room the session is already in only re-sends the
    /// confirmation.
    pub async fn switch_room(&self, raw_code: &str) -> SessionResult<RoomRecord> {
        let code = normalize_room_code(raw_code);
        if code.is_empty() {
            return Err(SessionError::InvalidRequest("Please provide a room code."));
        }

        let limit = self.state.settings().lookup_timeout;
        let Some(room) = bounded(limit, self.state.directory().describe(&code)).await? else {
            return Err(SessionError::RoomNotFound(code));
        };

        let registry = self.state.registry();
        let router = self.state.router();
        if let Some(previous) = self.current_room() {
            if previous != code {
                presence::announce_leave(registry, router, &self.handle, &previous);
            }
        }
        presence::announce_join(registry, router, &self.handle, &code, &room.name);

        // The room may have been deleted between the lookup and the join. If
        // the eviction ran before our join, nobody will evict us; undo it here.
        match bounded(limit, self.state.directory().exists(&code)).await {
            Ok(true) => {}
            Ok(false) => {
                presence::announce_leave(registry, router, &self.handle, &code);
                return Err(SessionError::RoomNotFound(code));
            }
            Err(e) => debug!(conn_id = self.conn_id(), error = %e, "post-join recheck failed"),
        }

        debug!(conn_id = self.conn_id(), room = %code, "joined room");
        Ok(room)
    }

    /// Send a chat line to the room the session is in.
    ///
    /// `declared_room` is the room the client believes it is in; a mismatch is
    /// rejected rather than rerouted. The sender does not get its own message
    /// back.
    pub fn send(&self, declared_room: &str, text: &str) -> SessionResult<DeliveryReport> {
        let declared = normalize_room_code(declared_room);
        if declared.is_empty() || text.trim().is_empty() {
            return Err(SessionError::InvalidRequest("Message or room code missing."));
        }

        let current = self.current_room().ok_or(SessionError::NotInRoom)?;
        if declared != current {
            return Err(SessionError::RoomMismatch { declared, current });
        }

        let payload = Payload::chat(self.identity(), text);
        let conn_id = self.conn_id();
        // Evicted after we read the cell: the room is no longer ours.
        let report = self.state.router().broadcast_if_member(&current, conn_id, &payload)?;

        if report.failed > 0 {
            debug!(conn_id, room = %current, failed = report.failed, "chat partially delivered");
        }
        Ok(report)
    }

    /// Queue a reply for this connection only.
    pub fn reply(&self, env: &proto::Envelope) -> SessionResult<()> {
        self.handle.push(encode(env))
    }

    pub fn notify(&self, payload: &Payload) -> SessionResult<()> {
        self.handle.push(payload.to_frame())
    }

    /// Tell this connection a request failed.
    pub fn report(&self, err: &SessionError) {
        match err {
            SessionError::Storage(_) | SessionError::RoomCodeTaken(_) => {
                warn!(conn_id = self.conn_id(), error = %err, "request failed");
            }
            _ => debug!(conn_id = self.conn_id(), error = %err, "request rejected"),
        }
        if let Err(e) = self.reply(&err.to_envelope()) {
            debug!(conn_id = self.conn_id(), error = %e, "error report dropped");
        }
    }

    /// Leave the current room and drop out of the client table.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(code) = self.current_room() {
            presence::announce_leave(self.state.registry(), self.state.router(), &self.handle, &code);
        }
        self.state.remove_client(self.conn_id());
        info!(conn_id = self.conn_id(), "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
