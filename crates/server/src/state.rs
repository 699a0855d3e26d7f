//! Server state management and core types.
//!
//! This module contains the server's shared state and client handle types,
//! designed to be testable in isolation without requiring network connections.
//!
//! # Locking Strategy
//!
//! - **`next_conn_id`**: `AtomicU64` for lock-free id allocation
//! - **`clients`**: `DashMap` keyed by connection id, the arena every other
//!   component addresses connections through
//! - **`registry`**: per-room locking, see [`crate::registry`]
//! - **`ClientHandle::current_room`**: a small mutex only ever taken briefly,
//!   and only *inside* a registry lock, never the other way round
//!
//! Nothing in this module awaits while holding a lock. Delivery to a client
//! is a non-blocking push into its outbox; a per-connection writer task drains
//! the outbox to the network.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::directory::RoomDirectory;
use crate::error::{SessionError, SessionResult};
use crate::fanout::Router;
use crate::identity::{IdentityHandle, IdentityVerifier};
use crate::lifecycle::RoomLifecycle;
use crate::payload::Frame;
use crate::registry::{ConnId, RoomRegistry};

/// Handle to one live, authenticated connection.
///
/// Other components reference it by [`ConnId`] through the client table and
/// never own it; the connection task does.
#[derive(Debug)]
pub struct ClientHandle {
    pub conn_id: ConnId,
    identity: IdentityHandle,
    /// Frames waiting for the connection's writer task.
    outbox: mpsc::Sender<Frame>,
    /// Room this connection may send to. Written only while the matching
    /// room is locked in the registry.
    current_room: Mutex<Option<String>>,
}

impl ClientHandle {
    pub fn new(conn_id: ConnId, identity: IdentityHandle, outbox: mpsc::Sender<Frame>) -> Self {
        Self {
            conn_id,
            identity,
            outbox,
            current_room: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &IdentityHandle {
        &self.identity
    }

    /// Queue a frame for this client without waiting.
    ///
    /// Fails if the outbox is full or the writer is gone. The frame is dropped
    /// in that case; delivery is best-effort and never retried.
    pub fn push(&self, frame: Frame) -> SessionResult<()> {
        self.outbox
            .try_send(frame)
            .map_err(|_| SessionError::DeliveryFailure(self.conn_id))
    }

    pub fn current_room(&self) -> Option<String> {
        self.current_room.lock().clone()
    }

    pub(crate) fn set_current_room(&self, code: &str) {
        *self.current_room.lock() = Some(code.to_string());
    }

    /// Clear the current room if it is `code`. Returns true if it was.
    pub(crate) fn clear_room_if(&self, code: &str) -> bool {
        let mut current = self.current_room.lock();
        if current.as_deref() == Some(code) {
            *current = None;
            true
        } else {
            false
        }
    }
}

/// Runtime knobs shared by every connection.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name reported in `ServerHello`.
    pub server_name: String,
    /// Upper bound on any identity or directory call.
    pub lookup_timeout: Duration,
    /// How long a connection may stay silent before its health is checked.
    pub idle_timeout: Duration,
    /// Frames buffered per connection before deliveries start failing.
    pub outbox_capacity: usize,
    /// Random room codes tried before giving up on a create request.
    pub room_code_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_name: "Huddle Server".to_string(),
            lookup_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            outbox_capacity: 256,
            room_code_attempts: 16,
        }
    }
}

/// The server's shared state.
///
/// - Connected clients (DashMap for concurrent access)
/// - Room memberships (per-room locking)
/// - The external collaborators: room directory and identity verifier
pub struct ServerState {
    clients: DashMap<ConnId, Arc<ClientHandle>>,
    registry: RoomRegistry,
    next_conn_id: AtomicU64,
    directory: Arc<dyn RoomDirectory>,
    identities: Arc<dyn IdentityVerifier>,
    settings: Settings,
}

impl ServerState {
    pub fn new(
        directory: Arc<dyn RoomDirectory>,
        identities: Arc<dyn IdentityVerifier>,
        settings: Settings,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            registry: RoomRegistry::new(),
            next_conn_id: AtomicU64::new(1),
            directory,
            identities,
            settings,
        }
    }

    /// Allocate the next connection id (lock-free).
    pub fn allocate_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Make a client addressable for targeted delivery.
    pub fn register_client(&self, handle: Arc<ClientHandle>) {
        self.clients.insert(handle.conn_id, handle);
    }

    pub fn remove_client(&self, conn_id: ConnId) {
        self.clients.remove(&conn_id);
    }

    pub fn get_client(&self, conn_id: ConnId) -> Option<Arc<ClientHandle>> {
        self.clients.get(&conn_id).map(|r| r.value().clone())
    }

    /// Get the number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn router(&self) -> Router<'_> {
        Router::new(&self.registry, &self.clients)
    }

    pub fn lifecycle(&self) -> RoomLifecycle<'_> {
        RoomLifecycle::new(self)
    }

    pub fn directory(&self) -> &dyn RoomDirectory {
        self.directory.as_ref()
    }

    pub fn identities(&self) -> &dyn IdentityVerifier {
        self.identities.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
