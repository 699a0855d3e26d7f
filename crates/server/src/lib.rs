//! Huddle Server Library
//!
//! This crate provides the server side of Huddle, a room-scoped chat service.
//! Authenticated connections join at most one room at a time and every chat
//! line is fanned out to the other members of that room only.
//!
//! # Architecture
//!
//! - [`registry`]: room code to member set, with per-room locking
//! - [`session`]: one authenticated connection and the room it is in
//! - [`fanout`]: delivery of one payload to a set of connections
//! - [`presence`]: join, leave and room-closed notices
//! - [`lifecycle`]: room creation, listing and deletion with eviction
//! - [`directory`] and [`identity`]: the room and account collaborators
//! - [`persistence`]: sled-backed storage for both
//! - [`handlers`]: protocol message dispatch
//! - [`server`]: QUIC endpoint and connection tasks
//! - [`config`]: configuration management (TOML file, env, CLI args)
//!
//! # Configuration
//!
//! The server uses a layered configuration system:
//! 1. Default values
//! 2. Configuration file (huddle-server.toml)
//! 3. Environment variables (HUDDLE_*)
//! 4. Command-line arguments (highest priority)
//!
//! See [`config::ServerConfig`] for details.
//!
//! # Locking Strategy
//!
//! - **Connection ids**: lock-free via `AtomicU64`
//! - **Client storage**: `DashMap` keyed by connection id
//! - **Room membership**: one `DashMap` entry per room; a mutation and the
//!   notices it causes happen under that room's lock
//! - **Delivery**: non-blocking pushes into bounded per-connection outboxes
//!
//! See the [`state`] and [`registry`] module documentation for details.
//!
//! # Example
//!
//! ```no_run
//! use huddle_server::{Config, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server_config = ServerConfig::load()?;
//!     let (certs, key) = server_config.load_certificates()?;
//!     let config = Config {
//!         bind: server_config.bind,
//!         certs,
//!         key,
//!         data_dir: Some(server_config.data_dir()?),
//!         settings: server_config.settings(),
//!     };
//!     let server = Server::new(config)?;
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod identity;
pub mod lifecycle;
pub mod payload;
pub mod persistence;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use config::{generate_self_signed_cert, load_pem_certificates, ServerConfig};
pub use directory::{RoomDirectory, RoomRecord};
pub use error::{SessionError, SessionResult};
pub use identity::{Credentials, IdentityHandle, IdentityVerifier, PasswordVerifier};
pub use persistence::Persistence;
pub use server::{Config, Server};
pub use session::Session;
pub use state::{ClientHandle, ServerState, Settings};
