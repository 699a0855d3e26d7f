//! Server startup and connection management.
//!
//! This module provides the main `Server` struct and connection handling logic.
//! Each QUIC connection carries one bidirectional stream. The first frame on it
//! must be a `ClientHello`; after that the connection has a [`Session`] and two
//! tasks: the read loop below and a writer draining the session's outbox.

use crate::{
    directory::RoomDirectory,
    handlers::{authenticate, handle_envelope, server_hello, Flow},
    identity::{IdentityVerifier, PasswordVerifier},
    payload::{encode, Frame},
    persistence::Persistence,
    session::Session,
    state::{ServerState, Settings},
};
use anyhow::Result;
use bytes::BytesMut;
use huddle_api::{
    proto::{self, envelope::Payload, Envelope},
    try_decode_frame, FrameError,
};
use prost::Message;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long a finished stream may take to be acknowledged before we give up on it.
const FINISH_GRACE: Duration = Duration::from_secs(2);

/// Application close code sent when a peer's framing cannot be decoded.
const BAD_FRAME_CODE: u32 = 1;

/// Configuration for the server.
#[derive(Debug)]
pub struct Config {
    /// Socket address to bind to (IPv4 or IPv6 with port).
    pub bind: SocketAddr,
    /// TLS certificate chain (PEM format, certbot-style).
    pub certs: Vec<rustls::pki_types::CertificateDer<'static>>,
    /// TLS private key (PEM format).
    pub key: rustls::pki_types::PrivateKeyDer<'static>,
    /// Directory for the database. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub settings: Settings,
}

/// The Huddle chat server.
pub struct Server {
    endpoint: Endpoint,
    state: Arc<ServerState>,
    persistence: Arc<Persistence>,
}

impl Server {
    /// Create a new server with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        let persistence = match &config.data_dir {
            Some(data_dir) => {
                let db_path = data_dir.join("huddle.db");
                let p = Persistence::open(&db_path)?;
                info!("Opened persistence database at {}", db_path.display());
                Arc::new(p)
            }
            None => {
                warn!("no data_dir configured, accounts and rooms will not survive a restart");
                Arc::new(Persistence::in_memory()?)
            }
        };

        let directory: Arc<dyn RoomDirectory> = persistence.clone();
        let identities: Arc<dyn IdentityVerifier> = Arc::new(PasswordVerifier::new(persistence.clone()));
        Self::with_collaborators(config, directory, identities, persistence)
    }

    /// Create a server with explicit room directory and identity verifier.
    pub fn with_collaborators(
        config: Config,
        directory: Arc<dyn RoomDirectory>,
        identities: Arc<dyn IdentityVerifier>,
        persistence: Arc<Persistence>,
    ) -> Result<Self> {
        let endpoint = make_server_endpoint(&config)?;
        let state = Arc::new(ServerState::new(directory, identities, config.settings));
        Ok(Self {
            endpoint,
            state,
            persistence,
        })
    }

    /// Get the local address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Get a reference to the server state (for testing).
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Run the server, accepting connections until the endpoint is closed.
    pub async fn run(&self) -> Result<()> {
        info!("server_listen_addr = {}", self.endpoint.local_addr()?);

        while let Some(connecting) = self.endpoint.accept().await {
            match connecting.await {
                Ok(new_conn) => {
                    info!("new connection from {}", new_conn.remote_address());
                    let st = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(new_conn, st).await {
                            error!("connection error: {e:?}");
                        }
                    });
                }
                Err(e) => {
                    error!("incoming connection failed: {e:?}");
                }
            }
        }

        self.endpoint.wait_idle().await;
        if let Err(e) = self.persistence.flush() {
            error!("failed to flush database: {e:?}");
        }
        Ok(())
    }

    /// Close the server endpoint, causing `run()` to return.
    pub fn close(&self) {
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"server shutdown");
    }
}

/// Create a QUIC server endpoint with the given configuration.
fn make_server_endpoint(config: &Config) -> Result<Endpoint> {
    let mut rustls_config = rustls::ServerConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_protocol_versions(&[&rustls::version::TLS13])?
    .with_no_client_auth()
    .with_single_cert(config.certs.clone(), config.key.clone_key())?;
    rustls_config.alpn_protocols = vec![huddle_api::ALPN.to_vec()];

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(Arc::new(rustls_config))?,
    ));

    // Configure transport for faster disconnect detection
    let mut transport_config = quinn::TransportConfig::default();
    transport_config.max_idle_timeout(Some(config.settings.idle_timeout.try_into()?));
    transport_config.keep_alive_interval(Some(Duration::from_secs(5)));
    server_config.transport_config(Arc::new(transport_config));

    let endpoint = Endpoint::server(server_config, config.bind)?;
    Ok(endpoint)
}

/// Read from `recv` until one whole envelope is buffered in `buf`.
///
/// Returns `Ok(None)` when the peer finished the stream. A frame that cannot
/// be delimited is an error and ends the connection.
async fn read_envelope(recv: &mut RecvStream, buf: &mut BytesMut) -> Result<Option<Envelope>> {
    loop {
        while let Some(frame) = try_decode_frame(buf)? {
            match Envelope::decode(&*frame) {
                Ok(env) => return Ok(Some(env)),
                Err(e) => error!("failed to decode envelope: {e:?}"),
            }
        }
        let mut chunk = [0u8; 1024];
        match recv.read(&mut chunk).await? {
            Some(n) => buf.extend_from_slice(&chunk[..n]),
            None => return Ok(None),
        }
    }
}

/// Close `conn` if `err` came from an undecodable frame. Returns whether it did.
fn close_on_bad_frame(conn: &quinn::Connection, err: &anyhow::Error) -> bool {
    let Some(frame_err) = err.downcast_ref::<FrameError>() else {
        return false;
    };
    warn!(remote = %conn.remote_address(), error = %frame_err, "closing connection on bad frame");
    conn.close(BAD_FRAME_CODE.into(), b"bad frame");
    true
}

/// Finish `send` and give the peer a moment to read what was written.
async fn finish_stream(send: &mut SendStream) {
    if send.finish().is_ok() {
        let _ = tokio::time::timeout(FINISH_GRACE, send.stopped()).await;
    }
}

/// Drain a session's outbox to its stream until every sender is gone.
async fn write_loop(mut send: SendStream, mut outbox: mpsc::Receiver<Frame>, conn_id: u64) {
    while let Some(frame) = outbox.recv().await {
        if let Err(e) = send.write_all(&frame).await {
            debug!(conn_id, "stream write failed (likely disconnect): {e:?}");
            return;
        }
    }
    finish_stream(&mut send).await;
}

/// Handle a single client connection.
///
/// This manages the connection lifecycle:
/// 1. Accept the bidirectional stream
/// 2. Authenticate the `ClientHello`
/// 3. Open a session and spawn its writer
/// 4. Process requests until the peer leaves or asks to disconnect
/// 5. Close the session
pub async fn handle_connection(conn: quinn::Connection, state: Arc<ServerState>) -> Result<()> {
    let (mut send, mut recv) = conn.accept_bi().await?;
    let idle_timeout = state.settings().idle_timeout;
    let mut buf = BytesMut::new();

    let hello = match tokio::time::timeout(idle_timeout, read_envelope(&mut recv, &mut buf)).await {
        Ok(Ok(Some(Envelope {
            payload: Some(Payload::ClientHello(hello)),
        }))) => hello,
        Ok(Ok(Some(_))) => {
            warn!(remote = %conn.remote_address(), "first frame was not a ClientHello");
            return Ok(());
        }
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            if !close_on_bad_frame(&conn, &e) {
                info!("stream read error before hello: {e:?}");
            }
            return Ok(());
        }
        Err(_) => {
            info!(remote = %conn.remote_address(), "no ClientHello before timeout");
            return Ok(());
        }
    };

    let identity = match authenticate(&hello, &state).await {
        Ok(identity) => identity,
        Err(e) => {
            info!(username = %hello.username, error = %e, "authentication failed");
            send.write_all(&encode(&e.to_envelope())).await?;
            finish_stream(&mut send).await;
            return Ok(());
        }
    };

    let (session, outbox) = Session::open(state.clone(), identity);
    let conn_id = session.conn_id();
    session.reply(&server_hello(&state, session.identity()))?;
    let writer = tokio::spawn(write_loop(send, outbox, conn_id));

    // Read loop - handle errors gracefully
    loop {
        match tokio::time::timeout(idle_timeout, read_envelope(&mut recv, &mut buf)).await {
            Ok(Ok(Some(env))) => {
                debug!(conn_id, "server: decoded envelope frame");
                if handle_envelope(env, &session).await == Flow::Close {
                    break;
                }
            }
            Ok(Ok(None)) => {
                info!(conn_id, "stream closed by peer");
                break;
            }
            Ok(Err(e)) => {
                if !close_on_bad_frame(&conn, &e) {
                    info!(conn_id, "stream read error (likely disconnect): {e:?}");
                }
                break;
            }
            Err(_) => {
                // Read timeout - check if connection is still alive
                debug!(conn_id, "read timeout, checking connection health");
                let ping = proto::Envelope { payload: None };
                if session.reply(&ping).is_err() || conn.close_reason().is_some() {
                    info!(conn_id, "connection dead after read timeout");
                    break;
                }
            }
        }
    }

    // Dropping the session's handle from the client table releases the last
    // outbox sender, which lets the writer flush and finish the stream.
    session.close();
    if let Err(e) = writer.await {
        error!(conn_id, "writer task failed: {e:?}");
    }
    Ok(())
}
