//! Shared helpers for driving a real server over QUIC.

#![allow(dead_code)]

use bytes::BytesMut;
use huddle_api::proto::{self, envelope::Payload, server_event::Kind, Envelope};
use huddle_server::{Config, Persistence, PasswordVerifier, Server, Settings};
use prost::Message;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "correct horse";
const WAIT: Duration = Duration::from_secs(5);

pub fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = ck.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(ck.signing_key.serialize_der()));
    (cert, key)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub cert: CertificateDer<'static>,
    pub server: Arc<Server>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(Settings::default()).await
    }

    pub async fn start_with(settings: Settings) -> Self {
        let (cert, key) = self_signed();
        let store = Arc::new(Persistence::in_memory().unwrap());
        let config = Config {
            bind: "127.0.0.1:0".parse().unwrap(),
            certs: vec![cert.clone()],
            key,
            data_dir: None,
            settings,
        };
        let server = Arc::new(
            Server::with_collaborators(
                config,
                store.clone(),
                Arc::new(PasswordVerifier::with_cost(store.clone(), 4)),
                store,
            )
            .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let runner = server.clone();
        let task = tokio::spawn(async move {
            runner.run().await.unwrap();
        });
        Self {
            addr,
            cert,
            server,
            task,
        }
    }

    pub fn client_endpoint(&self, alpn: &[u8]) -> Endpoint {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.cert.clone()).unwrap();
        let mut tls = rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls.alpn_protocols = vec![alpn.to_vec()];
        let crypto = QuicClientConfig::try_from(Arc::new(tls)).unwrap();
        let mut endpoint = Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
        endpoint.set_default_client_config(ClientConfig::new(Arc::new(crypto)));
        endpoint
    }

    /// Wait until the server's client table has `n` entries.
    pub async fn wait_for_clients(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.server.state().client_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client count never settled");
    }

    pub async fn stop(self) {
        self.server.close();
        let _ = tokio::time::timeout(WAIT, self.task).await;
    }
}

pub struct TestClient {
    pub conn: Connection,
    send: SendStream,
    recv: RecvStream,
    buf: BytesMut,
    _endpoint: Endpoint,
}

impl TestClient {
    /// Open a connection and its stream without saying hello.
    pub async fn connect(server: &TestServer) -> Self {
        let endpoint = server.client_endpoint(huddle_api::ALPN);
        let conn = endpoint.connect(server.addr, "localhost").unwrap().await.unwrap();
        let (send, recv) = conn.open_bi().await.unwrap();
        Self {
            conn,
            send,
            recv,
            buf: BytesMut::new(),
            _endpoint: endpoint,
        }
    }

    /// Register `username` and return the logged-in client.
    pub async fn register(server: &TestServer, username: &str) -> Self {
        let mut client = Self::connect(server).await;
        client.hello(username, PASSWORD, true).await;
        let hello = client.expect_server_hello().await;
        assert_eq!(hello.username, username);
        client
    }

    pub async fn hello(&mut self, username: &str, password: &str, register: bool) {
        self.request(Payload::ClientHello(proto::ClientHello {
            username: username.to_string(),
            password: password.to_string(),
            register,
        }))
        .await;
    }

    pub async fn request(&mut self, payload: Payload) {
        let frame = huddle_api::encode_frame(&huddle_api::request(payload));
        self.send.write_all(&frame).await.unwrap();
    }

    /// Write bytes that need not be a valid frame.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.send.write_all(bytes).await.unwrap();
    }

    pub async fn join(&mut self, code: &str) {
        self.request(Payload::JoinRoom(proto::JoinRoom {
            code: code.to_string(),
        }))
        .await;
    }

    pub async fn chat(&mut self, room_code: &str, text: &str) {
        self.request(Payload::ChatMessage(proto::ChatMessage {
            room_code: room_code.to_string(),
            text: text.to_string(),
        }))
        .await;
    }

    /// Create a room and return its code.
    pub async fn create_room(&mut self, name: &str) -> String {
        self.request(Payload::CreateRoom(proto::CreateRoom {
            name: name.to_string(),
        }))
        .await;
        match self.next_event().await {
            Kind::RoomCreated(created) => created.code,
            other => panic!("expected RoomCreated, got {other:?}"),
        }
    }

    /// Next envelope with a payload, or `None` if the server finished the stream.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        tokio::time::timeout(WAIT, self.read_envelope())
            .await
            .expect("timed out waiting for the server")
    }

    async fn read_envelope(&mut self) -> Option<Envelope> {
        loop {
            while let Some(frame) = huddle_api::try_decode_frame(&mut self.buf).unwrap() {
                let env = Envelope::decode(&*frame).unwrap();
                // Empty envelopes are health checks.
                if env.payload.is_some() {
                    return Some(env);
                }
            }
            let mut chunk = [0u8; 1024];
            match self.recv.read(&mut chunk).await {
                Ok(Some(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    pub async fn expect_server_hello(&mut self) -> proto::ServerHello {
        match self.next_envelope().await {
            Some(Envelope {
                payload: Some(Payload::ServerHello(hello)),
            }) => hello,
            other => panic!("expected ServerHello, got {other:?}"),
        }
    }

    pub async fn next_event(&mut self) -> Kind {
        match self.next_envelope().await {
            Some(Envelope {
                payload: Some(Payload::ServerEvent(proto::ServerEvent { kind: Some(kind) })),
            }) => kind,
            other => panic!("expected a server event, got {other:?}"),
        }
    }

    pub async fn expect_system(&mut self, text: &str) {
        assert_eq!(
            self.next_event().await,
            Kind::System(proto::SystemNotice {
                text: text.to_string()
            })
        );
    }

    pub async fn expect_error(&mut self, kind: proto::ErrorKind) -> proto::CommandError {
        match self.next_event().await {
            Kind::Error(err) => {
                assert_eq!(err.kind(), kind, "unexpected error: {}", err.message);
                err
            }
            other => panic!("expected an error, got {other:?}"),
        }
    }

    /// Assert nothing arrives for a short while.
    pub async fn expect_silence(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(300), self.read_envelope()).await;
        assert!(result.is_err(), "expected silence, got {result:?}");
    }

    /// Assert the server finished the stream.
    pub async fn expect_end(&mut self) {
        assert_eq!(self.next_envelope().await, None);
    }
}
