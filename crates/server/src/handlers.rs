//! Message handling and protocol logic.
//!
//! This module maps decoded envelopes onto session and lifecycle operations,
//! separated from network I/O for testability. Every reply, including errors,
//! is queued on the requesting connection's outbox only.

use huddle_api::proto::{self, envelope::Payload, server_event::Kind};
use tracing::{debug, info};

use crate::error::{bounded, SessionError, SessionResult};
use crate::identity::{Credentials, IdentityHandle};
use crate::presence;
use crate::session::Session;
use crate::state::ServerState;

/// What the connection task should do after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Verify (or register) the identity in a `ClientHello`.
pub async fn authenticate(hello: &proto::ClientHello, state: &ServerState) -> SessionResult<IdentityHandle> {
    let credentials = Credentials::new(hello.username.clone(), hello.password.clone());
    let limit = state.settings().lookup_timeout;
    let identity = if hello.register {
        bounded(limit, state.identities().register(&credentials)).await?
    } else {
        bounded(limit, state.identities().verify(&credentials)).await?
    };
    info!(user_id = identity.user_id, username = %identity.username, "client authenticated");
    Ok(identity)
}

pub fn server_hello(state: &ServerState, identity: &IdentityHandle) -> proto::Envelope {
    proto::Envelope {
        payload: Some(Payload::ServerHello(proto::ServerHello {
            server_name: state.settings().server_name.clone(),
            user_id: identity.user_id,
            username: identity.username.clone(),
        })),
    }
}

/// Handle a decoded envelope from an authenticated client.
///
/// Failures are reported to the sender and never end the connection; only an
/// explicit `Disconnect` does.
pub async fn handle_envelope(env: proto::Envelope, session: &Session) -> Flow {
    let result = match env.payload {
        Some(Payload::JoinRoom(jr)) => handle_join_room(jr, session).await,
        Some(Payload::ChatMessage(msg)) => handle_chat_message(msg, session),
        Some(Payload::CreateRoom(cr)) => handle_create_room(cr, session).await,
        Some(Payload::DeleteRoom(dr)) => handle_delete_room(dr, session).await,
        Some(Payload::ListRooms(_)) => handle_list_rooms(session).await,
        Some(Payload::Disconnect(d)) => {
            handle_disconnect(d, session);
            return Flow::Close;
        }
        Some(Payload::ClientHello(_)) => {
            Err(SessionError::InvalidRequest("Already authenticated."))
        }
        // Server-to-client messages or empty - ignore
        Some(Payload::ServerHello(_) | Payload::ServerEvent(_)) | None => Ok(()),
    };

    if let Err(e) = result {
        session.report(&e);
    }
    Flow::Continue
}

async fn handle_join_room(jr: proto::JoinRoom, session: &Session) -> SessionResult<()> {
    session.switch_room(&jr.code).await.map(|_| ())
}

fn handle_chat_message(msg: proto::ChatMessage, session: &Session) -> SessionResult<()> {
    let report = session.send(&msg.room_code, &msg.text)?;
    debug!(
        conn_id = session.conn_id(),
        delivered = report.delivered,
        failed = report.failed,
        "chat fanned out"
    );
    Ok(())
}

async fn handle_create_room(cr: proto::CreateRoom, session: &Session) -> SessionResult<()> {
    let room = session
        .state()
        .lifecycle()
        .create_room(session.identity(), &cr.name)
        .await?;
    session.reply(&huddle_api::server_event(Kind::RoomCreated(proto::RoomCreated {
        code: room.code,
        name: room.name,
    })))
}

async fn handle_delete_room(dr: proto::DeleteRoom, session: &Session) -> SessionResult<()> {
    let code = huddle_api::normalize_room_code(&dr.code);
    let evicted = session.state().lifecycle().delete_room(&code).await?;
    info!(
        conn_id = session.conn_id(),
        user_id = session.identity().user_id,
        room = %code,
        evicted = evicted.len(),
        "room deleted on request"
    );
    session.reply(&huddle_api::server_event(Kind::RoomDeleted(proto::RoomDeleted { code })))
}

async fn handle_list_rooms(session: &Session) -> SessionResult<()> {
    let rooms = session.state().lifecycle().list_rooms().await?;
    session.reply(&huddle_api::server_event(Kind::RoomList(proto::RoomList {
        rooms: rooms.iter().map(|r| r.to_summary()).collect(),
    })))
}

fn handle_disconnect(d: proto::Disconnect, session: &Session) {
    info!(conn_id = session.conn_id(), reason = %d.reason, "client requested disconnect");
    if let Err(e) = session.notify(&presence::disconnected()) {
        debug!(conn_id = session.conn_id(), error = %e, "disconnect notice dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PasswordVerifier;
    use crate::payload::Frame;
    use crate::persistence::Persistence;
    use crate::state::Settings;
    use bytes::BytesMut;
    use huddle_api::proto::ErrorKind;
    use prost::Message;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn state() -> Arc<ServerState> {
        let store = Arc::new(Persistence::in_memory().unwrap());
        Arc::new(ServerState::new(
            store.clone(),
            Arc::new(PasswordVerifier::with_cost(store, 4)),
            Settings::default(),
        ))
    }

    fn next_event(rx: &mut mpsc::Receiver<Frame>) -> Kind {
        let frame = rx.try_recv().expect("expected a queued frame");
        let mut buf = BytesMut::from(&frame[..]);
        let body = huddle_api::try_decode_frame(&mut buf).unwrap().unwrap();
        let env = proto::Envelope::decode(&*body).unwrap();
        let Some(Payload::ServerEvent(ev)) = env.payload else {
            panic!("expected server event");
        };
        ev.kind.unwrap()
    }

    fn hello(username: &str, password: &str, register: bool) -> proto::ClientHello {
        proto::ClientHello {
            username: username.to_string(),
            password: password.to_string(),
            register,
        }
    }

    #[tokio::test]
    async fn test_authenticate_registers_then_logs_in() {
        let state = state();
        let registered = authenticate(&hello("alice", "pw", true), &state).await.unwrap();
        let logged_in = authenticate(&hello("alice", "pw", false), &state).await.unwrap();
        assert_eq!(registered, logged_in);

        let bad = authenticate(&hello("alice", "nope", false), &state).await;
        assert_eq!(bad, Err(SessionError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_server_hello_carries_identity() {
        let state = state();
        let env = server_hello(&state, &IdentityHandle::new(9, "alice"));
        let Some(Payload::ServerHello(sh)) = env.payload else {
            panic!("expected server hello");
        };
        assert_eq!(sh.user_id, 9);
        assert_eq!(sh.username, "alice");
        assert_eq!(sh.server_name, "Huddle Server");
    }

    #[tokio::test]
    async fn test_create_join_list_delete() {
        let state = state();
        let (session, mut rx) = Session::open(state.clone(), IdentityHandle::new(1, "alice"));

        let flow = handle_envelope(
            huddle_api::request(Payload::CreateRoom(proto::CreateRoom::default())),
            &session,
        )
        .await;
        assert_eq!(flow, Flow::Continue);
        let Kind::RoomCreated(created) = next_event(&mut rx) else {
            panic!("expected room created");
        };
        assert_eq!(created.name, "Room by alice");

        handle_envelope(
            huddle_api::request(Payload::JoinRoom(proto::JoinRoom {
                code: created.code.to_lowercase(),
            })),
            &session,
        )
        .await;
        assert_eq!(
            next_event(&mut rx),
            Kind::System(proto::SystemNotice {
                text: "You have joined room: Room by alice".to_string()
            })
        );

        handle_envelope(huddle_api::request(Payload::ListRooms(proto::ListRooms {})), &session).await;
        let Kind::RoomList(list) = next_event(&mut rx) else {
            panic!("expected room list");
        };
        assert_eq!(list.rooms.len(), 1);
        assert_eq!(list.rooms[0].code, created.code);
        assert_eq!(list.rooms[0].created_by, "alice");

        handle_envelope(
            huddle_api::request(Payload::DeleteRoom(proto::DeleteRoom {
                code: created.code.clone(),
            })),
            &session,
        )
        .await;
        assert_eq!(
            next_event(&mut rx),
            Kind::System(proto::SystemNotice {
                text: format!("Room '{}' has been closed.", created.code)
            })
        );
        assert_eq!(
            next_event(&mut rx),
            Kind::RoomDeleted(proto::RoomDeleted { code: created.code })
        );
        assert_eq!(session.current_room(), None);
    }

    #[tokio::test]
    async fn test_errors_are_reported_not_fatal() {
        let state = state();
        let (session, mut rx) = Session::open(state, IdentityHandle::new(1, "alice"));

        let flow = handle_envelope(
            huddle_api::request(Payload::ChatMessage(proto::ChatMessage {
                room_code: "AB12CD".to_string(),
                text: "hello".to_string(),
            })),
            &session,
        )
        .await;
        assert_eq!(flow, Flow::Continue);
        let Kind::Error(err) = next_event(&mut rx) else {
            panic!("expected error");
        };
        assert_eq!(err.kind(), ErrorKind::NotInRoom);

        handle_envelope(
            huddle_api::request(Payload::JoinRoom(proto::JoinRoom { code: " ".to_string() })),
            &session,
        )
        .await;
        let Kind::Error(err) = next_event(&mut rx) else {
            panic!("expected error");
        };
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.message, "Please provide a room code.");
    }

    #[tokio::test]
    async fn test_second_hello_is_rejected() {
        let state = state();
        let (session, mut rx) = Session::open(state, IdentityHandle::new(1, "alice"));
        let flow = handle_envelope(
            huddle_api::request(Payload::ClientHello(hello("bob", "pw", false))),
            &session,
        )
        .await;
        assert_eq!(flow, Flow::Continue);
        let Kind::Error(err) = next_event(&mut rx) else {
            panic!("expected error");
        };
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(session.identity().username, "alice");
    }

    #[tokio::test]
    async fn test_disconnect_closes() {
        let state = state();
        let (session, mut rx) = Session::open(state, IdentityHandle::new(1, "alice"));
        let flow = handle_envelope(
            huddle_api::request(Payload::Disconnect(proto::Disconnect {
                reason: "bye".to_string(),
            })),
            &session,
        )
        .await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(
            next_event(&mut rx),
            Kind::System(proto::SystemNotice {
                text: "Disconnected.".to_string()
            })
        );
    }
}
