//! Protobuf message definitions (package `huddle.api.v1`).
//!
//! Every frame on the control stream is an [`Envelope`]. Tags are part of the
//! wire format and must never be renumbered.

/// Top-level frame exchanged in both directions.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Payload", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub payload: ::core::option::Option<envelope::Payload>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        ClientHello(super::ClientHello),
        #[prost(message, tag = "2")]
        ServerHello(super::ServerHello),
        #[prost(message, tag = "3")]
        JoinRoom(super::JoinRoom),
        #[prost(message, tag = "4")]
        ChatMessage(super::ChatMessage),
        #[prost(message, tag = "5")]
        CreateRoom(super::CreateRoom),
        #[prost(message, tag = "6")]
        DeleteRoom(super::DeleteRoom),
        #[prost(message, tag = "7")]
        ListRooms(super::ListRooms),
        #[prost(message, tag = "8")]
        Disconnect(super::Disconnect),
        #[prost(message, tag = "9")]
        ServerEvent(super::ServerEvent),
    }
}

/// First frame sent by a client. Carries the credentials to verify.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientHello {
    #[prost(string, tag = "1")]
    pub username: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub password: ::prost::alloc::string::String,
    /// Create the account before logging in.
    #[prost(bool, tag = "3")]
    pub register: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerHello {
    #[prost(string, tag = "1")]
    pub server_name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub user_id: u64,
    #[prost(string, tag = "3")]
    pub username: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinRoom {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
    /// The room the client believes it is in.
    #[prost(string, tag = "1")]
    pub room_code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub text: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateRoom {
    /// Display name. Empty means "Room by <username>".
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRoom {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListRooms {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Disconnect {
    #[prost(string, tag = "1")]
    pub reason: ::prost::alloc::string::String,
}

/// Server-to-client event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerEvent {
    #[prost(oneof = "server_event::Kind", tags = "1, 2, 3, 4, 5, 6")]
    pub kind: ::core::option::Option<server_event::Kind>,
}

pub mod server_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        System(super::SystemNotice),
        #[prost(message, tag = "2")]
        Chat(super::ChatBroadcast),
        #[prost(message, tag = "3")]
        RoomCreated(super::RoomCreated),
        #[prost(message, tag = "4")]
        RoomDeleted(super::RoomDeleted),
        #[prost(message, tag = "5")]
        RoomList(super::RoomList),
        #[prost(message, tag = "6")]
        Error(super::CommandError),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemNotice {
    #[prost(string, tag = "1")]
    pub text: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatBroadcast {
    #[prost(uint64, tag = "1")]
    pub sender_id: u64,
    #[prost(string, tag = "2")]
    pub sender: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub text: ::prost::alloc::string::String,
    /// Milliseconds since the Unix epoch, stamped by the server.
    #[prost(int64, tag = "4")]
    pub timestamp_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomCreated {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomDeleted {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomSummary {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub created_by_id: u64,
    #[prost(string, tag = "4")]
    pub created_by: ::prost::alloc::string::String,
    #[prost(int64, tag = "5")]
    pub created_at_ms: i64,
}

/// Rooms ordered newest first.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomList {
    #[prost(message, repeated, tag = "1")]
    pub rooms: ::prost::alloc::vec::Vec<RoomSummary>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandError {
    #[prost(enumeration = "ErrorKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorKind {
    Unspecified = 0,
    Unauthenticated = 1,
    RoomNotFound = 2,
    NotInRoom = 3,
    RoomMismatch = 4,
    LookupTimeout = 5,
    InvalidRequest = 6,
    UsernameTaken = 7,
    CodeSpaceExhausted = 8,
    Internal = 9,
}
