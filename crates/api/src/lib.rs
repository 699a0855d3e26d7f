//! Huddle wire protocol definitions.
//!
//! Message types live in the `proto` module. They are plain `prost` messages
//! declared in Rust, so no protobuf compiler is needed at build time. This
//! crate also provides the helpers for framing those messages over a QUIC
//! stream and for normalizing room codes.

use bytes::BytesMut;
use prost::Message;
use thiserror::Error;

pub mod proto;

/// ALPN protocol identifier negotiated by client and server.
pub const ALPN: &[u8] = b"huddle";

/// Number of characters in a generated room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Normalize a room code as typed by a user.
///
/// Codes are compared case-insensitively, so every entry point uppercases
/// them after trimming surrounding whitespace.
pub fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Encode a protobuf message into a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(msg.encoded_len() + 4);
    msg.encode_length_delimited(&mut buf)
        .expect("encoding to BytesMut cannot fail");
    buf.to_vec()
}

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// A varint length prefix never takes more than this many bytes.
const MAX_DELIMITER_LEN: usize = 10;

/// The byte stream can no longer be split into frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {} byte limit", MAX_FRAME_LEN)]
    TooLarge { len: usize },

    #[error("malformed length prefix")]
    BadLength,
}

/// Attempt to read a single length-prefixed frame from the buffer.
///
/// Returns `Ok(Some(frame_bytes))` when a full frame is available, leaving any
/// remaining bytes in `src`, and `Ok(None)` if not enough data is present yet.
/// A prefix that is malformed or announces more than [`MAX_FRAME_LEN`] bytes
/// is an error; the stream cannot be resynchronised after it.
pub fn try_decode_frame(src: &mut BytesMut) -> Result<Option<Vec<u8>>, FrameError> {
    // Peek at the length delimiter without consuming it.
    let mut peek = &src[..];
    let len = match prost::decode_length_delimiter(&mut peek) {
        Ok(len) => len,
        Err(_) if src.len() < MAX_DELIMITER_LEN => return Ok(None),
        Err(_) => return Err(FrameError::BadLength),
    };
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len });
    }

    let delimiter_len = src.len() - peek.len();
    if src.len() < delimiter_len + len {
        return Ok(None);
    }

    let _ = src.split_to(delimiter_len);
    Ok(Some(src.split_to(len).to_vec()))
}

/// Wrap a server event into an envelope.
pub fn server_event(kind: proto::server_event::Kind) -> proto::Envelope {
    proto::Envelope {
        payload: Some(proto::envelope::Payload::ServerEvent(proto::ServerEvent {
            kind: Some(kind),
        })),
    }
}

/// Wrap a client request into an envelope.
pub fn request(payload: proto::envelope::Payload) -> proto::Envelope {
    proto::Envelope {
        payload: Some(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::envelope::Payload;

    #[test]
    fn test_normalize_room_code() {
        assert_eq!(normalize_room_code("ab12cd"), "AB12CD");
        assert_eq!(normalize_room_code("  aB12Cd \n"), "AB12CD");
        assert_eq!(normalize_room_code(""), "");
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let env = request(Payload::JoinRoom(proto::JoinRoom {
            code: "AB12CD".to_string(),
        }));
        let frame = encode_frame(&env);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..frame.len() - 1]);
        assert_eq!(try_decode_frame(&mut buf), Ok(None));
        assert_eq!(buf.len(), frame.len() - 1, "partial frame must not be consumed");

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        let decoded = try_decode_frame(&mut buf).unwrap().expect("complete frame");
        assert!(buf.is_empty());
        assert_eq!(proto::Envelope::decode(&*decoded).unwrap(), env);
    }

    #[test]
    fn test_back_to_back_frames_split_cleanly() {
        let first = request(Payload::ChatMessage(proto::ChatMessage {
            room_code: "AB12CD".to_string(),
            text: "hello".to_string(),
        }));
        let second = server_event(proto::server_event::Kind::System(proto::SystemNotice {
            text: "Room 'AB12CD' has been closed.".to_string(),
        }));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(&first));
        buf.extend_from_slice(&encode_frame(&second));

        let a = try_decode_frame(&mut buf).unwrap().unwrap();
        let b = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(try_decode_frame(&mut buf), Ok(None));
        assert_eq!(proto::Envelope::decode(&*a).unwrap(), first);
        assert_eq!(proto::Envelope::decode(&*b).unwrap(), second);
    }

    #[test]
    fn test_error_kind_survives_encoding() {
        let env = server_event(proto::server_event::Kind::Error(proto::CommandError {
            kind: proto::ErrorKind::RoomMismatch as i32,
            message: "stale".to_string(),
        }));
        let mut buf = BytesMut::from(&encode_frame(&env)[..]);
        let frame = try_decode_frame(&mut buf).unwrap().unwrap();
        let decoded = proto::Envelope::decode(&*frame).unwrap();

        let Some(Payload::ServerEvent(ev)) = decoded.payload else {
            panic!("expected server event");
        };
        let Some(proto::server_event::Kind::Error(err)) = ev.kind else {
            panic!("expected error event");
        };
        assert_eq!(err.kind(), proto::ErrorKind::RoomMismatch);
    }

    #[test]
    fn test_huge_length_prefix_is_rejected() {
        // Varint for u64::MAX followed by a few body bytes.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xff; 9]);
        buf.extend_from_slice(&[0x01]);
        buf.extend_from_slice(&[0; 8]);

        assert!(try_decode_frame(&mut buf).is_err());
        assert_eq!(buf.len(), 18);
    }

    #[test]
    fn test_frame_just_over_limit_is_rejected_before_buffering() {
        let mut buf = BytesMut::new();
        prost::encode_length_delimiter(MAX_FRAME_LEN + 1, &mut buf).unwrap();

        assert_eq!(
            try_decode_frame(&mut buf),
            Err(FrameError::TooLarge { len: MAX_FRAME_LEN + 1 })
        );
    }

    #[test]
    fn test_frame_at_limit_is_accepted() {
        let mut buf = BytesMut::new();
        prost::encode_length_delimiter(MAX_FRAME_LEN, &mut buf).unwrap();
        assert_eq!(try_decode_frame(&mut buf), Ok(None));

        buf.extend_from_slice(&vec![0u8; MAX_FRAME_LEN]);
        assert_eq!(try_decode_frame(&mut buf).unwrap().map(|f| f.len()), Some(MAX_FRAME_LEN));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overlong_varint_is_malformed() {
        let mut buf = BytesMut::from(&[0xffu8; 11][..]);
        assert_eq!(try_decode_frame(&mut buf), Err(FrameError::BadLength));

        // Fewer bytes may still be an incomplete prefix.
        let mut short = BytesMut::from(&[0xffu8; 4][..]);
        assert_eq!(try_decode_frame(&mut short), Ok(None));
    }
}
