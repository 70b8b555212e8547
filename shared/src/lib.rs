use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Peer announces its presence; the body is ignored.
pub const FLAG_HELLO: u8 = 0b0000_0001;
/// Peer announces its departure; the body is ignored.
pub const FLAG_GOODBYE: u8 = 0b0000_0010;

/// Topic label carrying serialized input batches.
pub const LABEL_INPUT: u8 = 0x01;
/// Topic label carrying simulation state snapshots.
pub const LABEL_STATE: u8 = 0x02;

/// Size of the fixed message header: one flags byte.
pub const HEADER_LEN: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short to hold the header: {0} bytes")]
    TooShort(usize),
}

/// One UDP datagram: a flags byte followed by an opaque body.
///
/// Flags and body are independently meaningful. A message carrying a
/// control flag (`FLAG_HELLO`, `FLAG_GOODBYE`) has no routable body;
/// anything else is application data whose first body byte is the mux
/// topic label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub flags: u8,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(body: Vec<u8>) -> Self {
        Self { flags: 0, body }
    }

    /// A bodyless control message carrying only the given flags.
    pub fn control(flags: u8) -> Self {
        Self {
            flags,
            body: Vec::new(),
        }
    }

    /// An application message whose body is the topic label followed by
    /// the payload. Subscribers on the far side see only the payload.
    pub fn with_label(label: u8, payload: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + payload.len());
        body.push(label);
        body.extend_from_slice(payload);
        Self::new(body)
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.push(self.flags);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Fails only when the buffer cannot hold the header. Flag and label
    /// semantics are interpreted by higher layers.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TooShort(buf.len()));
        }
        Ok(Self {
            flags: buf[0],
            body: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// One input command from a peer. `index` increases strictly per sender;
/// the admission layer drops anything at or below the last admitted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub index: u32,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

/// Simulation position snapshot, published once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub x: f32,
    pub y: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let messages = vec![
            Message::new(vec![1, 2, 3]),
            Message::new(Vec::new()),
            Message::control(FLAG_HELLO),
            Message::control(FLAG_GOODBYE),
            Message::with_label(LABEL_INPUT, b"payload"),
            Message {
                flags: 0xFF,
                body: vec![0x00, 0xFF, 0x7F],
            },
        ];

        for message in messages {
            let encoded = message.encode();
            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_decode_empty_buffer_fails() {
        let result = Message::decode(&[]);
        assert_eq!(result, Err(WireError::TooShort(0)));
    }

    #[test]
    fn test_decode_header_only() {
        let message = Message::decode(&[FLAG_HELLO]).unwrap();
        assert_eq!(message.flags, FLAG_HELLO);
        assert!(message.body.is_empty());
    }

    #[test]
    fn test_with_label_prepends_one_byte() {
        let message = Message::with_label(LABEL_INPUT, &[10, 20]);
        assert_eq!(message.flags, 0);
        assert_eq!(message.body, vec![LABEL_INPUT, 10, 20]);
    }

    #[test]
    fn test_control_flags() {
        let hello = Message::control(FLAG_HELLO);
        assert!(hello.has_flag(FLAG_HELLO));
        assert!(!hello.has_flag(FLAG_GOODBYE));
        assert!(hello.body.is_empty());

        let both = Message::control(FLAG_HELLO | FLAG_GOODBYE);
        assert!(both.has_flag(FLAG_HELLO));
        assert!(both.has_flag(FLAG_GOODBYE));
    }

    #[test]
    fn test_input_batch_serialization_roundtrip() {
        let batch = vec![
            Input {
                index: 1,
                up: true,
                down: false,
                left: false,
                right: true,
            },
            Input {
                index: 2,
                up: false,
                down: true,
                left: true,
                right: false,
            },
        ];

        let serialized = bincode::serialize(&batch).unwrap();
        let deserialized: Vec<Input> = bincode::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, batch);
    }

    #[test]
    fn test_state_serialization_roundtrip() {
        let state = State { x: 3.5, y: -7.25 };
        let serialized = bincode::serialize(&state).unwrap();
        let deserialized: State = bincode::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, state);
    }

    #[test]
    fn test_truncated_input_payload_fails() {
        let batch = vec![Input {
            index: 9,
            up: false,
            down: false,
            left: true,
            right: false,
        }];
        let serialized = bincode::serialize(&batch).unwrap();

        let result: Result<Vec<Input>, _> =
            bincode::deserialize(&serialized[..serialized.len() / 2]);
        assert!(result.is_err());
    }
}
