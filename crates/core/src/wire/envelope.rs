use super::codec::{NetReader, NetWriter, WireError};

/// Message type tag carried in every envelope. Negative values are reserved
/// for the core protocol; user handlers register non-negative types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub i16);

impl MessageType {
    pub const REMOTE_CONNECT: Self = Self(-1);
    pub const REMOTE_DISCONNECT: Self = Self(-2);
    pub const CLIENT_READY: Self = Self(-3);
    pub const SPAWN: Self = Self(-4);
    pub const DESPAWN: Self = Self(-5);
    pub const CREATE_PLAYER: Self = Self(-6);
    pub const RPC: Self = Self(-7);
    pub const SERVER_OUTPUT: Self = Self(-8);
    pub const CLIENT_INPUT: Self = Self(-9);
    pub const ENTITY_STATE: Self = Self(-10);
    pub const AUTHORITY: Self = Self(-11);

    pub fn is_reserved(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const ENVELOPE_HEADER_SIZE: usize = 4;

/// `[i16 type][i16 payloadLength][payload]`
pub fn encode_envelope(message_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut writer = NetWriter::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    writer.write_i16(message_type.0);
    writer.write_bytes(payload)?;
    Ok(writer.into_vec())
}

pub fn decode_envelope(data: &[u8]) -> Result<(MessageType, &[u8]), WireError> {
    let mut reader = NetReader::new(data);
    let message_type = MessageType(reader.read_i16()?);
    let declared = reader.read_i16()?;
    let declared = usize::try_from(declared).map_err(|_| WireError::NegativeLength(declared))?;
    if declared != reader.remaining() {
        return Err(WireError::LengthMismatch {
            declared,
            actual: reader.remaining(),
        });
    }
    Ok((message_type, reader.rest()))
}
