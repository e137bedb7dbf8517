mod codec;
mod envelope;

pub use codec::{NO_CONNECTION, NetReader, NetWriter, WireError};
pub use envelope::{ENVELOPE_HEADER_SIZE, MessageType, decode_envelope, encode_envelope};
