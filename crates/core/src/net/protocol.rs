use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_PACKET_SIZE: usize = 1440;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5445_5448;
pub const DEFAULT_PORT: u16 = 5500;
pub const DEFAULT_TICK_RATE: u32 = 60;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Position of a message inside a fragmented payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FragmentInfo {
    pub index: u16,
    pub count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ChannelMessage {
    pub channel: u8,
    /// Per-channel sequence; unused on the unreliable channel.
    pub sequence: u32,
    pub fragment: Option<FragmentInfo>,
    pub data: Vec<u8>,
}

impl ChannelMessage {
    /// Rough archived size, used when packing messages into a datagram.
    pub fn wire_size(&self) -> usize {
        self.data.len() + 24
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest { client_salt: u64 },
    ConnectionChallenge { server_salt: u64, challenge: u64 },
    ChallengeResponse { combined_salt: u64 },
    ConnectionAccepted { peer_id: u32 },
    ConnectionDenied { reason: String },
    /// May be empty, in which case it only carries acks.
    Messages(Vec<ChannelMessage>),
    Disconnect,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_message_packet_serialization() {
        let header = PacketHeader::new(7, 3, 0b101);
        let payload = PacketType::Messages(vec![ChannelMessage {
            channel: 2,
            sequence: 11,
            fragment: Some(FragmentInfo { index: 1, count: 3 }),
            data: vec![1, 2, 3, 4],
        }]);
        let packet = Packet::new(header, payload);

        let serialized = packet.serialize().unwrap();
        let deserialized = Packet::deserialize(&serialized).unwrap();

        assert_eq!(packet.header, deserialized.header);
        let PacketType::Messages(messages) = deserialized.payload else {
            panic!("expected messages");
        };
        assert_eq!(messages[0].sequence, 11);
        assert_eq!(messages[0].fragment, Some(FragmentInfo { index: 1, count: 3 }));
        assert_eq!(messages[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_header_validation() {
        let mut header = PacketHeader::new(0, 0, 0);
        assert!(header.is_valid());
        header.magic = 0;
        assert!(!header.is_valid());
    }
}
