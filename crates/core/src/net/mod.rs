mod channel;
mod connection;
mod endpoint;
mod memory;
mod protocol;
mod simulator;
mod stats;
mod tracking;
mod transport;
mod udp;

pub use channel::{Channel, ChannelError, ReliableChannel};
pub use connection::{LinkState, PeerLink, PeerTable};
pub use endpoint::NetworkEndpoint;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use protocol::{
    ChannelMessage, DEFAULT_PORT, DEFAULT_TICK_RATE, FragmentInfo, MAX_PACKET_SIZE,
    PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketHeader, PacketType,
    sequence_greater_than,
};
pub use simulator::NetworkSimulator;
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckTracker, ReceiveTracker};
pub use transport::{DisconnectReason, PeerId, Transport, TransportError, TransportEvent};
pub use udp::{UdpClientTransport, UdpServerTransport};
