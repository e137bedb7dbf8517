use std::fmt;
use std::io;
use std::net::SocketAddr;

use super::channel::{Channel, ChannelError};
use super::protocol::PacketError;
use super::stats::NetworkStats;

/// Transport-level handle of a remote peer. On a client the server is
/// always [`PeerId::SERVER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl PeerId {
    pub const SERVER: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    Denied(String),
    TransportError(String),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Denied(reason) => reason,
            DisconnectReason::TransportError(message) => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(PeerId),
    Disconnected(PeerId, DisconnectReason),
    Received {
        peer: PeerId,
        channel: Channel,
        data: Vec<u8>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("not connected")]
    NotConnected,
    #[error("datagram of {0} bytes exceeds the packet size")]
    PacketTooLarge(usize),
}

/// Datagram layer beneath the session. Implementations never block:
/// `poll` drains whatever has arrived and `flush` pushes queued traffic.
pub trait Transport {
    fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError>;

    fn send(&mut self, peer: PeerId, channel: Channel, data: &[u8]) -> Result<(), TransportError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self, peer: PeerId);

    fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr>;

    fn stats(&self) -> NetworkStats;
}
