use crate::directory::InstanceId;
use crate::net::DisconnectReason;
use crate::rpc::RejectReason;

use super::ConnectionId;

/// Notifications queued during a tick and drained by the host afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    /// Server: a transport peer was assigned a connection id.
    ClientConnected(ConnectionId),
    /// Server: the connection finished the ready handshake.
    ClientReady(ConnectionId),
    /// Server: the connection is gone and its state was reclaimed.
    ClientDisconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    /// Client: the server assigned our local id.
    Connected { local: ConnectionId },
    /// Client: another client joined.
    RemoteConnected(ConnectionId),
    /// Client: another client left.
    RemoteDisconnected(ConnectionId),
    /// Client: the server is lost and every table was cleared.
    Disconnected { reason: DisconnectReason },
    EntitySpawned {
        instance: InstanceId,
        owner: Option<ConnectionId>,
    },
    EntityDespawned { instance: InstanceId },
    AuthorityChanged {
        instance: InstanceId,
        previous: Option<ConnectionId>,
        owner: Option<ConnectionId>,
    },
    RpcRejected {
        sender: Option<ConnectionId>,
        instance: InstanceId,
        reason: RejectReason,
    },
    /// Prediction diverged at `timestamp`; `replayed` inputs were re-run.
    Corrected {
        instance: InstanceId,
        timestamp: f32,
        replayed: usize,
    },
    /// An authoritative frame arrived with no prediction to compare to.
    HardCorrection { instance: InstanceId, timestamp: f32 },
    TransportError(String),
}
