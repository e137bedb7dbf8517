pub mod config;
pub mod context;
pub mod directory;
pub mod input;
pub mod net;
pub mod player;
pub mod rpc;
pub mod session;
pub mod simulation;
pub mod wire;

pub use config::{ConfigError, NetSettings};
pub use context::NetContext;
pub use directory::{
    Cascade, Directory, DirectoryError, EntityContext, EntityFlags, EntityRecord, InstanceId, NetBehaviour,
    PrefabRegistry, Transform,
};
pub use input::{
    InputFrame, InputValue, OutputFrame, PoseLayout, PredictedSimulation, PredictionEngine, PredictionRole,
};
pub use net::{
    Channel, DEFAULT_PORT, DEFAULT_TICK_RATE, DisconnectReason, MemoryNetwork, NetworkStats, PacketLossSimulation,
    Transport, TransportError, UdpClientTransport, UdpServerTransport,
};
pub use rpc::{DeliveryMode, Invocation, MethodTable, RpcDispatcher, RpcError, RpcValue};
pub use session::{ConnectionId, NetEvent, Role, Session, SessionError};
pub use simulation::FixedTimestep;
pub use wire::{MessageType, NetReader, NetWriter, WireError};
