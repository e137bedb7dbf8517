mod behaviour;
mod entities;
mod identity;
mod messages;
mod state_sync;

pub use behaviour::{EntityContext, NetBehaviour, PrefabFactory, PrefabRegistry, Transform};
pub use entities::{Cascade, Directory, DirectoryError, EntityRecord};
pub use identity::{IdAllocator, InstanceId};
pub use messages::{
    AuthorityMessage, EntityFlags, EntityStateMessage, SpawnMessage, decode_despawn, encode_despawn,
};
pub use state_sync::PoseSync;
