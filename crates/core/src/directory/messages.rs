use bitflags::bitflags;
use glam::Vec3;

use crate::session::ConnectionId;
use crate::wire::{NetReader, NetWriter, WireError};

use super::InstanceId;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        const ACTIVE             = 0b0000_0001;
        /// The session entity of its owner.
        const PLAYER             = 0b0000_0010;
        /// Despawned rather than released when the owner disconnects.
        const DESTROY_WITH_OWNER = 0b0000_0100;
        /// Pose is streamed to clients on the unreliable channel.
        const SYNC_TRANSFORM     = 0b0000_1000;
    }
}

/// Body of `Spawn` and `CreatePlayer`:
/// `[i16 owner][string prefab][i16 instance][vec3 position][vec3 euler][bool active][i16 len][snapshot]`
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnMessage {
    pub owner: Option<ConnectionId>,
    pub prefab: String,
    pub instance: InstanceId,
    pub position: Vec3,
    pub euler: Vec3,
    pub active: bool,
    pub snapshot: Vec<u8>,
}

impl SpawnMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut writer = NetWriter::with_capacity(40 + self.prefab.len() + self.snapshot.len());
        writer.write_connection(self.owner);
        writer.write_string(&self.prefab)?;
        writer.write_instance(self.instance);
        writer.write_vec3(self.position);
        writer.write_vec3(self.euler);
        writer.write_bool(self.active);
        writer.write_bytes(&self.snapshot)?;
        Ok(writer.into_vec())
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            owner: reader.read_connection()?,
            prefab: reader.read_string()?,
            instance: reader.read_instance()?,
            position: reader.read_vec3()?,
            euler: reader.read_vec3()?,
            active: reader.read_bool()?,
            snapshot: reader.read_bytes()?.to_vec(),
        })
    }
}

/// `[i16 instance]`
pub fn encode_despawn(instance: InstanceId) -> Vec<u8> {
    let mut writer = NetWriter::with_capacity(2);
    writer.write_instance(instance);
    writer.into_vec()
}

pub fn decode_despawn(reader: &mut NetReader<'_>) -> Result<InstanceId, WireError> {
    reader.read_instance()
}

/// `[i16 instance][i16 owner]`, owner `-1` for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityMessage {
    pub instance: InstanceId,
    pub owner: Option<ConnectionId>,
}

impl AuthorityMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = NetWriter::with_capacity(4);
        writer.write_instance(self.instance);
        writer.write_connection(self.owner);
        writer.into_vec()
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            instance: reader.read_instance()?,
            owner: reader.read_connection()?,
        })
    }
}

/// `[i16 instance][vec3 position][vec3 euler]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityStateMessage {
    pub instance: InstanceId,
    pub position: Vec3,
    pub euler: Vec3,
}

impl EntityStateMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = NetWriter::with_capacity(26);
        writer.write_instance(self.instance);
        writer.write_vec3(self.position);
        writer.write_vec3(self.euler);
        writer.into_vec()
    }

    pub fn decode(reader: &mut NetReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            instance: reader.read_instance()?,
            position: reader.read_vec3()?,
            euler: reader.read_vec3()?,
        })
    }
}
