use std::any::Any;
use std::collections::BTreeMap;

use glam::{EulerRot, Quat, Vec3};

use crate::input::PredictedSimulation;
use crate::rpc::Invocation;
use crate::session::{ConnectionId, Role};
use crate::wire::{NetReader, NetWriter, WireError};

use super::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Euler angles in radians as (pitch, yaw, roll), yaw applied first.
    pub fn euler(&self) -> Vec3 {
        let (yaw, pitch, roll) = self.orientation.to_euler(EulerRot::YXZ);
        Vec3::new(pitch, yaw, roll)
    }

    pub fn from_euler(position: Vec3, euler: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::from_euler(EulerRot::YXZ, euler.y, euler.x, euler.z),
        }
    }
}

/// What a behaviour sees of its entity while a hook runs.
pub struct EntityContext<'a> {
    pub instance: InstanceId,
    pub owner: Option<ConnectionId>,
    /// Our own connection id; `None` on the server.
    pub local: Option<ConnectionId>,
    pub role: Role,
    pub transform: &'a mut Transform,
}

impl EntityContext<'_> {
    /// True where this peer drives the entity: the owning client, or the
    /// server for server-owned entities.
    pub fn is_owner(&self) -> bool {
        match self.role {
            Role::Server => self.owner.is_none(),
            Role::Client => self.owner.is_some() && self.owner == self.local,
        }
    }
}

/// Per-prefab gameplay code attached to a replicated entity. Every hook has
/// a no-op default.
pub trait NetBehaviour: Any {
    fn on_server_init(&mut self, _ctx: &mut EntityContext<'_>) {}

    fn on_client_init(&mut self, _ctx: &mut EntityContext<'_>) {}

    /// Runs after the server or client init on the peer that owns the entity.
    fn on_owner_init(&mut self, _ctx: &mut EntityContext<'_>) {}

    /// Opaque snapshot appended to spawn messages.
    fn write_spawn(&self, _writer: &mut NetWriter) -> Result<(), WireError> {
        Ok(())
    }

    fn read_spawn(&mut self, _reader: &mut NetReader<'_>) -> Result<(), WireError> {
        Ok(())
    }

    fn on_rpc(&mut self, _ctx: &mut EntityContext<'_>, _call: &Invocation) {}

    /// Entities taking part in input prediction expose their simulation.
    fn simulation(&mut self) -> Option<&mut dyn PredictedSimulation> {
        None
    }
}

pub type PrefabFactory = Box<dyn Fn() -> Box<dyn NetBehaviour>>;

/// Behaviour factories keyed by prefab name. Server and clients must
/// register the same names.
#[derive(Default)]
pub struct PrefabRegistry {
    factories: BTreeMap<String, PrefabFactory>,
}

impl PrefabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the name was already taken.
    pub fn register<F, B>(&mut self, name: &str, factory: F) -> bool
    where
        F: Fn() -> B + 'static,
        B: NetBehaviour,
    {
        if self.factories.contains_key(name) {
            return false;
        }
        self.factories
            .insert(name.to_string(), Box::new(move || -> Box<dyn NetBehaviour> { Box::new(factory()) }));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn NetBehaviour>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
