use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use glam::{Quat, Vec3};

use crate::net::Channel;
use crate::rpc::Invocation;
use crate::session::{ConnectionId, NetEvent, Role, Session, SessionError};
use crate::wire::{MessageType, NetReader, WireError};

use super::behaviour::{EntityContext, NetBehaviour, PrefabRegistry, Transform};
use super::identity::{IdAllocator, InstanceId};
use super::messages::{AuthorityMessage, EntityFlags, SpawnMessage, encode_despawn};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("unknown prefab {0:?}")]
    UnknownPrefab(String),
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("instance ids exhausted")]
    Exhausted,
    #[error("only the server may do this")]
    ServerOnly,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct EntityRecord {
    pub instance: InstanceId,
    pub prefab: String,
    /// `None` while the server owns the entity.
    pub owner: Option<ConnectionId>,
    pub transform: Transform,
    pub flags: EntityFlags,
    pub behaviour: Box<dyn NetBehaviour>,
    links: BTreeSet<InstanceId>,
}

impl EntityRecord {
    pub fn is_player(&self) -> bool {
        self.flags.contains(EntityFlags::PLAYER)
    }

    pub fn behaviour<T: NetBehaviour>(&self) -> Option<&T> {
        let behaviour: &dyn Any = self.behaviour.as_ref();
        behaviour.downcast_ref()
    }

    pub fn behaviour_mut<T: NetBehaviour>(&mut self) -> Option<&mut T> {
        let behaviour: &mut dyn Any = self.behaviour.as_mut();
        behaviour.downcast_mut()
    }

    /// Entities this one holds a reference to.
    pub fn links(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.links.iter().copied()
    }

    /// Runs `f` against the behaviour with a context borrowed from the
    /// rest of the record.
    pub fn with_context<R>(
        &mut self,
        role: Role,
        local: Option<ConnectionId>,
        f: impl FnOnce(&mut dyn NetBehaviour, &mut EntityContext<'_>) -> R,
    ) -> R {
        let mut ctx = EntityContext {
            instance: self.instance,
            owner: self.owner,
            local,
            role,
            transform: &mut self.transform,
        };
        f(self.behaviour.as_mut(), &mut ctx)
    }

    fn spawn_payload(&self) -> Result<Vec<u8>, WireError> {
        let mut snapshot = crate::wire::NetWriter::new();
        self.behaviour.write_spawn(&mut snapshot)?;
        SpawnMessage {
            owner: self.owner,
            prefab: self.prefab.clone(),
            instance: self.instance,
            position: self.transform.position,
            euler: self.transform.euler(),
            active: self.flags.contains(EntityFlags::ACTIVE),
            snapshot: snapshot.into_vec(),
        }
        .encode()
    }

    fn spawn_type(&self) -> MessageType {
        if self.is_player() {
            MessageType::CREATE_PLAYER
        } else {
            MessageType::SPAWN
        }
    }
}

impl std::fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRecord")
            .field("instance", &self.instance)
            .field("prefab", &self.prefab)
            .field("owner", &self.owner)
            .field("transform", &self.transform)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct BufferedSpawn {
    message: SpawnMessage,
    player: bool,
}

/// Entities removed or handed back to the server when a connection leaves.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Cascade {
    pub destroyed: Vec<InstanceId>,
    pub released: Vec<InstanceId>,
}

/// Every replicated entity known to this peer, with ownership bookkeeping.
pub struct Directory {
    entities: BTreeMap<InstanceId, EntityRecord>,
    ids: IdAllocator,
    prefabs: PrefabRegistry,
    authority: HashMap<ConnectionId, BTreeSet<InstanceId>>,
    buffered: Vec<BufferedSpawn>,
    scene_ready: bool,
}

impl Directory {
    pub fn new(prefabs: PrefabRegistry) -> Self {
        Self {
            entities: BTreeMap::new(),
            ids: IdAllocator::new(),
            prefabs,
            authority: HashMap::new(),
            buffered: Vec::new(),
            scene_ready: false,
        }
    }

    pub fn prefabs(&self) -> &PrefabRegistry {
        &self.prefabs
    }

    pub fn get(&self, instance: InstanceId) -> Option<&EntityRecord> {
        self.entities.get(&instance)
    }

    pub fn get_mut(&mut self, instance: InstanceId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&instance)
    }

    pub fn contains(&self, instance: InstanceId) -> bool {
        self.entities.contains_key(&instance)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// `Some(owner)` if the instance exists.
    pub fn owner_of(&self, instance: InstanceId) -> Option<Option<ConnectionId>> {
        self.entities.get(&instance).map(|record| record.owner)
    }

    pub fn authority_of(&self, connection: ConnectionId) -> Vec<InstanceId> {
        self.authority
            .get(&connection)
            .map(|owned| owned.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn player_of(&self, connection: ConnectionId) -> Option<InstanceId> {
        self.authority.get(&connection)?.iter().copied().find(|id| {
            self.entities
                .get(id)
                .is_some_and(EntityRecord::is_player)
        })
    }

    /// Runs an RPC against the entity's behaviour. Returns false if the
    /// instance is unknown.
    pub fn invoke(&mut self, session: &Session, call: &Invocation) -> bool {
        let Some(record) = self.entities.get_mut(&call.instance) else {
            return false;
        };
        record.with_context(session.role(), session.local_id(), |behaviour, ctx| {
            behaviour.on_rpc(ctx, call)
        });
        true
    }

    pub fn spawn(
        &mut self,
        session: &mut Session,
        prefab: &str,
        position: Vec3,
        orientation: Quat,
        owner: Option<ConnectionId>,
    ) -> Result<InstanceId, DirectoryError> {
        self.spawn_with(
            session,
            prefab,
            Transform::new(position, orientation),
            owner,
            EntityFlags::ACTIVE,
        )
    }

    /// Server: creates an entity and announces it to every ready connection.
    pub fn spawn_with(
        &mut self,
        session: &mut Session,
        prefab: &str,
        transform: Transform,
        owner: Option<ConnectionId>,
        flags: EntityFlags,
    ) -> Result<InstanceId, DirectoryError> {
        if !session.is_server() {
            return Err(DirectoryError::ServerOnly);
        }
        if let Some(owner) = owner
            && !session.connections().contains(owner)
        {
            return Err(DirectoryError::UnknownConnection(owner));
        }
        let behaviour = self
            .prefabs
            .create(prefab)
            .ok_or_else(|| DirectoryError::UnknownPrefab(prefab.to_string()))?;
        let instance = self.ids.allocate().ok_or(DirectoryError::Exhausted)?;

        let mut record = EntityRecord {
            instance,
            prefab: prefab.to_string(),
            owner,
            transform,
            flags,
            behaviour,
            links: BTreeSet::new(),
        };
        record.with_context(Role::Server, None, |behaviour, ctx| {
            behaviour.on_server_init(ctx);
            if ctx.is_owner() {
                behaviour.on_owner_init(ctx);
            }
        });

        let payload = match record.spawn_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.ids.release(instance);
                return Err(e.into());
            }
        };
        let message_type = record.spawn_type();

        log::debug!("Spawned {} {} owned by {:?}", prefab, instance, owner);
        self.insert(session, record);
        session.broadcast(Channel::ReliableFragmented, message_type, &payload);
        Ok(instance)
    }

    fn insert(&mut self, session: &mut Session, record: EntityRecord) {
        let instance = record.instance;
        let owner = record.owner;
        if let Some(owner) = owner {
            self.authority.entry(owner).or_default().insert(instance);
            if record.is_player()
                && let Some(connection) = session.connections_mut().get_mut(owner)
            {
                connection.session_entity = Some(instance);
            }
        }
        self.entities.insert(instance, record);
        session.emit(NetEvent::EntitySpawned { instance, owner });
    }

    /// Server: removes an entity everywhere.
    pub fn despawn(&mut self, session: &mut Session, instance: InstanceId) -> Result<EntityRecord, DirectoryError> {
        if !session.is_server() {
            return Err(DirectoryError::ServerOnly);
        }
        let record = self
            .remove(session, instance)
            .ok_or(DirectoryError::UnknownInstance(instance))?;
        session.broadcast(
            Channel::ReliableFragmented,
            MessageType::DESPAWN,
            &encode_despawn(instance),
        );
        Ok(record)
    }

    fn remove(&mut self, session: &mut Session, instance: InstanceId) -> Option<EntityRecord> {
        let record = self.entities.remove(&instance)?;
        self.ids.release(instance);

        if let Some(owner) = record.owner {
            self.forget_authority(owner, instance);
            if let Some(connection) = session.connections_mut().get_mut(owner)
                && connection.session_entity == Some(instance)
            {
                connection.session_entity = None;
            }
        }
        for other in self.entities.values_mut() {
            other.links.remove(&instance);
        }

        log::debug!("Despawned {} {}", record.prefab, instance);
        session.emit(NetEvent::EntityDespawned { instance });
        Some(record)
    }

    fn forget_authority(&mut self, owner: ConnectionId, instance: InstanceId) {
        if let Some(owned) = self.authority.get_mut(&owner) {
            owned.remove(&instance);
            if owned.is_empty() {
                self.authority.remove(&owner);
            }
        }
    }

    /// Server: hands the entity to `connection`. Returns the previous owner.
    pub fn register_authority(
        &mut self,
        session: &mut Session,
        connection: ConnectionId,
        instance: InstanceId,
    ) -> Result<Option<ConnectionId>, DirectoryError> {
        if !session.is_server() {
            return Err(DirectoryError::ServerOnly);
        }
        if !session.connections().contains(connection) {
            return Err(DirectoryError::UnknownConnection(connection));
        }
        self.set_owner(session, instance, Some(connection))
    }

    /// Server: returns the entity to server ownership.
    pub fn revoke_authority(
        &mut self,
        session: &mut Session,
        instance: InstanceId,
    ) -> Result<Option<ConnectionId>, DirectoryError> {
        if !session.is_server() {
            return Err(DirectoryError::ServerOnly);
        }
        self.set_owner(session, instance, None)
    }

    fn set_owner(
        &mut self,
        session: &mut Session,
        instance: InstanceId,
        owner: Option<ConnectionId>,
    ) -> Result<Option<ConnectionId>, DirectoryError> {
        let record = self
            .entities
            .get_mut(&instance)
            .ok_or(DirectoryError::UnknownInstance(instance))?;
        let previous = record.owner;
        if previous == owner {
            return Ok(previous);
        }
        record.owner = owner;

        if let Some(previous) = previous {
            self.forget_authority(previous, instance);
        }
        if let Some(owner) = owner {
            self.authority.entry(owner).or_default().insert(instance);
        }

        session.emit(NetEvent::AuthorityChanged {
            instance,
            previous,
            owner,
        });
        if session.is_server() {
            let message = AuthorityMessage { instance, owner };
            session.broadcast(
                Channel::ReliableFragmented,
                MessageType::AUTHORITY,
                &message.encode(),
            );
        }
        Ok(previous)
    }

    /// Records that `holder` references `target`. The link is cleared when
    /// `target` is destroyed.
    pub fn link(&mut self, holder: InstanceId, target: InstanceId) -> Result<(), DirectoryError> {
        if !self.entities.contains_key(&target) {
            return Err(DirectoryError::UnknownInstance(target));
        }
        let record = self
            .entities
            .get_mut(&holder)
            .ok_or(DirectoryError::UnknownInstance(holder))?;
        record.links.insert(target);
        Ok(())
    }

    pub fn unlink(&mut self, holder: InstanceId, target: InstanceId) -> bool {
        self.entities
            .get_mut(&holder)
            .is_some_and(|record| record.links.remove(&target))
    }

    /// Server: destroys the connection's player and `DESTROY_WITH_OWNER`
    /// entities, and hands its other entities back to the server.
    pub fn disconnect_cascade(&mut self, session: &mut Session, connection: ConnectionId) -> Cascade {
        let mut cascade = Cascade::default();
        let owned = self.authority.get(&connection).cloned().unwrap_or_default();

        for instance in owned {
            let destroy = self.entities.get(&instance).is_some_and(|record| {
                record
                    .flags
                    .intersects(EntityFlags::PLAYER | EntityFlags::DESTROY_WITH_OWNER)
            });
            if destroy {
                if self.despawn(session, instance).is_ok() {
                    cascade.destroyed.push(instance);
                }
            } else if self.set_owner(session, instance, None).is_ok() {
                cascade.released.push(instance);
            }
        }
        self.authority.remove(&connection);

        if !cascade.destroyed.is_empty() || !cascade.released.is_empty() {
            log::info!(
                "{} left: destroyed {:?}, released {:?}",
                connection,
                cascade.destroyed,
                cascade.released
            );
        }
        cascade
    }

    /// Server: sends the current entity set to a joining connection, players
    /// first. Returns how many messages were sent.
    pub fn replay_to(&self, session: &mut Session, connection: ConnectionId) -> Result<usize, DirectoryError> {
        let players = self.entities.values().filter(|r| r.is_player());
        let others = self.entities.values().filter(|r| !r.is_player());

        let mut sent = 0;
        for record in players.chain(others) {
            let payload = record.spawn_payload()?;
            session.send(
                connection,
                Channel::ReliableFragmented,
                record.spawn_type(),
                &payload,
            )?;
            sent += 1;
        }
        Ok(sent)
    }

    pub fn is_scene_ready(&self) -> bool {
        self.scene_ready
    }

    /// Client: once the scene is ready, buffered spawns whose owner is known
    /// are created. Returns the created instances.
    pub fn set_scene_ready(&mut self, session: &mut Session, ready: bool) -> Vec<InstanceId> {
        self.scene_ready = ready;
        if ready {
            self.flush_buffered(session)
        } else {
            Vec::new()
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    fn owner_known(session: &Session, owner: Option<ConnectionId>) -> bool {
        owner.is_none_or(|owner| session.connections().contains(owner))
    }

    /// Client: mirrors a spawn or player creation from the server, or
    /// buffers it until the scene is ready and its owner is known.
    pub fn receive_spawn(&mut self, session: &mut Session, message: SpawnMessage, player: bool) -> Option<InstanceId> {
        if self.entities.contains_key(&message.instance) {
            log::debug!("Ignoring duplicate spawn of {}", message.instance);
            return None;
        }
        if !self.scene_ready || !Self::owner_known(session, message.owner) {
            log::debug!("Buffering spawn of {} for {:?}", message.instance, message.owner);
            self.buffered.push(BufferedSpawn { message, player });
            return None;
        }
        self.create_mirror(session, message, player)
    }

    /// Client: replays buffered spawns that can now be created, in arrival
    /// order.
    pub fn flush_buffered(&mut self, session: &mut Session) -> Vec<InstanceId> {
        if !self.scene_ready || self.buffered.is_empty() {
            return Vec::new();
        }

        let mut created = Vec::new();
        for entry in std::mem::take(&mut self.buffered) {
            if !Self::owner_known(session, entry.message.owner) {
                self.buffered.push(entry);
                continue;
            }
            if self.entities.contains_key(&entry.message.instance) {
                continue;
            }
            if let Some(instance) = self.create_mirror(session, entry.message, entry.player) {
                created.push(instance);
            }
        }
        created
    }

    fn create_mirror(&mut self, session: &mut Session, message: SpawnMessage, player: bool) -> Option<InstanceId> {
        let Some(mut behaviour) = self.prefabs.create(&message.prefab) else {
            log::warn!("Spawn of {} names unknown prefab {:?}", message.instance, message.prefab);
            return None;
        };
        if let Err(e) = behaviour.read_spawn(&mut NetReader::new(&message.snapshot)) {
            log::warn!("Bad spawn snapshot for {}: {}", message.instance, e);
            return None;
        }

        let mut flags = EntityFlags::empty();
        flags.set(EntityFlags::ACTIVE, message.active);
        flags.set(EntityFlags::PLAYER, player);

        let instance = message.instance;
        let mut record = EntityRecord {
            instance,
            prefab: message.prefab,
            owner: message.owner,
            transform: Transform::from_euler(message.position, message.euler),
            flags,
            behaviour,
            links: BTreeSet::new(),
        };
        record.with_context(Role::Client, session.local_id(), |behaviour, ctx| {
            behaviour.on_client_init(ctx);
            if ctx.is_owner() {
                behaviour.on_owner_init(ctx);
            }
        });

        self.insert(session, record);
        Some(instance)
    }

    /// Client: drops the entity, or its buffered spawn if not yet created.
    pub fn receive_despawn(&mut self, session: &mut Session, instance: InstanceId) -> Option<EntityRecord> {
        self.buffered.retain(|entry| entry.message.instance != instance);
        self.remove(session, instance)
    }

    /// Client: records an ownership change. A spawn still held in the buffer
    /// takes the new owner, so it is released once that owner is known.
    pub fn receive_authority(&mut self, session: &mut Session, message: AuthorityMessage) -> bool {
        if let Some(entry) = self
            .buffered
            .iter_mut()
            .find(|entry| entry.message.instance == message.instance)
        {
            entry.message.owner = message.owner;
            return false;
        }
        self.set_owner(session, message.instance, message.owner).is_ok()
    }

    /// Client: applies a streamed pose unless this peer drives the entity.
    pub fn apply_pose(&mut self, session: &Session, instance: InstanceId, transform: Transform) -> bool {
        let Some(record) = self.entities.get_mut(&instance) else {
            return false;
        };
        if record.owner.is_some() && record.owner == session.local_id() {
            return false;
        }
        record.transform = transform;
        true
    }

    /// Forgets every entity and buffered spawn. The scene-ready flag is kept.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.authority.clear();
        self.buffered.clear();
        self.ids.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryNetwork;
    use crate::session::Inbound;

    #[derive(Default)]
    struct Marker {
        server_init: bool,
        owner_init: bool,
        label: String,
    }

    impl NetBehaviour for Marker {
        fn on_server_init(&mut self, _ctx: &mut EntityContext<'_>) {
            self.server_init = true;
        }

        fn on_owner_init(&mut self, _ctx: &mut EntityContext<'_>) {
            self.owner_init = true;
        }

        fn write_spawn(&self, writer: &mut crate::wire::NetWriter) -> Result<(), WireError> {
            writer.write_string(&self.label)
        }

        fn read_spawn(&mut self, reader: &mut NetReader<'_>) -> Result<(), WireError> {
            self.label = reader.read_string()?;
            Ok(())
        }
    }

    fn prefabs() -> PrefabRegistry {
        let mut prefabs = PrefabRegistry::new();
        prefabs.register("marker", Marker::default);
        prefabs
    }

    fn server_with_client() -> (Session, Session, ConnectionId) {
        let network = MemoryNetwork::new();
        let mut server = Session::server(Box::new(network.server()), 8);
        let client = Session::client(Box::new(network.connect()));
        let inbound = server.pump();
        let Some(Inbound::ClientConnected(id)) = inbound.first().cloned() else {
            panic!("client did not connect");
        };
        (server, client, id)
    }

    #[test]
    fn test_spawn_runs_server_hooks() {
        let (mut session, _, _) = server_with_client();
        let mut directory = Directory::new(prefabs());

        let id = directory
            .spawn(&mut session, "marker", Vec3::X, Quat::IDENTITY, None)
            .unwrap();
        let marker = directory.get(id).unwrap().behaviour::<Marker>().unwrap();
        assert!(marker.server_init);
        assert!(marker.owner_init);
        assert_eq!(directory.owner_of(id), Some(None));
    }

    #[test]
    fn test_spawn_rejects_unknown_prefab_and_connection() {
        let (mut session, _, _) = server_with_client();
        let mut directory = Directory::new(prefabs());

        assert!(matches!(
            directory.spawn(&mut session, "ghost", Vec3::ZERO, Quat::IDENTITY, None),
            Err(DirectoryError::UnknownPrefab(_))
        ));
        assert!(matches!(
            directory.spawn(
                &mut session,
                "marker",
                Vec3::ZERO,
                Quat::IDENTITY,
                ConnectionId::new(99)
            ),
            Err(DirectoryError::UnknownConnection(_))
        ));
        assert!(directory.is_empty());
    }

    #[test]
    fn test_client_owned_entity_skips_owner_init_on_server() {
        let (mut session, _, conn) = server_with_client();
        let mut directory = Directory::new(prefabs());

        let id = directory
            .spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, Some(conn))
            .unwrap();
        assert!(!directory.get(id).unwrap().behaviour::<Marker>().unwrap().owner_init);
        assert_eq!(directory.authority_of(conn), vec![id]);
    }

    #[test]
    fn test_despawn_reuses_lowest_id_and_clears_links() {
        let (mut session, _, _) = server_with_client();
        let mut directory = Directory::new(prefabs());

        let a = directory.spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        let b = directory.spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        directory.link(a, b).unwrap();

        directory.despawn(&mut session, b).unwrap();
        assert_eq!(directory.get(a).unwrap().links().count(), 0);

        let c = directory.spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        assert_eq!(c, b);
    }

    #[test]
    fn test_authority_transfer_is_bookkeeping() {
        let (mut session, _, conn) = server_with_client();
        let mut directory = Directory::new(prefabs());
        let id = directory.spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, None).unwrap();

        assert_eq!(directory.register_authority(&mut session, conn, id).unwrap(), None);
        assert_eq!(directory.authority_of(conn), vec![id]);
        assert_eq!(directory.revoke_authority(&mut session, id).unwrap(), Some(conn));
        assert!(directory.authority_of(conn).is_empty());
        assert!(directory.get(id).unwrap().behaviour::<Marker>().unwrap().server_init);

        let events = session.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            NetEvent::AuthorityChanged { previous: None, owner: Some(_), .. }
        )));
    }

    #[test]
    fn test_disconnect_cascade() {
        let (mut session, _, conn) = server_with_client();
        let mut directory = Directory::new(prefabs());

        let player = directory
            .spawn_with(
                &mut session,
                "marker",
                Transform::default(),
                Some(conn),
                EntityFlags::ACTIVE | EntityFlags::PLAYER,
            )
            .unwrap();
        let projectile = directory
            .spawn_with(
                &mut session,
                "marker",
                Transform::default(),
                Some(conn),
                EntityFlags::ACTIVE | EntityFlags::DESTROY_WITH_OWNER,
            )
            .unwrap();
        let vehicle = directory
            .spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, Some(conn))
            .unwrap();
        let door = directory.spawn(&mut session, "marker", Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        directory.link(door, player).unwrap();
        assert_eq!(directory.player_of(conn), Some(player));

        let cascade = directory.disconnect_cascade(&mut session, conn);
        assert_eq!(cascade.destroyed, vec![player, projectile]);
        assert_eq!(cascade.released, vec![vehicle]);
        assert_eq!(directory.owner_of(vehicle), Some(None));
        assert!(directory.contains(door));
        assert_eq!(directory.get(door).unwrap().links().count(), 0);
        assert!(directory.authority_of(conn).is_empty());
    }

    #[test]
    fn test_client_buffers_until_scene_and_owner_known() {
        let (_, mut client, _) = server_with_client();
        client.pump();
        let mut directory = Directory::new(prefabs());
        let owner = ConnectionId::new(4);

        let message = SpawnMessage {
            owner,
            prefab: "marker".into(),
            instance: InstanceId::new(2).unwrap(),
            position: Vec3::Y,
            euler: Vec3::ZERO,
            active: true,
            snapshot: {
                let mut w = crate::wire::NetWriter::new();
                w.write_string("crate").unwrap();
                w.into_vec()
            },
        };
        assert!(directory.receive_spawn(&mut client, message.clone(), false).is_none());
        assert!(directory.set_scene_ready(&mut client, true).is_empty());
        assert_eq!(directory.buffered_len(), 1);

        client.connections_mut().insert_remote(owner.unwrap());
        let created = directory.flush_buffered(&mut client);
        assert_eq!(created, vec![message.instance]);
        let record = directory.get(message.instance).unwrap();
        assert_eq!(record.behaviour::<Marker>().unwrap().label, "crate");
        assert_eq!(record.transform.position, Vec3::Y);

        assert!(directory.receive_spawn(&mut client, message, false).is_none());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_despawn_removes_buffered_spawn() {
        let (_, mut client, _) = server_with_client();
        let mut directory = Directory::new(prefabs());
        let instance = InstanceId::new(5).unwrap();
        let message = SpawnMessage {
            owner: None,
            prefab: "marker".into(),
            instance,
            position: Vec3::ZERO,
            euler: Vec3::ZERO,
            active: true,
            snapshot: vec![0, 0],
        };

        directory.receive_spawn(&mut client, message, false);
        directory.receive_despawn(&mut client, instance);
        assert!(directory.set_scene_ready(&mut client, true).is_empty());
        assert!(!directory.contains(instance));
    }
}
