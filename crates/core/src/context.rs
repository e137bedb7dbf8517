use crate::config::NetSettings;
use crate::directory::{
    AuthorityMessage, Directory, DirectoryError, EntityFlags, EntityStateMessage, InstanceId, PoseSync,
    PrefabRegistry, SpawnMessage, Transform, decode_despawn,
};
use crate::input::{PredictionEngine, decode_stream_message};
use crate::net::{Channel, DisconnectReason, NetworkStats, Transport};
use crate::rpc::{DeliveryMode, MethodTable, RpcDispatcher, RpcError, RpcValue};
use crate::session::{
    ConnectionId, Inbound, MessageHandler, NetEvent, RemoteConnect, RemoteDisconnect, Role, Session, SessionError,
};
use crate::simulation::FixedTimestep;
use crate::wire::{MessageType, NetReader, WireError};

/// Everything one peer needs to take part in a session. The process entry
/// point owns it and drives it with [`NetContext::update`] or
/// [`NetContext::tick`].
pub struct NetContext {
    session: Session,
    directory: Directory,
    rpc: RpcDispatcher,
    prediction: PredictionEngine,
    pose_sync: PoseSync,
    settings: NetSettings,
    timestep: FixedTimestep,
    tick: u64,
    server_lost: bool,
}

impl NetContext {
    pub fn server(
        transport: Box<dyn Transport>,
        settings: NetSettings,
        prefabs: PrefabRegistry,
        methods: MethodTable,
    ) -> Self {
        let session = Session::server(transport, settings.max_connections);
        let mut context = Self::new(session, settings, prefabs, methods);
        // The server's scene is the authoritative one.
        context.directory.set_scene_ready(&mut context.session, true);
        context
    }

    pub fn client(
        transport: Box<dyn Transport>,
        settings: NetSettings,
        prefabs: PrefabRegistry,
        methods: MethodTable,
    ) -> Self {
        Self::new(Session::client(transport), settings, prefabs, methods)
    }

    fn new(session: Session, settings: NetSettings, prefabs: PrefabRegistry, methods: MethodTable) -> Self {
        Self {
            session,
            directory: Directory::new(prefabs),
            rpc: RpcDispatcher::new(methods),
            prediction: PredictionEngine::new(&settings),
            pose_sync: PoseSync::new(settings.pose_refresh_intervals),
            timestep: FixedTimestep::new(settings.tick_rate),
            settings,
            tick: 0,
            server_lost: false,
        }
    }

    pub fn is_server(&self) -> bool {
        self.session.is_server()
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.session.local_id()
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn settings(&self) -> &NetSettings {
        &self.settings
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    pub fn rpc(&self) -> &RpcDispatcher {
        &self.rpc
    }

    pub fn prediction(&self) -> &PredictionEngine {
        &self.prediction
    }

    pub fn stats(&self) -> NetworkStats {
        self.session.stats()
    }

    /// Our player entity, once the server has created it.
    pub fn local_player(&self) -> Option<InstanceId> {
        self.local_id()
            .and_then(|local| self.directory.player_of(local))
    }

    pub fn register_handler<H>(&mut self, message_type: MessageType, handler: H) -> Result<(), SessionError>
    where
        H: MessageHandler + 'static,
    {
        self.session.register_handler(message_type, handler)
    }

    pub fn drain_events(&mut self) -> Vec<NetEvent> {
        self.session.drain_events()
    }

    /// Feeds frame time in and runs as many fixed ticks as it covers.
    pub fn update(&mut self, elapsed: f32) -> u32 {
        self.timestep.accumulate(elapsed);
        let mut ticks = 0;
        while self.timestep.consume_tick() {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    /// Fraction of the next tick already elapsed.
    pub fn alpha(&self) -> f32 {
        self.timestep.alpha()
    }

    /// One fixed step: drain and route the network, run prediction, then send.
    pub fn tick(&mut self) {
        self.tick += 1;

        for inbound in self.session.pump() {
            self.route(inbound);
        }

        self.prediction
            .tick(&mut self.session, &mut self.directory, self.tick);

        if self.tick % self.settings.send_interval_ticks() == 0 {
            self.send_streams();
        }
        self.session.flush();
    }

    fn route(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::ClientConnected(id) => self.session.emit(NetEvent::ClientConnected(id)),
            Inbound::ClientDisconnected(id, reason) => self.connection_closed(id, reason),
            Inbound::ServerReached => log::debug!("Transport reached the server"),
            Inbound::ServerLost(reason) => self.server_closed(reason),
            Inbound::Message {
                from,
                message_type,
                payload,
            } => self.route_message(from, message_type, &payload),
        }
    }

    fn route_message(&mut self, from: Option<ConnectionId>, message_type: MessageType, payload: &[u8]) {
        if !message_type.is_reserved() {
            if !self.session.dispatch(from, message_type, payload) {
                log::debug!("No handler for message type {}", message_type);
            }
            return;
        }

        let role = self.session.role();
        let result = match (role, message_type, from) {
            (Role::Client, MessageType::REMOTE_CONNECT, None) => self.on_remote_connect(payload),
            (Role::Client, MessageType::REMOTE_DISCONNECT, None) => self.on_remote_disconnect(payload),
            (Role::Server, MessageType::CLIENT_READY, Some(from)) => {
                self.on_client_ready(from);
                Ok(())
            }
            (Role::Client, MessageType::SPAWN | MessageType::CREATE_PLAYER, None) => {
                self.on_spawn(message_type == MessageType::CREATE_PLAYER, payload)
            }
            (Role::Client, MessageType::DESPAWN, None) => self.on_despawn(payload),
            (Role::Client, MessageType::AUTHORITY, None) => self.on_authority(payload),
            (_, MessageType::RPC, _) => {
                self.rpc
                    .receive(&mut self.session, &mut self.directory, from, payload);
                Ok(())
            }
            (Role::Server, MessageType::CLIENT_INPUT, Some(from)) => self.on_client_input(from, payload),
            (Role::Client, MessageType::SERVER_OUTPUT, None) => self.on_server_output(payload),
            (Role::Client, MessageType::ENTITY_STATE, None) => self.on_entity_state(payload),
            _ => {
                log::debug!("Ignoring message type {} from {:?}", message_type, from);
                Ok(())
            }
        };

        if let Err(e) = result {
            log::warn!("Malformed message {} from {:?}: {}", message_type, from, e);
        }
    }

    // --- client side ---

    fn on_remote_connect(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let notice = RemoteConnect::decode(&mut NetReader::new(payload))?;
        if notice.is_local {
            log::info!("Connected as {}", notice.connection);
            self.server_lost = false;
            self.session.set_local_id(notice.connection);
            self.session.emit(NetEvent::Connected {
                local: notice.connection,
            });
            if self.directory.is_scene_ready() {
                self.send_ready();
            }
        } else if self.session.connections_mut().insert_remote(notice.connection) {
            log::debug!("{} joined", notice.connection);
            self.session.emit(NetEvent::RemoteConnected(notice.connection));
        }

        let created = self.directory.flush_buffered(&mut self.session);
        self.entities_created(created);
        Ok(())
    }

    fn on_remote_disconnect(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let notice = RemoteDisconnect::decode(&mut NetReader::new(payload))?;
        if self.session.connections_mut().remove(notice.connection).is_some() {
            log::debug!("{} left", notice.connection);
            self.session.emit(NetEvent::RemoteDisconnected(notice.connection));
        }
        Ok(())
    }

    fn on_spawn(&mut self, player: bool, payload: &[u8]) -> Result<(), WireError> {
        let message = SpawnMessage::decode(&mut NetReader::new(payload))?;
        if let Some(instance) = self
            .directory
            .receive_spawn(&mut self.session, message, player)
        {
            self.entities_created(vec![instance]);
        }
        Ok(())
    }

    fn on_despawn(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let instance = decode_despawn(&mut NetReader::new(payload))?;
        self.directory.receive_despawn(&mut self.session, instance);
        self.entity_removed(instance);
        Ok(())
    }

    fn on_authority(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let message = AuthorityMessage::decode(&mut NetReader::new(payload))?;
        let instance = message.instance;
        if self.directory.receive_authority(&mut self.session, message) {
            self.prediction
                .track(&self.session, &mut self.directory, instance);
        }
        let created = self.directory.flush_buffered(&mut self.session);
        self.entities_created(created);
        Ok(())
    }

    fn on_server_output(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let (instance, frames) = decode_stream_message(payload)?;
        self.prediction.receive_outputs(instance, frames);
        Ok(())
    }

    fn on_entity_state(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let message = EntityStateMessage::decode(&mut NetReader::new(payload))?;
        let transform = Transform::from_euler(message.position, message.euler);
        self.directory
            .apply_pose(&self.session, message.instance, transform);
        Ok(())
    }

    /// Client: tells the server we can receive replication traffic.
    fn send_ready(&mut self) {
        if let Err(e) = self
            .session
            .send_to_server(Channel::ReliableFragmented, MessageType::CLIENT_READY, &[])
        {
            log::warn!("Failed to send ready: {}", e);
        }
    }

    /// Marks the local scene loaded. On a client this releases buffered
    /// spawns and completes the ready handshake.
    pub fn set_scene_ready(&mut self, ready: bool) {
        let created = self.directory.set_scene_ready(&mut self.session, ready);
        self.entities_created(created);
        if ready && !self.session.is_server() && self.session.local_id().is_some() {
            self.send_ready();
        }
    }

    /// Client: leaves the server and clears every table.
    pub fn disconnect(&mut self) {
        if self.session.is_server() {
            return;
        }
        self.session.disconnect(None);
        self.server_closed(DisconnectReason::Graceful);
    }

    fn server_closed(&mut self, reason: DisconnectReason) {
        if self.server_lost {
            return;
        }
        self.server_lost = true;
        log::warn!("Lost the server: {}", reason.as_str());

        self.directory.clear();
        self.rpc.clear();
        self.prediction.clear();
        self.session.reset();
        self.session.emit(NetEvent::Disconnected { reason });
    }

    // --- server side ---

    fn on_client_ready(&mut self, joiner: ConnectionId) {
        let Some(connection) = self.session.connections_mut().get_mut(joiner) else {
            return;
        };
        if connection.ready {
            log::debug!("{} sent ready twice", joiner);
            return;
        }
        connection.ready = true;

        let joined = RemoteConnect {
            connection: joiner,
            is_local: false,
        }
        .encode();
        let others: Vec<ConnectionId> = self
            .session
            .connections()
            .ready_ids()
            .into_iter()
            .filter(|&id| id != joiner)
            .collect();
        for other in others {
            let existing = RemoteConnect {
                connection: other,
                is_local: false,
            }
            .encode();
            for (to, notice) in [(other, &joined), (joiner, &existing)] {
                if let Err(e) = self
                    .session
                    .send(to, Channel::ReliableFragmented, MessageType::REMOTE_CONNECT, notice)
                {
                    log::warn!("Failed to introduce {} and {}: {}", joiner, other, e);
                }
            }
        }

        let entities = match self.directory.replay_to(&mut self.session, joiner) {
            Ok(sent) => sent,
            Err(e) => {
                log::warn!("Entity replay to {} failed: {}", joiner, e);
                0
            }
        };

        if let Some(prefab) = self.settings.player_prefab.clone() {
            let flags = EntityFlags::ACTIVE | EntityFlags::PLAYER | EntityFlags::DESTROY_WITH_OWNER;
            match self.spawn_with(&prefab, Transform::default(), Some(joiner), flags) {
                Ok(player) => log::debug!("Created player {} for {}", player, joiner),
                Err(e) => log::warn!("Failed to create player for {}: {}", joiner, e),
            }
        }

        let calls = self.rpc.replay_to(&mut self.session, joiner);
        log::info!("{} ready: replayed {} entities and {} calls", joiner, entities, calls);
        self.session.emit(NetEvent::ClientReady(joiner));
    }

    fn on_client_input(&mut self, from: ConnectionId, payload: &[u8]) -> Result<(), WireError> {
        let (instance, frames) = decode_stream_message(payload)?;
        if self.directory.owner_of(instance) != Some(Some(from)) {
            log::debug!("Ignoring input for {} from non-owner {}", instance, from);
            return Ok(());
        }
        self.prediction.receive_inputs(instance, frames);
        Ok(())
    }

    /// Server: drops a connection as if it had left.
    pub fn kick(&mut self, connection: ConnectionId) {
        if !self.session.is_server() {
            return;
        }
        self.session.disconnect(Some(connection));
        if self.session.connections_mut().remove(connection).is_some() {
            self.connection_closed(connection, DisconnectReason::Kicked);
        }
    }

    fn connection_closed(&mut self, connection: ConnectionId, reason: DisconnectReason) {
        let cascade = self
            .directory
            .disconnect_cascade(&mut self.session, connection);
        for &instance in &cascade.destroyed {
            self.entity_removed(instance);
        }
        for &instance in &cascade.released {
            self.prediction
                .track(&self.session, &mut self.directory, instance);
        }
        self.rpc.drop_sender(connection);

        let notice = RemoteDisconnect { connection }.encode();
        self.session
            .broadcast(Channel::ReliableFragmented, MessageType::REMOTE_DISCONNECT, &notice);
        self.session.emit(NetEvent::ClientDisconnected { connection, reason });
    }

    fn send_streams(&mut self) {
        self.prediction
            .flush(&mut self.session, self.settings.input_channel);

        if self.session.is_server() {
            for message in self.pose_sync.collect(&self.directory) {
                self.session
                    .broadcast(Channel::Unreliable, MessageType::ENTITY_STATE, &message.encode());
            }
        }
    }

    // --- entity management ---

    fn entities_created(&mut self, created: Vec<InstanceId>) {
        for instance in created {
            self.prediction
                .track(&self.session, &mut self.directory, instance);
            self.rpc
                .instance_created(&mut self.session, &mut self.directory, instance);
        }
    }

    fn entity_removed(&mut self, instance: InstanceId) {
        self.prediction.untrack(instance);
        self.rpc.drop_instance(instance);
        self.pose_sync.forget(instance);
    }

    pub fn spawn(
        &mut self,
        prefab: &str,
        transform: Transform,
        owner: Option<ConnectionId>,
    ) -> Result<InstanceId, DirectoryError> {
        self.spawn_with(prefab, transform, owner, EntityFlags::ACTIVE)
    }

    pub fn spawn_with(
        &mut self,
        prefab: &str,
        transform: Transform,
        owner: Option<ConnectionId>,
        flags: EntityFlags,
    ) -> Result<InstanceId, DirectoryError> {
        let instance = self
            .directory
            .spawn_with(&mut self.session, prefab, transform, owner, flags)?;
        self.prediction
            .track(&self.session, &mut self.directory, instance);
        Ok(instance)
    }

    pub fn despawn(&mut self, instance: InstanceId) -> Result<(), DirectoryError> {
        self.directory.despawn(&mut self.session, instance)?;
        self.entity_removed(instance);
        Ok(())
    }

    pub fn register_authority(
        &mut self,
        connection: ConnectionId,
        instance: InstanceId,
    ) -> Result<Option<ConnectionId>, DirectoryError> {
        let previous = self
            .directory
            .register_authority(&mut self.session, connection, instance)?;
        self.prediction
            .track(&self.session, &mut self.directory, instance);
        Ok(previous)
    }

    pub fn revoke_authority(&mut self, instance: InstanceId) -> Result<Option<ConnectionId>, DirectoryError> {
        let previous = self
            .directory
            .revoke_authority(&mut self.session, instance)?;
        self.prediction
            .track(&self.session, &mut self.directory, instance);
        Ok(previous)
    }

    /// Issues an RPC on `instance`. See [`DeliveryMode`] for routing.
    pub fn call(
        &mut self,
        instance: InstanceId,
        mode: DeliveryMode,
        method: &str,
        args: Vec<RpcValue>,
    ) -> Result<(), RpcError> {
        self.rpc
            .call(&mut self.session, &mut self.directory, instance, mode, method, args)
    }
}
