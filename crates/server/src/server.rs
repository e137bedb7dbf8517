use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

use tether::player::{CRATE_PREFAB, DRONE_PREFAB, register_methods, register_prefabs};
use tether::{
    ConnectionId, EntityFlags, InstanceId, MethodTable, NetContext, NetEvent, NetSettings, NetworkStats, PrefabRegistry,
    Transform, UdpServerTransport,
};

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub buffered_calls: usize,
    pub network_stats: NetworkStats,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub address: Option<SocketAddr>,
    pub ready: bool,
    pub player: Option<InstanceId>,
}

/// The authoritative peer: a UDP transport under a [`NetContext`], ticked
/// against the wall clock.
pub struct TetherServer {
    context: NetContext,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    start_time: Instant,
    last_update: Instant,
}

impl TetherServer {
    pub fn new(settings: NetSettings) -> anyhow::Result<Self> {
        let transport = UdpServerTransport::bind(settings.bind_addr(), &settings)?;
        let local_addr = transport.local_addr();

        let mut prefabs = PrefabRegistry::new();
        register_prefabs(&mut prefabs);
        let mut methods = MethodTable::new();
        register_methods(&mut methods)?;

        let now = Instant::now();
        Ok(Self {
            context: NetContext::server(Box::new(transport), settings, prefabs, methods),
            local_addr,
            running: Arc::new(AtomicBool::new(true)),
            start_time: now,
            last_update: now,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Scatters crates on a ring and parks drones above the middle.
    pub fn populate(&mut self, crates: usize, drones: usize) -> anyhow::Result<()> {
        for i in 0..crates {
            let angle = i as f32 / crates as f32 * std::f32::consts::TAU;
            let position = Vec3::new(angle.cos() * 8.0, 0.0, angle.sin() * 8.0);
            self.context.spawn_with(
                CRATE_PREFAB,
                Transform::new(position, Quat::IDENTITY),
                None,
                EntityFlags::ACTIVE | EntityFlags::SYNC_TRANSFORM,
            )?;
        }
        for i in 0..drones {
            let position = Vec3::new(0.0, 3.0 + i as f32 * 2.0, 0.0);
            self.context
                .spawn(DRONE_PREFAB, Transform::new(position, Quat::IDENTITY), None)?;
        }
        log::info!("Spawned {} crates and {} drones", crates, drones);
        Ok(())
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.drain_events() {
                let (level, message) = crate::events::describe(&event);
                log::log!(level, "{}", message);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    /// Runs every fixed tick the elapsed wall time covers.
    pub fn tick_once(&mut self) -> u32 {
        let now = Instant::now();
        let elapsed = now - self.last_update;
        self.last_update = now;
        self.context.update(elapsed.as_secs_f32())
    }

    pub fn drain_events(&mut self) -> Vec<NetEvent> {
        self.context.drain_events()
    }

    pub fn kick_client(&mut self, connection: ConnectionId) {
        log::info!("Kicking {}", connection);
        self.context.kick(connection);
    }

    pub fn shutdown_connections(&mut self) {
        let ids: Vec<ConnectionId> = self
            .context
            .session()
            .connections()
            .iter()
            .map(|connection| connection.id)
            .collect();
        for id in ids {
            self.kick_client(id);
        }
        // Push the disconnect notices out before the socket goes away.
        self.context.tick();
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.context.current_tick(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            client_count: self.context.session().connections().len(),
            max_clients: self.context.settings().max_connections,
            entity_count: self.context.directory().len(),
            buffered_calls: self.context.rpc().buffered().len(),
            network_stats: self.context.stats(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.context
            .session()
            .connections()
            .iter()
            .map(|connection| ClientInfo {
                id: connection.id,
                address: connection.address,
                ready: connection.ready,
                player: connection.session_entity,
            })
            .collect()
    }
}
