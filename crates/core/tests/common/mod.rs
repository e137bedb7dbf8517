#![allow(dead_code)]

use tether::net::MemoryNetwork;
use tether::player::{PLAYER_PREFAB, register_methods, register_prefabs};
use tether::{ConnectionId, InstanceId, MethodTable, NetContext, NetSettings, PrefabRegistry};

pub fn settings() -> NetSettings {
    NetSettings {
        tick_rate: 60,
        send_delay_ms: 10,
        player_prefab: Some(PLAYER_PREFAB.to_string()),
        observer_smoothing: false,
        ..NetSettings::default()
    }
}

pub fn prefabs() -> PrefabRegistry {
    let mut prefabs = PrefabRegistry::new();
    register_prefabs(&mut prefabs);
    prefabs
}

pub fn methods() -> MethodTable {
    let mut methods = MethodTable::new();
    register_methods(&mut methods).unwrap();
    methods
}

/// One server and its clients over an in-process network.
pub struct Harness {
    pub network: MemoryNetwork,
    pub server: NetContext,
    pub clients: Vec<NetContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(settings(), prefabs, methods)
    }

    pub fn with(settings: NetSettings, prefabs: fn() -> PrefabRegistry, methods: fn() -> MethodTable) -> Self {
        let network = MemoryNetwork::new();
        let server = NetContext::server(Box::new(network.server()), settings, prefabs(), methods());
        Self {
            network,
            server,
            clients: Vec::new(),
        }
    }

    /// Connects a client with the same prefabs and methods as the server
    /// and lets the ready handshake finish.
    pub fn join(&mut self, prefabs: fn() -> PrefabRegistry, methods: fn() -> MethodTable) -> usize {
        let mut client = NetContext::client(
            Box::new(self.network.connect()),
            self.server.settings().clone(),
            prefabs(),
            methods(),
        );
        client.set_scene_ready(true);
        self.clients.push(client);
        self.run(4);
        self.clients.len() - 1
    }

    pub fn join_default(&mut self) -> usize {
        self.join(prefabs, methods)
    }

    /// Ticks the server and then every client, `rounds` times.
    pub fn run(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.server.tick();
            for client in &mut self.clients {
                client.tick();
            }
        }
    }

    pub fn client_id(&self, client: usize) -> ConnectionId {
        self.clients[client].local_id().unwrap()
    }

    pub fn player_of(&self, client: usize) -> InstanceId {
        self.server
            .directory()
            .player_of(self.client_id(client))
            .unwrap()
    }
}
