use log::Level;

use tether::NetEvent;

/// One-line description of an event and how loudly to report it.
pub fn describe(event: &NetEvent) -> (Level, String) {
    match event {
        NetEvent::ClientConnected(connection) => (Level::Info, format!("{} connected", connection)),
        NetEvent::ClientReady(connection) => (Level::Info, format!("{} is ready", connection)),
        NetEvent::ClientDisconnected { connection, reason } => {
            (Level::Info, format!("{} {}", connection, reason.as_str()))
        }
        NetEvent::EntitySpawned { instance, owner } => {
            (Level::Debug, format!("Spawned {} owned by {:?}", instance, owner))
        }
        NetEvent::EntityDespawned { instance } => (Level::Debug, format!("Despawned {}", instance)),
        NetEvent::AuthorityChanged {
            instance,
            previous,
            owner,
        } => (
            Level::Info,
            format!("Authority of {} moved from {:?} to {:?}", instance, previous, owner),
        ),
        NetEvent::RpcRejected {
            sender,
            instance,
            reason,
        } => (
            Level::Warn,
            format!("Rejected RPC on {} from {:?}: {:?}", instance, sender, reason),
        ),
        NetEvent::TransportError(message) => (Level::Error, format!("Transport error: {}", message)),
        other => (Level::Debug, format!("{:?}", other)),
    }
}
