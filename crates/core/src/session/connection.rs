use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;

use crate::directory::InstanceId;
use crate::net::PeerId;

/// Connection handle shared by every peer. Encoded as an `i16` on the wire;
/// `-1` is reserved for "server / none", so valid ids are `1..=i16::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u16);

impl ConnectionId {
    pub const MAX: u16 = i16::MAX as u16;

    pub fn new(raw: u16) -> Option<Self> {
        (1..=Self::MAX).contains(&raw).then_some(Self(raw))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn to_wire(self) -> i16 {
        self.0 as i16
    }

    pub fn from_wire(raw: i16) -> Option<Self> {
        u16::try_from(raw).ok().and_then(Self::new)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    pub alive: bool,
    /// Set once the client has announced its scene is ready.
    pub ready: bool,
    /// Server side only.
    pub address: Option<SocketAddr>,
    /// The player entity created for this connection, if any.
    pub session_entity: Option<InstanceId>,
    pub(crate) peer: Option<PeerId>,
}

impl Connection {
    fn new(id: ConnectionId, peer: Option<PeerId>, address: Option<SocketAddr>) -> Self {
        Self {
            id,
            alive: true,
            ready: false,
            address,
            session_entity: None,
            peer,
        }
    }
}

/// Connection table owned by the session. On the server it maps transport
/// peers to connection ids; on a client it mirrors the remote connections
/// announced by the server.
#[derive(Debug)]
pub struct ConnectionTable {
    connections: BTreeMap<ConnectionId, Connection>,
    by_peer: HashMap<PeerId, ConnectionId>,
    next_id: u16,
    capacity: usize,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            by_peer: HashMap::new(),
            next_id: 1,
            capacity,
        }
    }

    /// Assigns the next free id to a transport peer. Ids increase
    /// monotonically and wrap back to 1, skipping ids still in use.
    pub fn allocate(&mut self, peer: PeerId, address: Option<SocketAddr>) -> Option<ConnectionId> {
        if self.connections.len() >= self.capacity {
            return None;
        }
        if let Some(&existing) = self.by_peer.get(&peer) {
            return Some(existing);
        }

        let start = self.next_id;
        loop {
            let candidate = ConnectionId::new(self.next_id)?;
            self.next_id = if self.next_id >= ConnectionId::MAX {
                1
            } else {
                self.next_id + 1
            };
            if !self.connections.contains_key(&candidate) {
                self.connections
                    .insert(candidate, Connection::new(candidate, Some(peer), address));
                self.by_peer.insert(peer, candidate);
                return Some(candidate);
            }
            if self.next_id == start {
                return None;
            }
        }
    }

    /// Records a connection announced by the server. Returns false if it
    /// was already known.
    pub fn insert_remote(&mut self, id: ConnectionId) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        let mut connection = Connection::new(id, None, None);
        connection.ready = true;
        self.connections.insert(id, connection);
        true
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn by_peer(&self, peer: PeerId) -> Option<ConnectionId> {
        self.by_peer.get(&peer).copied()
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if let Some(peer) = connection.peer {
            self.by_peer.remove(&peer);
        }
        Some(connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Ids of connections that completed the ready handshake, ascending.
    pub fn ready_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.alive && c.ready)
            .map(|c| c.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
        self.by_peer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_wire_range() {
        assert!(ConnectionId::from_wire(-1).is_none());
        assert!(ConnectionId::from_wire(0).is_none());
        assert_eq!(ConnectionId::from_wire(3).map(ConnectionId::get), Some(3));
        assert_eq!(
            ConnectionId::from_wire(i16::MAX).map(ConnectionId::to_wire),
            Some(i16::MAX)
        );
    }

    #[test]
    fn test_allocate_starts_at_one() {
        let mut table = ConnectionTable::new(8);
        let a = table.allocate(PeerId(10), None).unwrap();
        let b = table.allocate(PeerId(11), None).unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(table.by_peer(PeerId(11)), Some(b));
    }

    #[test]
    fn test_allocate_same_peer_is_stable() {
        let mut table = ConnectionTable::new(8);
        let a = table.allocate(PeerId(4), None).unwrap();
        assert_eq!(table.allocate(PeerId(4), None), Some(a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut table = ConnectionTable::new(1);
        assert!(table.allocate(PeerId(1), None).is_some());
        assert!(table.allocate(PeerId(2), None).is_none());
    }

    #[test]
    fn test_remove_forgets_peer() {
        let mut table = ConnectionTable::new(4);
        let id = table.allocate(PeerId(7), None).unwrap();
        assert!(table.remove(id).is_some());
        assert!(table.by_peer(PeerId(7)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_ready_ids_only_lists_ready() {
        let mut table = ConnectionTable::new(4);
        let a = table.allocate(PeerId(1), None).unwrap();
        let b = table.allocate(PeerId(2), None).unwrap();
        table.get_mut(b).unwrap().ready = true;
        assert_eq!(table.ready_ids(), vec![b]);
        assert!(!table.ready_ids().contains(&a));
    }
}
