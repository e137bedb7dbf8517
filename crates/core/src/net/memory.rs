use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use super::channel::{Channel, ChannelError};
use super::stats::NetworkStats;
use super::transport::{DisconnectReason, PeerId, Transport, TransportError, TransportEvent};

#[derive(Debug)]
struct ClientSlot {
    inbox: VecDeque<TransportEvent>,
    stats: NetworkStats,
    open: bool,
}

impl Default for ClientSlot {
    fn default() -> Self {
        Self {
            inbox: VecDeque::new(),
            stats: NetworkStats::default(),
            open: true,
        }
    }
}

#[derive(Debug)]
struct Hub {
    next_peer: u32,
    server_inbox: VecDeque<TransportEvent>,
    server_stats: NetworkStats,
    clients: HashMap<PeerId, ClientSlot>,
    drop_unreliable: bool,
    message_limit: Option<usize>,
}

impl Default for Hub {
    fn default() -> Self {
        Self {
            next_peer: 1,
            server_inbox: VecDeque::new(),
            server_stats: NetworkStats::default(),
            clients: HashMap::new(),
            drop_unreliable: false,
            message_limit: None,
        }
    }
}

/// Lossless in-process network joining one server and any number of
/// clients. Delivery happens on the receiver's next `poll`.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> MemoryTransport {
        MemoryTransport {
            hub: Rc::clone(&self.hub),
            side: Side::Server,
        }
    }

    /// Attaches a new client; both ends see `Connected` on their next poll.
    pub fn connect(&self) -> MemoryTransport {
        let mut hub = self.hub.borrow_mut();
        let peer = PeerId(hub.next_peer);
        hub.next_peer += 1;

        let mut slot = ClientSlot::default();
        slot.inbox.push_back(TransportEvent::Connected(PeerId::SERVER));
        hub.clients.insert(peer, slot);
        hub.server_inbox.push_back(TransportEvent::Connected(peer));

        MemoryTransport {
            hub: Rc::clone(&self.hub),
            side: Side::Client(peer),
        }
    }

    /// Discards unreliable traffic while set, to exercise loss handling.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.hub.borrow_mut().drop_unreliable = drop;
    }

    /// Rejects messages on unfragmented channels above `limit` bytes, as a
    /// UDP link with that fragment size would.
    pub fn set_message_limit(&self, limit: Option<usize>) {
        self.hub.borrow_mut().message_limit = limit;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Server,
    Client(PeerId),
}

#[derive(Debug)]
pub struct MemoryTransport {
    hub: Rc<RefCell<Hub>>,
    side: Side,
}

impl MemoryTransport {
    pub fn peer_id(&self) -> Option<PeerId> {
        match self.side {
            Side::Server => None,
            Side::Client(peer) => Some(peer),
        }
    }
}

impl Transport for MemoryTransport {
    fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        let mut hub = self.hub.borrow_mut();
        let inbox = match self.side {
            Side::Server => &mut hub.server_inbox,
            Side::Client(peer) => match hub.clients.get_mut(&peer) {
                Some(slot) => &mut slot.inbox,
                None => return Ok(Vec::new()),
            },
        };
        Ok(inbox.drain(..).collect())
    }

    fn send(&mut self, peer: PeerId, channel: Channel, data: &[u8]) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        if let Some(limit) = hub.message_limit
            && channel != Channel::ReliableFragmented
            && data.len() > limit
        {
            return Err(ChannelError::TooLarge {
                channel,
                size: data.len(),
                limit,
            }
            .into());
        }
        let drop = hub.drop_unreliable && channel == Channel::Unreliable;
        match self.side {
            Side::Server => {
                if !hub.clients.get(&peer).is_some_and(|slot| slot.open) {
                    return Err(TransportError::UnknownPeer(peer));
                }
                hub.server_stats.record_sent(data.len());
                if drop {
                    hub.server_stats.packets_dropped += 1;
                    return Ok(());
                }
                if let Some(slot) = hub.clients.get_mut(&peer) {
                    slot.stats.record_received(data.len());
                    slot.inbox.push_back(TransportEvent::Received {
                        peer: PeerId::SERVER,
                        channel,
                        data: data.to_vec(),
                    });
                }
            }
            Side::Client(me) => {
                if peer != PeerId::SERVER {
                    return Err(TransportError::UnknownPeer(peer));
                }
                let Some(slot) = hub.clients.get_mut(&me).filter(|slot| slot.open) else {
                    return Err(TransportError::NotConnected);
                };
                slot.stats.record_sent(data.len());
                if drop {
                    slot.stats.packets_dropped += 1;
                    return Ok(());
                }
                hub.server_stats.record_received(data.len());
                hub.server_inbox.push_back(TransportEvent::Received {
                    peer: me,
                    channel,
                    data: data.to_vec(),
                });
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        let mut hub = self.hub.borrow_mut();
        match self.side {
            Side::Server => {
                let Some(slot) = hub.clients.get_mut(&peer) else {
                    return;
                };
                if !slot.open {
                    return;
                }
                slot.open = false;
                slot.inbox.push_back(TransportEvent::Disconnected(
                    PeerId::SERVER,
                    DisconnectReason::Kicked,
                ));
                log::debug!("Memory {} kicked", peer);
            }
            Side::Client(me) => {
                let Some(slot) = hub.clients.remove(&me) else {
                    return;
                };
                if slot.open {
                    hub.server_inbox
                        .push_back(TransportEvent::Disconnected(me, DisconnectReason::Graceful));
                }
            }
        }
    }

    fn peer_addr(&self, _peer: PeerId) -> Option<SocketAddr> {
        None
    }

    fn stats(&self) -> NetworkStats {
        let hub = self.hub.borrow();
        match self.side {
            Side::Server => hub.server_stats.clone(),
            Side::Client(peer) => hub
                .clients
                .get(&peer)
                .map(|slot| slot.stats.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_notifies_both_sides() {
        let network = MemoryNetwork::new();
        let mut server = network.server();
        let mut client = network.connect();

        assert_eq!(server.poll().unwrap(), vec![TransportEvent::Connected(PeerId(1))]);
        assert_eq!(
            client.poll().unwrap(),
            vec![TransportEvent::Connected(PeerId::SERVER)]
        );
    }

    #[test]
    fn test_messages_flow_both_ways() {
        let network = MemoryNetwork::new();
        let mut server = network.server();
        let mut client = network.connect();
        server.poll().unwrap();
        client.poll().unwrap();

        client
            .send(PeerId::SERVER, Channel::ReliableOrdered, &[1])
            .unwrap();
        server.send(PeerId(1), Channel::Unreliable, &[2]).unwrap();

        assert_eq!(
            server.poll().unwrap(),
            vec![TransportEvent::Received {
                peer: PeerId(1),
                channel: Channel::ReliableOrdered,
                data: vec![1]
            }]
        );
        assert_eq!(
            client.poll().unwrap(),
            vec![TransportEvent::Received {
                peer: PeerId::SERVER,
                channel: Channel::Unreliable,
                data: vec![2]
            }]
        );
    }

    #[test]
    fn test_client_disconnect_reaches_server() {
        let network = MemoryNetwork::new();
        let mut server = network.server();
        let mut client = network.connect();
        server.poll().unwrap();

        client.disconnect(PeerId::SERVER);
        assert_eq!(
            server.poll().unwrap(),
            vec![TransportEvent::Disconnected(
                PeerId(1),
                DisconnectReason::Graceful
            )]
        );
        assert!(client.send(PeerId::SERVER, Channel::Unreliable, &[0]).is_err());
    }

    #[test]
    fn test_server_kick_reaches_client() {
        let network = MemoryNetwork::new();
        let mut server = network.server();
        let mut client = network.connect();
        server.poll().unwrap();
        client.poll().unwrap();

        server.disconnect(PeerId(1));
        assert_eq!(
            client.poll().unwrap(),
            vec![TransportEvent::Disconnected(
                PeerId::SERVER,
                DisconnectReason::Kicked
            )]
        );
        assert!(server.send(PeerId(1), Channel::Unreliable, &[0]).is_err());
        assert!(server.poll().unwrap().is_empty());
    }

    #[test]
    fn test_dropping_unreliable_keeps_reliable() {
        let network = MemoryNetwork::new();
        let mut server = network.server();
        let mut client = network.connect();
        server.poll().unwrap();
        network.set_drop_unreliable(true);

        client.send(PeerId::SERVER, Channel::Unreliable, &[1]).unwrap();
        client
            .send(PeerId::SERVER, Channel::ReliableFragmented, &[2])
            .unwrap();
        let events = server.poll().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_message_limit_spares_fragmented_channel() {
        let network = MemoryNetwork::new();
        let mut server = network.server();
        let mut client = network.connect();
        server.poll().unwrap();
        network.set_message_limit(Some(4));

        assert!(matches!(
            client.send(PeerId::SERVER, Channel::Unreliable, &[0; 5]),
            Err(TransportError::Channel(ChannelError::TooLarge { size: 5, limit: 4, .. }))
        ));
        client
            .send(PeerId::SERVER, Channel::ReliableFragmented, &[0; 5])
            .unwrap();
        assert_eq!(server.poll().unwrap().len(), 1);
    }
}
