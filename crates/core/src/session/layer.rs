use std::collections::{HashMap, VecDeque};

use crate::net::{Channel, DisconnectReason, NetworkStats, PeerId, Transport, TransportError, TransportEvent};
use crate::wire::{MessageType, NetReader, WireError, decode_envelope, encode_envelope};

use super::connection::{Connection, ConnectionId, ConnectionTable};
use super::events::NetEvent;
use super::handler::{HandlerContext, MessageHandler};
use super::handshake::RemoteConnect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("message type {0} is reserved for the core protocol")]
    ReservedMessageType(MessageType),
    #[error("a handler is already registered for message type {0}")]
    DuplicateHandler(MessageType),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("not connected")]
    NotConnected,
    #[error("operation requires the {0:?} role")]
    WrongRole(Role),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What the transport delivered during one pump, already mapped to
/// connection ids.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server: a new connection was admitted and told its id.
    ClientConnected(ConnectionId),
    /// Server: the connection's transport link closed.
    ClientDisconnected(ConnectionId, DisconnectReason),
    /// Client: the transport reached the server.
    ServerReached,
    /// Client: the server link is gone.
    ServerLost(DisconnectReason),
    Message {
        /// `None` when sent by the server.
        from: Option<ConnectionId>,
        message_type: MessageType,
        payload: Vec<u8>,
    },
}

/// Connection table, handler registry and event queue over one transport.
pub struct Session {
    role: Role,
    transport: Box<dyn Transport>,
    connections: ConnectionTable,
    local: Option<ConnectionId>,
    server_reached: bool,
    handlers: HashMap<MessageType, Box<dyn MessageHandler>>,
    events: VecDeque<NetEvent>,
    lost: Option<DisconnectReason>,
}

impl Session {
    pub fn server(transport: Box<dyn Transport>, max_connections: usize) -> Self {
        Self::new(Role::Server, transport, max_connections)
    }

    pub fn client(transport: Box<dyn Transport>) -> Self {
        Self::new(Role::Client, transport, ConnectionId::MAX as usize)
    }

    fn new(role: Role, transport: Box<dyn Transport>, capacity: usize) -> Self {
        Self {
            role,
            transport,
            connections: ConnectionTable::new(capacity),
            local: None,
            server_reached: false,
            handlers: HashMap::new(),
            events: VecDeque::new(),
            lost: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// Our own connection id; always `None` on the server.
    pub fn local_id(&self) -> Option<ConnectionId> {
        self.local
    }

    pub fn set_local_id(&mut self, id: ConnectionId) {
        self.local = Some(id);
        self.connections.insert_remote(id);
    }

    pub fn is_connected(&self) -> bool {
        match self.role {
            Role::Server => true,
            Role::Client => self.server_reached && self.local.is_some(),
        }
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionTable {
        &mut self.connections
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport.stats()
    }

    pub fn emit(&mut self, event: NetEvent) {
        self.events.push_back(event);
    }

    pub fn drain_events(&mut self) -> Vec<NetEvent> {
        self.events.drain(..).collect()
    }

    pub fn register_handler<H>(&mut self, message_type: MessageType, handler: H) -> Result<(), SessionError>
    where
        H: MessageHandler + 'static,
    {
        if message_type.is_reserved() {
            return Err(SessionError::ReservedMessageType(message_type));
        }
        if self.handlers.contains_key(&message_type) {
            return Err(SessionError::DuplicateHandler(message_type));
        }
        self.handlers.insert(message_type, Box::new(handler));
        Ok(())
    }

    pub fn unregister_handler(&mut self, message_type: MessageType) -> bool {
        self.handlers.remove(&message_type).is_some()
    }

    /// Runs the handler registered for `message_type`. Returns false when
    /// none is registered.
    pub fn dispatch(&mut self, from: Option<ConnectionId>, message_type: MessageType, payload: &[u8]) -> bool {
        let Some(mut handler) = self.handlers.remove(&message_type) else {
            log::debug!("No handler for message type {}, dropping", message_type);
            return false;
        };

        let mut reader = NetReader::new(payload);
        let mut ctx = HandlerContext {
            session: &mut *self,
            from,
        };
        if let Err(e) = handler.handle(&mut ctx, &mut reader) {
            log::warn!("Handler for message type {} failed: {}", message_type, e);
        }

        self.handlers.entry(message_type).or_insert(handler);
        true
    }

    /// Drains the transport. Malformed envelopes and traffic from unknown
    /// peers are dropped here.
    pub fn pump(&mut self) -> Vec<Inbound> {
        let events = match self.transport.poll() {
            Ok(events) => events,
            Err(e) => {
                self.transport_failed(&e);
                return Vec::new();
            }
        };

        let mut inbound = Vec::with_capacity(events.len());
        for event in events {
            match (self.role, event) {
                (Role::Server, TransportEvent::Connected(peer)) => {
                    if let Some(id) = self.admit(peer) {
                        inbound.push(Inbound::ClientConnected(id));
                    }
                }
                (Role::Server, TransportEvent::Disconnected(peer, reason)) => {
                    if let Some(id) = self.connections.by_peer(peer) {
                        self.connections.remove(id);
                        log::info!("{} disconnected: {}", id, reason.as_str());
                        inbound.push(Inbound::ClientDisconnected(id, reason));
                    }
                }
                (Role::Server, TransportEvent::Received { peer, data, .. }) => {
                    let Some(id) = self.connections.by_peer(peer) else {
                        log::debug!("Dropping message from unknown {}", peer);
                        continue;
                    };
                    if let Some(message) = Self::unwrap_envelope(Some(id), &data) {
                        inbound.push(message);
                    }
                }
                (Role::Client, TransportEvent::Connected(_)) => {
                    self.server_reached = true;
                    inbound.push(Inbound::ServerReached);
                }
                (Role::Client, TransportEvent::Disconnected(_, reason)) => {
                    self.server_reached = false;
                    inbound.push(Inbound::ServerLost(reason));
                }
                (Role::Client, TransportEvent::Received { data, .. }) => {
                    if let Some(message) = Self::unwrap_envelope(None, &data) {
                        inbound.push(message);
                    }
                }
            }
        }

        if let Some(reason) = self.lost.take() {
            inbound.push(Inbound::ServerLost(reason));
        }
        inbound
    }

    fn admit(&mut self, peer: PeerId) -> Option<ConnectionId> {
        let address = self.transport.peer_addr(peer);
        let Some(id) = self.connections.allocate(peer, address) else {
            log::warn!("Connection table full, refusing {}", peer);
            self.transport.disconnect(peer);
            return None;
        };

        log::info!("{} connected as {}", peer, id);
        let notice = RemoteConnect {
            connection: id,
            is_local: true,
        };
        if let Err(e) = self.send(id, Channel::ReliableFragmented, MessageType::REMOTE_CONNECT, &notice.encode()) {
            log::warn!("Failed to greet {}: {}", id, e);
        }
        Some(id)
    }

    fn unwrap_envelope(from: Option<ConnectionId>, data: &[u8]) -> Option<Inbound> {
        match decode_envelope(data) {
            Ok((message_type, payload)) => Some(Inbound::Message {
                from,
                message_type,
                payload: payload.to_vec(),
            }),
            Err(e) => {
                log::warn!("Malformed envelope from {:?}: {}", from, e);
                None
            }
        }
    }

    fn transport_failed(&mut self, error: &TransportError) {
        log::error!("Transport error: {}", error);
        self.events.push_back(NetEvent::TransportError(error.to_string()));
        if self.role == Role::Client && self.lost.is_none() {
            self.lost = Some(DisconnectReason::TransportError(error.to_string()));
        }
    }

    /// Sends to one connection (server only).
    pub fn send(
        &mut self,
        to: ConnectionId,
        channel: Channel,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        if self.role != Role::Server {
            return Err(SessionError::WrongRole(Role::Server));
        }
        let peer = self
            .connections
            .get(to)
            .and_then(|c| c.peer)
            .ok_or(SessionError::UnknownConnection(to))?;
        let data = encode_envelope(message_type, payload)?;
        self.transport.send(peer, channel, &data)?;
        Ok(())
    }

    /// Sends to every ready connection. A failure towards one connection is
    /// logged and does not affect the rest.
    pub fn broadcast(&mut self, channel: Channel, message_type: MessageType, payload: &[u8]) {
        self.broadcast_filtered(channel, message_type, payload, None);
    }

    pub fn broadcast_excluding(
        &mut self,
        exclude: ConnectionId,
        channel: Channel,
        message_type: MessageType,
        payload: &[u8],
    ) {
        self.broadcast_filtered(channel, message_type, payload, Some(exclude));
    }

    fn broadcast_filtered(
        &mut self,
        channel: Channel,
        message_type: MessageType,
        payload: &[u8],
        exclude: Option<ConnectionId>,
    ) {
        if self.role != Role::Server {
            log::warn!("Ignoring broadcast of message type {} from a client", message_type);
            return;
        }
        for id in self.connections.ready_ids() {
            if Some(id) == exclude {
                continue;
            }
            if let Err(e) = self.send(id, channel, message_type, payload) {
                log::warn!("Send of message type {} to {} failed: {}", message_type, id, e);
            }
        }
    }

    /// Client only. A transport failure schedules a full disconnect.
    pub fn send_to_server(
        &mut self,
        channel: Channel,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        if self.role != Role::Client {
            return Err(SessionError::WrongRole(Role::Client));
        }
        if !self.server_reached {
            return Err(SessionError::NotConnected);
        }
        let data = encode_envelope(message_type, payload)?;
        if let Err(e) = self.transport.send(PeerId::SERVER, channel, &data) {
            self.transport_failed(&e);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.transport.flush() {
            self.transport_failed(&e);
        }
    }

    /// Server: drops one connection. Client: leaves the server.
    pub fn disconnect(&mut self, id: Option<ConnectionId>) {
        match self.role {
            Role::Server => {
                let peer = id.and_then(|id| self.connections.get(id)).and_then(|c| c.peer);
                if let Some(peer) = peer {
                    self.transport.disconnect(peer);
                }
            }
            Role::Client => {
                self.transport.disconnect(PeerId::SERVER);
                self.server_reached = false;
            }
        }
    }

    /// Forgets every connection and the local id.
    pub fn reset(&mut self) {
        self.connections.clear();
        self.local = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryNetwork;

    fn pair() -> (Session, Session) {
        let network = MemoryNetwork::new();
        let server = Session::server(Box::new(network.server()), 8);
        let client = Session::client(Box::new(network.connect()));
        (server, client)
    }

    #[test]
    fn test_register_handler_rejects_reserved_and_duplicate() {
        let (mut server, _) = pair();
        let noop = |_: &mut HandlerContext<'_>, _: &mut NetReader<'_>| -> Result<(), WireError> { Ok(()) };

        assert!(matches!(
            server.register_handler(MessageType::RPC, noop),
            Err(SessionError::ReservedMessageType(_))
        ));
        assert!(server.register_handler(MessageType(5), noop).is_ok());
        assert!(matches!(
            server.register_handler(MessageType(5), noop),
            Err(SessionError::DuplicateHandler(_))
        ));
    }

    #[test]
    fn test_server_greets_new_connection() {
        let (mut server, mut client) = pair();

        let inbound = server.pump();
        let Some(Inbound::ClientConnected(id)) = inbound.first().cloned() else {
            panic!("expected a connection, got {:?}", inbound);
        };
        assert_eq!(id.get(), 1);

        let inbound = client.pump();
        assert_eq!(inbound[0], Inbound::ServerReached);
        let Inbound::Message { message_type, payload, .. } = &inbound[1] else {
            panic!("expected the greeting");
        };
        assert_eq!(*message_type, MessageType::REMOTE_CONNECT);
        let notice = RemoteConnect::decode(&mut NetReader::new(payload)).unwrap();
        assert_eq!(notice.connection, id);
        assert!(notice.is_local);
    }

    #[test]
    fn test_dispatch_runs_handler_with_sender() {
        let (mut server, mut client) = pair();
        server.pump();
        client.pump();

        let seen = std::rc::Rc::new(std::cell::Cell::new(0i16));
        let seen_in = std::rc::Rc::clone(&seen);
        server
            .register_handler(
                MessageType(1),
                move |ctx: &mut HandlerContext<'_>, reader: &mut NetReader<'_>| -> Result<(), WireError> {
                    assert!(ctx.from.is_some());
                    seen_in.set(reader.read_i16()?);
                    Ok(())
                },
            )
            .unwrap();

        client
            .send_to_server(Channel::ReliableOrdered, MessageType(1), &42i16.to_le_bytes())
            .unwrap();
        for message in server.pump() {
            if let Inbound::Message { from, message_type, payload } = message {
                assert!(server.dispatch(from, message_type, &payload));
            }
        }
        assert_eq!(seen.get(), 42);
        assert!(!server.dispatch(None, MessageType(9), &[]));
    }

    #[test]
    fn test_broadcast_skips_unready() {
        let network = MemoryNetwork::new();
        let mut server = Session::server(Box::new(network.server()), 8);
        let mut ready = Session::client(Box::new(network.connect()));
        let mut waiting = Session::client(Box::new(network.connect()));
        server.pump();
        ready.pump();
        waiting.pump();

        let first = server.connections().iter().next().map(|c| c.id).unwrap();
        server.connections_mut().get_mut(first).unwrap().ready = true;
        server.broadcast(Channel::ReliableOrdered, MessageType(2), &[]);

        assert_eq!(ready.pump().len(), 1);
        assert!(waiting.pump().is_empty());
    }

    #[test]
    fn test_client_disconnect_reaches_server() {
        let (mut server, mut client) = pair();
        server.pump();
        client.pump();

        client.disconnect(None);
        let inbound = server.pump();
        assert!(matches!(
            inbound.as_slice(),
            [Inbound::ClientDisconnected(_, DisconnectReason::Graceful)]
        ));
        assert!(server.connections().is_empty());
    }
}
