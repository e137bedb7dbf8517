use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::channel::Channel;
use super::connection::{LinkState, PeerLink, PeerTable};
use super::endpoint::NetworkEndpoint;
use super::protocol::{Packet, PacketHeader, PacketType};
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::{DisconnectReason, PeerId, Transport, TransportError, TransportEvent};
use crate::config::NetSettings;

const HANDSHAKE_RETRY: Duration = Duration::from_millis(250);
/// Room left in each datagram for the header and archive framing.
const PACKET_OVERHEAD: usize = 96;

fn message_budget(packet_size: usize) -> usize {
    packet_size.saturating_sub(PACKET_OVERHEAD).max(64)
}

pub struct UdpServerTransport {
    endpoint: NetworkEndpoint,
    peers: PeerTable,
    events: Vec<TransportEvent>,
    budget: usize,
}

impl UdpServerTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A, settings: &NetSettings) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(addr, settings.packet_size)?;
        if let Some(simulation) = &settings.simulation {
            endpoint.set_simulation(simulation.clone());
        }

        Ok(Self {
            endpoint,
            peers: PeerTable::new(
                settings.max_connections,
                settings.connection_timeout(),
                settings.fragment_size,
            ),
            events: Vec::new(),
            budget: message_budget(settings.packet_size),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn set_simulation(&mut self, simulation: PacketLossSimulation) {
        self.endpoint.set_simulation(simulation);
    }

    pub fn simulation(&self) -> &PacketLossSimulation {
        self.endpoint.simulation()
    }

    pub fn peer_rtt(&self, peer: PeerId) -> Option<f32> {
        self.peers.get(peer).map(PeerLink::rtt_ms)
    }

    fn send_unlinked(&mut self, payload: PacketType, addr: SocketAddr) {
        let packet = Packet::new(PacketHeader::new(0, 0, 0), payload);
        if let Err(e) = self.endpoint.send_to(&packet, addr) {
            log::warn!("Failed to answer {}: {}", addr, e);
        }
    }

    fn send_control(&mut self, peer: PeerId, payload: PacketType) {
        let Some(link) = self.peers.get_mut(peer) else {
            return;
        };
        let addr = link.addr;
        let packet = link.control_packet(payload);
        if let Err(e) = self.endpoint.send_to(&packet, addr) {
            log::warn!("Failed to send control packet to {}: {}", addr, e);
        }
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet.payload {
            PacketType::ConnectionRequest { client_salt } => {
                self.handle_connection_request(addr, client_salt);
            }
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_challenge_response(addr, combined_salt);
            }
            PacketType::Messages(_) => {
                let Some(link) = self.peers.get_by_addr_mut(&addr) else {
                    return;
                };
                if !link.is_connected() {
                    return;
                }
                let peer = link.peer_id;
                for (channel, data) in link.process_packet(packet) {
                    self.events.push(TransportEvent::Received {
                        peer,
                        channel,
                        data,
                    });
                }
            }
            PacketType::Disconnect => {
                let Some(peer) = self.peers.get_by_addr_mut(&addr).map(|l| l.peer_id) else {
                    return;
                };
                if let Some(link) = self.peers.remove(peer) {
                    if link.is_connected() {
                        self.events.push(TransportEvent::Disconnected(
                            peer,
                            DisconnectReason::Graceful,
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_connection_request(&mut self, addr: SocketAddr, client_salt: u64) {
        let link = match self.peers.get_or_create_pending(addr, client_salt) {
            Ok(link) => link,
            Err(reason) => {
                log::info!("Denied {}: {}", addr, reason);
                self.send_unlinked(
                    PacketType::ConnectionDenied {
                        reason: reason.to_string(),
                    },
                    addr,
                );
                return;
            }
        };

        let peer = link.peer_id;
        if link.is_connected() {
            // Our accept was lost.
            self.send_control(peer, PacketType::ConnectionAccepted { peer_id: peer.0 });
            return;
        }

        link.touch();
        let payload = PacketType::ConnectionChallenge {
            server_salt: link.server_salt,
            challenge: link.combined_salt(),
        };
        self.send_control(peer, payload);
    }

    fn handle_challenge_response(&mut self, addr: SocketAddr, combined_salt: u64) {
        let Some(link) = self.peers.get_by_addr_mut(&addr) else {
            return;
        };

        if combined_salt != link.combined_salt() {
            log::warn!("Invalid challenge response from {}", addr);
            return;
        }

        let peer = link.peer_id;
        link.touch();
        if !link.is_connected() {
            link.state = LinkState::Connected;
            log::debug!("{} completed handshake as {}", addr, peer);
            self.events.push(TransportEvent::Connected(peer));
        }
        self.send_control(peer, PacketType::ConnectionAccepted { peer_id: peer.0 });
    }
}

impl Transport for UdpServerTransport {
    fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        for (packet, addr) in self.endpoint.receive()? {
            self.handle_packet(packet, addr);
        }

        for peer in self.peers.cleanup_timed_out() {
            self.events
                .push(TransportEvent::Disconnected(peer, DisconnectReason::Timeout));
        }

        Ok(std::mem::take(&mut self.events))
    }

    fn send(&mut self, peer: PeerId, channel: Channel, data: &[u8]) -> Result<(), TransportError> {
        let link = self
            .peers
            .get_mut(peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        if !link.is_connected() {
            return Err(TransportError::NotConnected);
        }
        link.queue(channel, data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        let mut outgoing = Vec::new();
        for link in self.peers.iter_mut().filter(|l| l.is_connected()) {
            let addr = link.addr;
            outgoing.extend(link.build_packets(now, self.budget).into_iter().map(|p| (p, addr)));
        }

        for (packet, addr) in outgoing {
            if let Err(e) = self.endpoint.send_to(&packet, addr) {
                log::warn!("Send to {} failed: {}", addr, e);
            }
        }

        self.endpoint.flush_simulated()
    }

    fn disconnect(&mut self, peer: PeerId) {
        self.send_control(peer, PacketType::Disconnect);
        self.peers.remove(peer);
    }

    fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(peer).map(|link| link.addr)
    }

    fn stats(&self) -> NetworkStats {
        let mut stats = self.endpoint.stats().clone();
        let links: Vec<NetworkStats> = self.peers.iter().map(PeerLink::stats).collect();
        if !links.is_empty() {
            let count = links.len() as f32;
            stats.rtt_ms = links.iter().map(|s| s.rtt_ms).sum::<f32>() / count;
            stats.rtt_variance = links.iter().map(|s| s.rtt_variance).sum::<f32>() / count;
            stats.packet_loss_percent =
                links.iter().map(|s| s.packet_loss_percent).sum::<f32>() / count;
            stats.messages_resent = links.iter().map(|s| s.messages_resent).sum();
        }
        stats
    }
}

pub struct UdpClientTransport {
    endpoint: NetworkEndpoint,
    server_addr: SocketAddr,
    link: PeerLink,
    state: LinkState,
    connect_started: Instant,
    last_handshake_send: Instant,
    timeout: Duration,
    events: Vec<TransportEvent>,
    budget: usize,
}

impl UdpClientTransport {
    /// Binds an ephemeral local port and starts the handshake.
    pub fn connect(server_addr: SocketAddr, settings: &NetSettings) -> io::Result<Self> {
        let bind_addr = if server_addr.is_ipv6() {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let mut endpoint = NetworkEndpoint::bind(bind_addr, settings.packet_size)?;
        if let Some(simulation) = &settings.simulation {
            endpoint.set_simulation(simulation.clone());
        }

        let now = Instant::now();
        let mut transport = Self {
            endpoint,
            server_addr,
            link: PeerLink::new(server_addr, PeerId::SERVER, rand::random(), settings.fragment_size),
            state: LinkState::Connecting,
            connect_started: now,
            last_handshake_send: now,
            timeout: settings.connection_timeout(),
            events: Vec::new(),
            budget: message_budget(settings.packet_size),
        };
        log::info!("Connecting to {}", server_addr);
        transport.send_handshake();
        Ok(transport)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn set_simulation(&mut self, simulation: PacketLossSimulation) {
        self.endpoint.set_simulation(simulation);
    }

    fn send_handshake(&mut self) {
        let payload = match self.state {
            LinkState::Connecting => PacketType::ConnectionRequest {
                client_salt: self.link.client_salt,
            },
            LinkState::ChallengeResponse => PacketType::ChallengeResponse {
                combined_salt: self.link.combined_salt(),
            },
            _ => return,
        };
        self.send_control(payload);
        self.last_handshake_send = Instant::now();
    }

    fn send_control(&mut self, payload: PacketType) {
        let packet = self.link.control_packet(payload);
        if let Err(e) = self.endpoint.send_to(&packet, self.server_addr) {
            log::warn!("Failed to send to server: {}", e);
        }
    }

    fn lose_connection(&mut self, reason: DisconnectReason) {
        if self.state == LinkState::Disconnected {
            return;
        }
        log::info!("Connection to {} closed: {}", self.server_addr, reason.as_str());
        self.state = LinkState::Disconnected;
        self.link.state = LinkState::Disconnected;
        self.events
            .push(TransportEvent::Disconnected(PeerId::SERVER, reason));
    }

    fn mark_connected(&mut self) {
        if self.state == LinkState::Connected {
            return;
        }
        log::info!("Connected to {}", self.server_addr);
        self.state = LinkState::Connected;
        self.link.state = LinkState::Connected;
        self.link.touch();
        self.events.push(TransportEvent::Connected(PeerId::SERVER));
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet.payload {
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            } => {
                if !matches!(
                    self.state,
                    LinkState::Connecting | LinkState::ChallengeResponse
                ) {
                    return;
                }
                if challenge != self.link.client_salt ^ server_salt {
                    log::warn!("Challenge mismatch");
                    return;
                }
                self.link.server_salt = server_salt;
                self.state = LinkState::ChallengeResponse;
                self.send_handshake();
            }
            PacketType::ConnectionAccepted { peer_id } => {
                if self.state == LinkState::ChallengeResponse {
                    log::debug!("Accepted as peer {}", peer_id);
                    self.mark_connected();
                }
            }
            PacketType::ConnectionDenied { reason } => {
                self.lose_connection(DisconnectReason::Denied(reason));
            }
            PacketType::Messages(_) => {
                // Data can overtake a lost accept.
                if self.state == LinkState::ChallengeResponse {
                    self.mark_connected();
                }
                if self.state != LinkState::Connected {
                    return;
                }
                for (channel, data) in self.link.process_packet(packet) {
                    self.events.push(TransportEvent::Received {
                        peer: PeerId::SERVER,
                        channel,
                        data,
                    });
                }
            }
            PacketType::Disconnect => self.lose_connection(DisconnectReason::Kicked),
            _ => {}
        }
    }
}

impl Transport for UdpClientTransport {
    fn poll(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        for (packet, addr) in self.endpoint.receive()? {
            if addr != self.server_addr {
                continue;
            }
            self.handle_packet(packet);
        }

        match self.state {
            LinkState::Connecting | LinkState::ChallengeResponse => {
                if self.connect_started.elapsed() > self.timeout {
                    self.lose_connection(DisconnectReason::Timeout);
                } else if self.last_handshake_send.elapsed() >= HANDSHAKE_RETRY {
                    self.send_handshake();
                }
            }
            LinkState::Connected => {
                if self.link.is_timed_out(self.timeout) {
                    self.lose_connection(DisconnectReason::Timeout);
                }
            }
            LinkState::Disconnected => {}
        }

        Ok(std::mem::take(&mut self.events))
    }

    fn send(&mut self, peer: PeerId, channel: Channel, data: &[u8]) -> Result<(), TransportError> {
        if peer != PeerId::SERVER {
            return Err(TransportError::UnknownPeer(peer));
        }
        if self.state != LinkState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.link.queue(channel, data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if self.state == LinkState::Connected {
            for packet in self.link.build_packets(Instant::now(), self.budget) {
                self.endpoint.send_to(&packet, self.server_addr)?;
            }
        }
        self.endpoint.flush_simulated()
    }

    fn disconnect(&mut self, _peer: PeerId) {
        if self.state == LinkState::Connected {
            self.send_control(PacketType::Disconnect);
        }
        self.state = LinkState::Disconnected;
        self.link.state = LinkState::Disconnected;
    }

    fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        (peer == PeerId::SERVER).then_some(self.server_addr)
    }

    fn stats(&self) -> NetworkStats {
        let mut stats = self.endpoint.stats().clone();
        let link = self.link.stats();
        stats.rtt_ms = link.rtt_ms;
        stats.rtt_variance = link.rtt_variance;
        stats.packet_loss_percent = link.packet_loss_percent;
        stats.messages_resent = link.messages_resent;
        stats
    }
}
