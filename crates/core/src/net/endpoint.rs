use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::Packet;
use super::simulator::NetworkSimulator;
use super::stats::{NetworkStats, PacketLossSimulation};
use super::transport::TransportError;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Non-blocking UDP socket that speaks [`Packet`]s.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    simulator: NetworkSimulator,
    recv_buffer: Vec<u8>,
    max_packet_size: usize,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A, max_packet_size: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            simulator: NetworkSimulator::default(),
            recv_buffer: vec![0u8; RECV_BUFFER_SIZE],
            max_packet_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    pub fn set_simulation(&mut self, simulation: PacketLossSimulation) {
        self.simulator.set_config(simulation);
    }

    pub fn simulation(&self) -> &PacketLossSimulation {
        self.simulator.config()
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> Result<usize, TransportError> {
        let data = packet.serialize()?;

        if data.len() > self.max_packet_size {
            return Err(TransportError::PacketTooLarge(data.len()));
        }

        let len = data.len();
        self.stats.record_sent(len);

        if self.simulator.config().enabled {
            if !self.simulator.enqueue(data, addr) {
                self.stats.packets_dropped += 1;
            }
            return Ok(len);
        }

        Ok(self.socket.send_to(&data, addr)?)
    }

    /// Releases datagrams held back by the network simulator.
    pub fn flush_simulated(&mut self) -> Result<(), TransportError> {
        if !self.simulator.is_active() {
            return Ok(());
        }
        for (data, addr) in self.simulator.take_ready() {
            self.socket.send_to(&data, addr)?;
        }
        Ok(())
    }

    /// Drains the socket. Malformed or foreign datagrams are skipped.
    pub fn receive(&mut self) -> Result<Vec<(Packet, SocketAddr)>, TransportError> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let Ok(packet) = Packet::deserialize(&self.recv_buffer[..size]) else {
                        log::trace!("Dropping undecodable datagram from {}", addr);
                        continue;
                    };
                    if !packet.header.is_valid() {
                        continue;
                    }
                    self.stats.record_received(size);
                    packets.push((packet, addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a vanished peer surfaces here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(packets)
    }
}
