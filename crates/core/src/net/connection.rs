use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::channel::{Channel, ChannelError, ReliableChannel};
use super::protocol::{ChannelMessage, Packet, PacketHeader, PacketType};
use super::stats::NetworkStats;
use super::tracking::{AckTracker, ReceiveTracker};
use super::transport::PeerId;

const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);
const MAX_TRACKED_PACKETS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
}

#[derive(Debug)]
struct SentPacket {
    sequence: u32,
    reliable: Vec<(Channel, u32)>,
}

/// Everything one side knows about the other end of a UDP association:
/// handshake salts, packet acks and the per-channel reliability state.
#[derive(Debug)]
pub struct PeerLink {
    pub addr: SocketAddr,
    pub peer_id: PeerId,
    pub state: LinkState,
    pub client_salt: u64,
    pub server_salt: u64,
    pub last_receive_time: Instant,
    last_send_time: Instant,
    send_sequence: u32,
    ack_tracker: AckTracker,
    receive_tracker: ReceiveTracker,
    fragment_size: usize,
    unreliable: Vec<ChannelMessage>,
    ordered: ReliableChannel,
    fragmented: ReliableChannel,
    sent_packets: VecDeque<SentPacket>,
    needs_ack: bool,
    stats: NetworkStats,
}

impl PeerLink {
    pub fn new(addr: SocketAddr, peer_id: PeerId, client_salt: u64, fragment_size: usize) -> Self {
        let now = Instant::now();
        Self {
            addr,
            peer_id,
            state: LinkState::Connecting,
            client_salt,
            server_salt: rand::random(),
            last_receive_time: now,
            last_send_time: now,
            send_sequence: 0,
            ack_tracker: AckTracker::new(256),
            receive_tracker: ReceiveTracker::new(),
            fragment_size,
            unreliable: Vec::new(),
            ordered: ReliableChannel::new(Channel::ReliableOrdered, fragment_size),
            fragmented: ReliableChannel::new(Channel::ReliableFragmented, fragment_size),
            sent_packets: VecDeque::new(),
            needs_ack: false,
            stats: NetworkStats::default(),
        }
    }

    pub fn combined_salt(&self) -> u64 {
        self.client_salt ^ self.server_salt
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        stats.rtt_ms = self.ack_tracker.srtt();
        stats.rtt_variance = self.ack_tracker.rtt_var();
        stats.packet_loss_percent = self.ack_tracker.loss_percent();
        stats.messages_resent = self.ordered.resent() + self.fragmented.resent();
        stats
    }

    pub fn rtt_ms(&self) -> f32 {
        self.ack_tracker.srtt()
    }

    fn reliable_mut(&mut self, channel: Channel) -> Option<&mut ReliableChannel> {
        match channel {
            Channel::Unreliable => None,
            Channel::ReliableOrdered => Some(&mut self.ordered),
            Channel::ReliableFragmented => Some(&mut self.fragmented),
        }
    }

    pub fn queue(&mut self, channel: Channel, data: &[u8]) -> Result<(), ChannelError> {
        match self.reliable_mut(channel) {
            Some(reliable) => reliable.send(data),
            None => {
                if data.len() > self.fragment_size {
                    return Err(ChannelError::TooLarge {
                        channel,
                        size: data.len(),
                        limit: self.fragment_size,
                    });
                }
                self.unreliable.push(ChannelMessage {
                    channel: Channel::Unreliable.id(),
                    sequence: 0,
                    fragment: None,
                    data: data.to_vec(),
                });
                Ok(())
            }
        }
    }

    fn next_header(&mut self) -> PacketHeader {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        PacketHeader::new(sequence, ack, ack_bitfield)
    }

    /// Handshake and disconnect packets; they carry no channel data.
    pub fn control_packet(&mut self, payload: PacketType) -> Packet {
        let header = self.next_header();
        self.last_send_time = Instant::now();
        Packet::new(header, payload)
    }

    /// Packs everything due into datagrams of at most `budget` message bytes.
    /// Sends a bare ack packet when there is nothing else to carry.
    pub fn build_packets(&mut self, now: Instant, budget: usize) -> Vec<Packet> {
        let resend_after = self.ack_tracker.resend_timeout();
        let mut messages: Vec<ChannelMessage> = std::mem::take(&mut self.unreliable);
        messages.extend(self.ordered.due(now, resend_after));
        messages.extend(self.fragmented.due(now, resend_after));

        let keepalive = now.duration_since(self.last_send_time) >= KEEPALIVE_INTERVAL;
        if messages.is_empty() && !self.needs_ack && !keepalive {
            return Vec::new();
        }

        let mut batches: Vec<Vec<ChannelMessage>> = vec![Vec::new()];
        let mut used = 0;
        for message in messages {
            let size = message.wire_size();
            if used + size > budget && batches.last().is_some_and(|b| !b.is_empty()) {
                batches.push(Vec::new());
                used = 0;
            }
            used += size;
            if let Some(batch) = batches.last_mut() {
                batch.push(message);
            }
        }

        let mut packets = Vec::with_capacity(batches.len());
        for batch in batches {
            let header = self.next_header();
            let reliable: Vec<(Channel, u32)> = batch
                .iter()
                .filter_map(|m| Channel::from_id(m.channel).map(|c| (c, m.sequence)))
                .filter(|(channel, _)| channel.is_reliable())
                .collect();

            self.ack_tracker.track_packet(header.sequence);
            if self.sent_packets.len() >= MAX_TRACKED_PACKETS {
                self.sent_packets.pop_front();
            }
            self.sent_packets.push_back(SentPacket {
                sequence: header.sequence,
                reliable,
            });
            packets.push(Packet::new(header, PacketType::Messages(batch)));
        }

        self.needs_ack = false;
        self.last_send_time = now;
        packets
    }

    /// Applies acks and returns channel payloads ready for delivery.
    pub fn process_packet(&mut self, packet: Packet) -> Vec<(Channel, Vec<u8>)> {
        self.touch();

        for acked in self
            .ack_tracker
            .process_ack(packet.header.ack, packet.header.ack_bitfield)
        {
            self.acknowledge_packet(acked);
        }

        if !self.receive_tracker.record_received(packet.header.sequence) {
            self.needs_ack = true;
            return Vec::new();
        }

        let PacketType::Messages(messages) = packet.payload else {
            return Vec::new();
        };
        self.needs_ack = true;

        let mut delivered = Vec::new();
        for message in messages {
            let Some(channel) = Channel::from_id(message.channel) else {
                continue;
            };
            match self.reliable_mut(channel) {
                None => delivered.push((channel, message.data)),
                Some(reliable) => {
                    delivered.extend(reliable.receive(message).into_iter().map(|d| (channel, d)));
                }
            }
        }
        delivered
    }

    fn acknowledge_packet(&mut self, sequence: u32) {
        let Some(index) = self.sent_packets.iter().position(|p| p.sequence == sequence) else {
            return;
        };
        let Some(sent) = self.sent_packets.remove(index) else {
            return;
        };
        for (channel, message_sequence) in sent.reliable {
            if let Some(reliable) = self.reliable_mut(channel) {
                reliable.acknowledge(message_sequence);
            }
        }
    }
}

/// Server-side table of peers, keyed both by id and by address.
#[derive(Debug)]
pub struct PeerTable {
    by_addr: HashMap<SocketAddr, PeerId>,
    peers: HashMap<PeerId, PeerLink>,
    next_peer_id: u32,
    max_peers: usize,
    timeout: Duration,
    fragment_size: usize,
}

impl PeerTable {
    pub fn new(max_peers: usize, timeout: Duration, fragment_size: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
            fragment_size,
        }
    }

    pub fn get_or_create_pending(
        &mut self,
        addr: SocketAddr,
        client_salt: u64,
    ) -> Result<&mut PeerLink, &'static str> {
        if let Some(&peer_id) = self.by_addr.get(&addr) {
            return self.peers.get_mut(&peer_id).ok_or("Stale peer entry");
        }

        if self.peers.len() >= self.max_peers {
            return Err("Server full");
        }

        let peer_id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1).max(1);

        self.by_addr.insert(addr, peer_id);
        let link = PeerLink::new(addr, peer_id, client_salt, self.fragment_size);
        Ok(self.peers.entry(peer_id).or_insert(link))
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerLink> {
        self.peers.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut PeerLink> {
        self.peers.get_mut(&peer_id)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerLink> {
        let peer_id = self.by_addr.get(addr)?;
        self.peers.get_mut(peer_id)
    }

    pub fn remove(&mut self, peer_id: PeerId) -> Option<PeerLink> {
        let link = self.peers.remove(&peer_id)?;
        self.by_addr.remove(&link.addr);
        Some(link)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerLink> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerLink> {
        self.peers.values_mut()
    }

    /// Removes silent peers, returning those that had completed the handshake.
    pub fn cleanup_timed_out(&mut self) -> Vec<PeerId> {
        let timed_out: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, link)| link.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove(id))
            .filter(PeerLink::is_connected)
            .map(|link| link.peer_id)
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.values().filter(|link| link.is_connected()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn exchange(from: &mut PeerLink, to: &mut PeerLink) -> Vec<(Channel, Vec<u8>)> {
        let mut delivered = Vec::new();
        for packet in from.build_packets(Instant::now(), 1200) {
            delivered.extend(to.process_packet(packet));
        }
        delivered
    }

    #[test]
    fn test_peer_table_capacity() {
        let mut table = PeerTable::new(1, Duration::from_secs(10), 900);
        let first = table.get_or_create_pending(addr(1000), 1).unwrap().peer_id;
        assert_eq!(first, PeerId(1));
        assert_eq!(
            table.get_or_create_pending(addr(1000), 1).unwrap().peer_id,
            first
        );
        assert_eq!(
            table.get_or_create_pending(addr(1001), 2).err(),
            Some("Server full")
        );
    }

    #[test]
    fn test_reliable_message_acked_after_round_trip() {
        let mut a = PeerLink::new(addr(1), PeerId(1), 0, 900);
        let mut b = PeerLink::new(addr(2), PeerId(0), 0, 900);

        a.queue(Channel::ReliableOrdered, &[1, 2, 3]).unwrap();
        let delivered = exchange(&mut a, &mut b);
        assert_eq!(delivered, vec![(Channel::ReliableOrdered, vec![1, 2, 3])]);
        assert_eq!(a.ordered.in_flight(), 1);

        // b answers with a bare ack packet.
        exchange(&mut b, &mut a);
        assert_eq!(a.ordered.in_flight(), 0);
    }

    #[test]
    fn test_lost_packet_is_resent() {
        let mut a = PeerLink::new(addr(1), PeerId(1), 0, 900);
        let mut b = PeerLink::new(addr(2), PeerId(0), 0, 900);

        a.queue(Channel::ReliableOrdered, &[9]).unwrap();
        let start = Instant::now();
        let lost = a.build_packets(start, 1200);
        assert_eq!(lost.len(), 1);

        let later = start + Duration::from_secs(2);
        let retry = a.build_packets(later, 1200);
        let delivered: Vec<_> = retry.into_iter().flat_map(|p| b.process_packet(p)).collect();
        assert_eq!(delivered, vec![(Channel::ReliableOrdered, vec![9])]);
    }

    #[test]
    fn test_large_batches_split_across_packets() {
        let mut a = PeerLink::new(addr(1), PeerId(1), 0, 900);
        for _ in 0..4 {
            a.queue(Channel::Unreliable, &[0; 500]).unwrap();
        }
        let packets = a.build_packets(Instant::now(), 1200);
        assert_eq!(packets.len(), 2);
    }
}
