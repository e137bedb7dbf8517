use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;

const MIN_RESEND_MS: f32 = 30.0;
const MAX_RESEND_MS: f32 = 1000.0;

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u32,
    pub send_time: Instant,
    pub acked: bool,
}

/// Sender side: remembers which packet sequences are in flight and
/// estimates round-trip time from the acks that come back.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    sent: u64,
    acked: u64,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
            sent: 0,
            acked: 0,
        }
    }

    pub fn track_packet(&mut self, sequence: u32) {
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }

        self.sent += 1;
        self.pending.push_back(PendingPacket {
            sequence,
            send_time: Instant::now(),
            acked: false,
        });
    }

    /// Returns the sequences newly acknowledged by this header.
    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32) -> Vec<u32> {
        let mut acked_sequences = Vec::new();
        let mut rtt_samples = Vec::new();
        let now = Instant::now();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= 32 && (ack_bitfield & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                acked_sequences.push(pending.sequence);
                rtt_samples.push(now.duration_since(pending.send_time).as_secs_f32() * 1000.0);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }
        self.acked += acked_sequences.len() as u64;

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }

        acked_sequences
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    /// How long a reliable message waits for an ack before it is sent again.
    pub fn resend_timeout(&self) -> Duration {
        let ms = (self.srtt + 4.0 * self.rtt_var).clamp(MIN_RESEND_MS, MAX_RESEND_MS);
        Duration::from_secs_f32(ms / 1000.0)
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }

    /// Share of tracked packets that were never acknowledged, in percent.
    pub fn loss_percent(&self) -> f32 {
        let expired = self
            .pending
            .iter()
            .filter(|p| !p.acked && p.send_time.elapsed() > self.resend_timeout() * 2)
            .count() as f32;
        let settled = self.acked as f32 + expired;
        if settled <= 0.0 {
            return 0.0;
        }
        expired / settled * 100.0
    }

    pub fn packets_sent(&self) -> u64 {
        self.sent
    }
}

/// Receiver side: produces the `(ack, ack_bitfield)` pair for outgoing
/// headers and filters duplicate packets.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
    started: bool,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            // Placeholder until the first packet arrives; acks nothing.
            last_received: u32::MAX,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
            started: false,
        }
    }

    /// Returns false for a duplicate.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if !self.started {
            self.started = true;
            self.last_received = sequence;
        } else if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            let shifted = self.received_bitfield.checked_shl(diff).unwrap_or(0);
            let previous = 1u32.checked_shl(diff - 1).unwrap_or(0);
            self.received_bitfield = shifted | previous;
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}
