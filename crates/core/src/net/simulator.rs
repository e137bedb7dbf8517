use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::stats::PacketLossSimulation;

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    order: u64,
    data: Vec<u8>,
    addr: SocketAddr,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Holds outbound datagrams back according to a [`PacketLossSimulation`].
#[derive(Debug, Default)]
pub struct NetworkSimulator {
    config: PacketLossSimulation,
    queue: BinaryHeap<DelayedDatagram>,
    next_order: u64,
    dropped: u64,
}

impl NetworkSimulator {
    pub fn new(config: PacketLossSimulation) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PacketLossSimulation {
        &self.config
    }

    pub fn set_config(&mut self, config: PacketLossSimulation) {
        self.config = config;
    }

    pub fn is_active(&self) -> bool {
        self.config.enabled || !self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Returns false when the datagram was discarded.
    pub fn enqueue(&mut self, data: Vec<u8>, addr: SocketAddr) -> bool {
        if self.config.should_drop() {
            self.dropped += 1;
            return false;
        }

        let delay = Duration::from_millis(self.config.delay_ms() as u64);
        self.queue.push(DelayedDatagram {
            release_time: Instant::now() + delay,
            order: self.next_order,
            data,
            addr,
        });
        self.next_order += 1;
        true
    }

    pub fn take_ready(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut ready = Vec::new();
        let now = Instant::now();
        while self.queue.peek().is_some_and(|d| d.release_time <= now) {
            if let Some(delayed) = self.queue.pop() {
                ready.push((delayed.data, delayed.addr));
            }
        }
        ready
    }
}
