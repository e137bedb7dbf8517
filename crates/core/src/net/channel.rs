use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::protocol::{ChannelMessage, FragmentInfo};

/// Out-of-order messages held back at most this far ahead of delivery.
const RECEIVE_WINDOW: u32 = 1024;

/// Delivery class of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum Channel {
    /// May be dropped or reordered.
    #[default]
    Unreliable,
    /// Delivered once, in send order.
    ReliableOrdered,
    /// Like `ReliableOrdered`, and payloads may exceed one datagram.
    ReliableFragmented,
}

impl Channel {
    pub const ALL: [Channel; 3] = [
        Channel::Unreliable,
        Channel::ReliableOrdered,
        Channel::ReliableFragmented,
    ];

    pub fn id(self) -> u8 {
        match self {
            Channel::Unreliable => 0,
            Channel::ReliableOrdered => 1,
            Channel::ReliableFragmented => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Channel::Unreliable),
            1 => Some(Channel::ReliableOrdered),
            2 => Some(Channel::ReliableFragmented),
            _ => None,
        }
    }

    pub fn is_reliable(self) -> bool {
        self != Channel::Unreliable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("{size} byte message exceeds the {limit} byte limit of {channel:?}")]
    TooLarge {
        channel: Channel,
        size: usize,
        limit: usize,
    },
}

#[derive(Debug)]
struct Outgoing {
    message: ChannelMessage,
    last_sent: Option<Instant>,
}

/// Send and receive state of one reliable channel towards one peer.
#[derive(Debug)]
pub struct ReliableChannel {
    channel: Channel,
    fragment_size: usize,
    next_send: u32,
    in_flight: BTreeMap<u32, Outgoing>,
    next_deliver: u32,
    received: BTreeMap<u32, ChannelMessage>,
    assembling: Vec<u8>,
    resent: u64,
}

impl ReliableChannel {
    pub fn new(channel: Channel, fragment_size: usize) -> Self {
        Self {
            channel,
            fragment_size: fragment_size.max(1),
            next_send: 0,
            in_flight: BTreeMap::new(),
            next_deliver: 0,
            received: BTreeMap::new(),
            assembling: Vec::new(),
            resent: 0,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn resent(&self) -> u64 {
        self.resent
    }

    /// Queues a payload. On the fragmented channel large payloads are split
    /// into `fragment_size` pieces, each with its own sequence.
    pub fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if data.len() <= self.fragment_size {
            self.push(None, data.to_vec());
            return Ok(());
        }

        if self.channel != Channel::ReliableFragmented {
            return Err(ChannelError::TooLarge {
                channel: self.channel,
                size: data.len(),
                limit: self.fragment_size,
            });
        }

        let count = data.len().div_ceil(self.fragment_size);
        let count = u16::try_from(count).map_err(|_| ChannelError::TooLarge {
            channel: self.channel,
            size: data.len(),
            limit: self.fragment_size * u16::MAX as usize,
        })?;
        for (index, chunk) in data.chunks(self.fragment_size).enumerate() {
            let fragment = FragmentInfo {
                index: index as u16,
                count,
            };
            self.push(Some(fragment), chunk.to_vec());
        }
        Ok(())
    }

    fn push(&mut self, fragment: Option<FragmentInfo>, data: Vec<u8>) {
        let sequence = self.next_send;
        self.next_send = self.next_send.wrapping_add(1);
        self.in_flight.insert(
            sequence,
            Outgoing {
                message: ChannelMessage {
                    channel: self.channel.id(),
                    sequence,
                    fragment,
                    data,
                },
                last_sent: None,
            },
        );
    }

    /// Messages never sent, or unacknowledged for longer than `resend_after`.
    pub fn due(&mut self, now: Instant, resend_after: Duration) -> Vec<ChannelMessage> {
        let mut due = Vec::new();
        for outgoing in self.in_flight.values_mut() {
            let send = match outgoing.last_sent {
                None => true,
                Some(sent) => {
                    let expired = now.duration_since(sent) >= resend_after;
                    if expired {
                        self.resent += 1;
                    }
                    expired
                }
            };
            if send {
                outgoing.last_sent = Some(now);
                due.push(outgoing.message.clone());
            }
        }
        due
    }

    pub fn acknowledge(&mut self, sequence: u32) {
        self.in_flight.remove(&sequence);
    }

    /// Accepts one message off the wire and returns every payload that is
    /// now deliverable in order.
    pub fn receive(&mut self, message: ChannelMessage) -> Vec<Vec<u8>> {
        let ahead = message.sequence.wrapping_sub(self.next_deliver);
        if ahead >= RECEIVE_WINDOW {
            // Already delivered, or too far ahead; the sender will retry.
            return Vec::new();
        }
        self.received.entry(message.sequence).or_insert(message);

        let mut delivered = Vec::new();
        while let Some(message) = self.received.remove(&self.next_deliver) {
            self.next_deliver = self.next_deliver.wrapping_add(1);
            match message.fragment {
                None => delivered.push(message.data),
                Some(fragment) => {
                    if fragment.index == 0 {
                        self.assembling.clear();
                    }
                    self.assembling.extend_from_slice(&message.data);
                    if fragment.index + 1 == fragment.count {
                        delivered.push(std::mem::take(&mut self.assembling));
                    }
                }
            }
        }
        delivered
    }
}
