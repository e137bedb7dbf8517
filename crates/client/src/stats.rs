use std::collections::VecDeque;
use std::time::Instant;

use tether::NetEvent;

const SAMPLE_COUNT: usize = 60;

/// Rolling tick rate plus counters for the events a bot cares about.
pub struct BotStats {
    tick_times: VecDeque<Instant>,
    tick_rate: f32,
    pub corrections: u64,
    pub replayed: u64,
    pub hard_corrections: u64,
    pub rejected_calls: u64,
}

impl Default for BotStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BotStats {
    pub fn new() -> Self {
        Self {
            tick_times: VecDeque::with_capacity(SAMPLE_COUNT),
            tick_rate: 0.0,
            corrections: 0,
            replayed: 0,
            hard_corrections: 0,
            rejected_calls: 0,
        }
    }

    pub fn record_tick(&mut self) {
        let now = Instant::now();

        if self.tick_times.len() >= SAMPLE_COUNT {
            self.tick_times.pop_front();
        }
        self.tick_times.push_back(now);

        if let Some(oldest) = self.tick_times.front() {
            let elapsed = now.duration_since(*oldest).as_secs_f32();
            if elapsed > 0.0 {
                self.tick_rate = (self.tick_times.len() - 1) as f32 / elapsed;
            }
        }
    }

    pub fn record_event(&mut self, event: &NetEvent) {
        match event {
            NetEvent::Corrected { replayed, .. } => {
                self.corrections += 1;
                self.replayed += *replayed as u64;
            }
            NetEvent::HardCorrection { .. } => self.hard_corrections += 1,
            NetEvent::RpcRejected { .. } => self.rejected_calls += 1,
            _ => {}
        }
    }

    pub fn tick_rate(&self) -> f32 {
        self.tick_rate
    }
}
