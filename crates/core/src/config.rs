use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::net::{Channel, DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_PACKET_SIZE, PacketLossSimulation};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by server and client. Every field has a default, so a
/// RON file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetSettings {
    pub max_connections: usize,
    pub port: u16,
    pub bind_address: String,
    pub tick_rate: u32,
    /// Interval between input/output and pose flushes.
    pub send_delay_ms: u32,
    pub packet_size: usize,
    /// Reliable-fragmented payloads above this are split.
    pub fragment_size: usize,
    pub connection_timeout_secs: u64,
    /// Prefab spawned for each connection once it is ready.
    pub player_prefab: Option<String>,
    pub input_channel: Channel,
    pub max_prediction_records: usize,
    /// Smooth observed poses over one send interval instead of snapping.
    pub observer_smoothing: bool,
    /// Send intervals between repeats of an unchanged synced pose.
    pub pose_refresh_intervals: u32,
    pub simulation: Option<PacketLossSimulation>,
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            send_delay_ms: 10,
            packet_size: MAX_PACKET_SIZE,
            fragment_size: 900,
            connection_timeout_secs: 10,
            player_prefab: None,
            input_channel: Channel::Unreliable,
            max_prediction_records: 128,
            observer_smoothing: true,
            pose_refresh_intervals: 10,
            simulation: None,
        }
    }
}

impl NetSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let settings = Self::from_ron(&contents)?;
        log::info!("Loaded net settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_ron(contents: &str) -> Result<Self, ConfigError> {
        let settings: NetSettings = ron::from_str(contents).map_err(ConfigError::ParseError)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.max_connections == 0 || self.max_connections > i16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_connections must be within 1..={}",
                i16::MAX
            )));
        }
        if self.fragment_size == 0 || self.fragment_size >= self.packet_size {
            return Err(ConfigError::Invalid(
                "fragment_size must be positive and below packet_size".into(),
            ));
        }
        if self.pose_refresh_intervals == 0 {
            return Err(ConfigError::Invalid(
                "pose_refresh_intervals must be positive".into(),
            ));
        }
        if self.max_prediction_records == 0 {
            return Err(ConfigError::Invalid(
                "max_prediction_records must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn fixed_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Send delay expressed in whole ticks, never less than one.
    pub fn send_interval_ticks(&self) -> u64 {
        let tick_ms = 1000.0 / self.tick_rate.max(1) as f32;
        ((self.send_delay_ms as f32 / tick_ms).round() as u64).max(1)
    }

    pub fn send_interval(&self) -> f32 {
        self.send_interval_ticks() as f32 * self.fixed_dt()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
