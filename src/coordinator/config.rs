//! Coordinator configuration

use crate::transport::SimulatedOutcome;
use anyhow::{bail, Result};
use earlink_shared::{is_valid_address, DeviceHandle, LinkError, LinkTiming};
use std::str::FromStr;
use std::time::Duration;

/// Default RFCOMM channel
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Which transport backs the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Real RFCOMM Bluetooth (requires BlueZ and the `bluez` feature)
    Rfcomm,
    /// In-process simulation (for development)
    #[default]
    Simulation,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Rfcomm => write!(f, "RFCOMM"),
            TransportMode::Simulation => write!(f, "Simulation"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rfcomm" | "bluez" => Ok(TransportMode::Rfcomm),
            "sim" | "simulation" => Ok(TransportMode::Simulation),
            other => bail!("Unknown transport mode: {}", other),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// RFCOMM channel number
    pub channel: u8,
    /// How long the simulated device takes to answer
    pub simulated_latency: Duration,
    /// Outcomes the simulated device plays back, one per attempt
    pub simulated_outcomes: Vec<SimulatedOutcome>,
    /// Radio state reported by the simulated probe
    pub simulated_radio_on: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Simulation,
            channel: DEFAULT_RFCOMM_CHANNEL,
            simulated_latency: Duration::from_millis(800),
            simulated_outcomes: Vec::new(),
            simulated_radio_on: true,
        }
    }
}

/// Configuration for the connection coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Retry and timeout policy
    pub timing: LinkTiming,
    /// Transport configuration
    pub transport: TransportConfig,
    /// The saved primary device, if one has been paired
    pub saved_device: Option<DeviceHandle>,
    /// Capacity of the coordinator's inbox
    pub channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timing: LinkTiming::default(),
            transport: TransportConfig::default(),
            saved_device: None,
            channel_capacity: 100,
        }
    }
}

impl CoordinatorConfig {
    /// Reject configurations the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be at least 1");
        }
        if self.timing.watchdog_timeout.is_zero() {
            bail!("watchdog_timeout must be non-zero");
        }
        if self.transport.mode == TransportMode::Rfcomm
            && !(1..=30).contains(&self.transport.channel)
        {
            bail!("RFCOMM channel must be between 1 and 30");
        }
        if let Some(device) = &self.saved_device {
            if !is_valid_address(&device.address) {
                return Err(LinkError::InvalidAddress(device.address.clone()).into());
            }
        }
        Ok(())
    }
}
