//! earlink Shared Types
//!
//! This crate holds the transport-agnostic half of the connection coordinator:
//! the link state machine, the device catalogue, and the timing parameters
//! shared by every driver of the state machine.

pub mod device;
pub mod error;
pub mod state_machine;

pub use device::{is_valid_address, DeviceHandle, DeviceModel};
pub use error::LinkError;
pub use state_machine::{
    ConnectTrigger, LinkAction, LinkEvent, LinkPhase, LinkStateMachine, LinkStatus, LinkTiming,
    RetryCause, TransitionResult, WatchdogHandle,
};

/// Timing parameters for the connection lifecycle
pub mod timing {
    /// How long an attempt may stay silent before the watchdog declares it stuck
    pub const WATCHDOG_TIMEOUT_MS: u64 = 5000;

    /// Automatic retries allowed per connection cycle
    pub const MAX_AUTO_RETRIES: u32 = 3;

    /// Backoff before retrying after an RFCOMM channel failure
    pub const RFCOMM_RETRY_DELAY_MS: u64 = 2000;

    /// Backoff before retrying after the watchdog fired
    pub const WATCHDOG_RETRY_DELAY_MS: u64 = 1000;

    /// Delay between the radio coming up and the one-shot auto-connect
    pub const AUTO_CONNECT_DELAY_MS: u64 = 2000;
}
