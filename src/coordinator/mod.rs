//! Connection coordination for the primary device
//!
//! This module handles:
//! - Serialising transport signals, user commands and timers onto one task
//! - Driving the link state machine and performing its side effects
//! - Watchdog and bounded automatic retries
//! - Publishing link status to presentation layers

mod config;
mod manager;

pub use config::{CoordinatorConfig, TransportMode};
pub use manager::{Collaborators, ConnectionCoordinator, LinkSignal, Mailbox, SignalSender};
