//! Collaborators behind the connection coordinator
//!
//! - `traits`: the directory, transport and radio contracts
//! - `simulated`: in-process transport and radio for development
//! - `rfcomm` / `bt_adapter`: BlueZ-backed implementations (`bluez` feature)

#[cfg(feature = "bluez")]
pub mod bt_adapter;
#[cfg(feature = "bluez")]
pub mod rfcomm;
pub mod simulated;
pub mod traits;

#[cfg(feature = "bluez")]
pub use bt_adapter::{BluezRadioProbe, spawn_radio_watch};
#[cfg(feature = "bluez")]
pub use rfcomm::RfcommTransport;
pub use simulated::{SimulatedOutcome, SimulatedTransport, StaticRadioProbe};
pub use traits::{DeviceDirectory, RadioStateProbe, TransportService};

use crate::coordinator::{Collaborators, CoordinatorConfig, SignalSender, TransportMode};
use crate::directory::StaticDirectory;
use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Build the collaborators for the configured transport mode
pub async fn build_collaborators(
    config: &CoordinatorConfig,
    signals: SignalSender,
) -> Result<Collaborators> {
    let directory = Arc::new(StaticDirectory::new(config.saved_device.clone()));

    match config.transport.mode {
        TransportMode::Simulation => {
            info!(
                "[TRANSPORT] Simulated device answering after {:?}",
                config.transport.simulated_latency
            );
            let transport = SimulatedTransport::new(signals, config.transport.simulated_latency)
                .with_script(config.transport.simulated_outcomes.iter().copied());
            Ok(Collaborators {
                directory,
                transport: Arc::new(transport),
                radio: Arc::new(StaticRadioProbe::new(config.transport.simulated_radio_on)),
            })
        }
        #[cfg(feature = "bluez")]
        TransportMode::Rfcomm => {
            let adapter = bt_adapter::default_adapter().await?;
            spawn_radio_watch(adapter.clone(), signals.clone());
            Ok(Collaborators {
                directory,
                transport: Arc::new(RfcommTransport::new(
                    adapter.clone(),
                    signals,
                    config.transport.channel,
                )),
                radio: Arc::new(BluezRadioProbe::new(adapter)),
            })
        }
        #[cfg(not(feature = "bluez"))]
        TransportMode::Rfcomm => {
            anyhow::bail!("RFCOMM transport requires building with the `bluez` feature")
        }
    }
}

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
