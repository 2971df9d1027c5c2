//! BlueZ adapter access: radio state probe and power-on notifications

use crate::coordinator::{LinkSignal, SignalSender};
use crate::transport::traits::RadioStateProbe;
use anyhow::Result;
use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, AdapterProperty};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Get the default Bluetooth adapter
pub async fn default_adapter() -> Result<Adapter> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("[RADIO] Using adapter {}", adapter.name());
    Ok(adapter)
}

/// Radio probe backed by the adapter's `Powered` property
pub struct BluezRadioProbe {
    adapter: Adapter,
}

impl BluezRadioProbe {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RadioStateProbe for BluezRadioProbe {
    async fn is_enabled(&self) -> bool {
        match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("[RADIO] Cannot read power state of {}: {}", self.adapter.name(), e);
                false
            }
        }
    }
}

/// Forward adapter power-on events to the coordinator as `RadioEnabled`
pub fn spawn_radio_watch(adapter: Adapter, signals: SignalSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("[RADIO] Cannot watch adapter {}: {}", adapter.name(), e);
                return;
            }
        };
        tokio::pin!(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(true)) = event {
                info!("[RADIO] Adapter {} powered on", adapter.name());
                if signals.send(LinkSignal::RadioEnabled).await.is_err() {
                    break;
                }
            }
        }
    })
}
