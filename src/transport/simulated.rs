//! Simulated transport and radio for development without Bluetooth hardware

use crate::coordinator::{LinkSignal, SignalSender};
use crate::transport::lock;
use crate::transport::traits::{RadioStateProbe, TransportService};
use async_trait::async_trait;
use earlink_shared::DeviceHandle;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// How a simulated connection attempt ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedOutcome {
    /// Device answers with data
    Connect,
    /// Device unreachable
    TransportFailure,
    /// Device reachable, RFCOMM channel refused
    RfcommFailure,
    /// Nothing ever comes back
    Silent,
}

/// Transport that plays back scripted outcomes after a fixed latency
pub struct SimulatedTransport {
    signals: SignalSender,
    latency: Duration,
    /// Outcomes for upcoming attempts; `Connect` once exhausted
    script: Mutex<VecDeque<SimulatedOutcome>>,
    link: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedTransport {
    pub fn new(signals: SignalSender, latency: Duration) -> Self {
        Self {
            signals,
            latency,
            script: Mutex::new(VecDeque::new()),
            link: Mutex::new(None),
        }
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = SimulatedOutcome>) -> Self {
        lock(&self.script).extend(outcomes);
        self
    }
}

impl TransportService for SimulatedTransport {
    fn connect(&self, device: &DeviceHandle) {
        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or(SimulatedOutcome::Connect);
        debug!("[SIM] Attempt to {} will end with {:?}", device, outcome);

        let signals = self.signals.clone();
        let latency = self.latency;
        let task = tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let signal = match outcome {
                SimulatedOutcome::Connect => LinkSignal::DataReceived,
                SimulatedOutcome::TransportFailure => LinkSignal::TransportFailed,
                SimulatedOutcome::RfcommFailure => LinkSignal::RfcommChannelFailed,
                SimulatedOutcome::Silent => return,
            };
            if let Err(e) = signals.send(signal).await {
                debug!("[SIM] Dropping {:?}: {}", signal, e);
            }
        });

        if let Some(previous) = lock(&self.link).replace(task) {
            previous.abort();
        }
    }

    fn disconnect(&self) {
        if let Some(task) = lock(&self.link).take() {
            task.abort();
            debug!("[SIM] Link dropped");
        }
    }

    fn name(&self) -> &'static str {
        "Simulation"
    }
}

/// Radio probe reporting a fixed value
#[derive(Debug)]
pub struct StaticRadioProbe {
    enabled: AtomicBool,
}

impl StaticRadioProbe {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }
}

#[async_trait]
impl RadioStateProbe for StaticRadioProbe {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}
