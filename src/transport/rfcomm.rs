//! RFCOMM transport for the earbuds' control channel

use crate::coordinator::{LinkSignal, SignalSender};
use crate::transport::lock;
use crate::transport::traits::TransportService;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Adapter, Address};
use earlink_shared::DeviceHandle;
use std::sync::Mutex;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// RFCOMM transport.
///
/// Each attempt runs as one task: baseband connect, then the RFCOMM channel,
/// then reads until the link drops. Baseband failure is reported as
/// `TransportFailed`, channel failure as `RfcommChannelFailed`, and an open
/// channel as `DataReceived`.
pub struct RfcommTransport {
    adapter: Adapter,
    signals: SignalSender,
    channel: u8,
    link: Mutex<Option<JoinHandle<()>>>,
}

impl RfcommTransport {
    pub fn new(adapter: Adapter, signals: SignalSender, channel: u8) -> Self {
        Self {
            adapter,
            signals,
            channel,
            link: Mutex::new(None),
        }
    }
}

impl TransportService for RfcommTransport {
    fn connect(&self, device: &DeviceHandle) {
        let task = tokio::spawn(run_link(
            self.adapter.clone(),
            device.address.clone(),
            self.channel,
            self.signals.clone(),
        ));

        if let Some(previous) = lock(&self.link).replace(task) {
            previous.abort();
        }
    }

    fn disconnect(&self) {
        // Dropping the stream closes the channel
        if let Some(task) = lock(&self.link).take() {
            task.abort();
            info!("[BT] Link task aborted");
        }
    }

    fn name(&self) -> &'static str {
        "RFCOMM"
    }
}

async fn run_link(adapter: Adapter, address: String, channel: u8, signals: SignalSender) {
    let address: Address = match address.parse() {
        Ok(address) => address,
        Err(e) => {
            error!("[BT] Invalid device address {}: {}", address, e);
            let _ = signals.send(LinkSignal::TransportFailed).await;
            return;
        }
    };

    if let Err(e) = connect_device(&adapter, address).await {
        warn!("[BT] Failed to connect to {}: {}", address, e);
        let _ = signals.send(LinkSignal::TransportFailed).await;
        return;
    }

    let socket_addr = RfcommAddr::new(address, channel);
    info!("[BT] Opening RFCOMM channel {} on {}", channel, address);
    let mut stream = match RfcommStream::connect(socket_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("[BT] RFCOMM channel {} on {} failed: {}", channel, address, e);
            let _ = signals.send(LinkSignal::RfcommChannelFailed).await;
            return;
        }
    };

    info!("[BT] RFCOMM channel open to {}", address);
    if signals.send(LinkSignal::DataReceived).await.is_err() {
        return;
    }

    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                warn!("[BT] {} closed the RFCOMM channel", address);
                break;
            }
            Ok(n) => trace!("[BT] {} bytes from {}", n, address),
            Err(e) => {
                warn!("[BT] RFCOMM read error from {}: {}", address, e);
                break;
            }
        }
    }
}

/// Bring up the baseband link if the device is not already connected
async fn connect_device(adapter: &Adapter, address: Address) -> bluer::Result<()> {
    let device = adapter.device(address)?;
    if !device.is_connected().await? {
        device.connect().await?;
    }
    Ok(())
}
