//! Collaborator contracts consumed by the connection coordinator

use async_trait::async_trait;
use earlink_shared::{DeviceHandle, LinkError};

/// Source of the saved primary device
pub trait DeviceDirectory: Send + Sync {
    /// The device to connect to, or `NoSavedDevice` if nothing is paired
    fn primary(&self) -> Result<DeviceHandle, LinkError>;
}

/// Physical link to the device.
///
/// Both calls are fire-and-forget: the outcome arrives later as a
/// [`LinkSignal`](crate::coordinator::LinkSignal), never as a return value.
pub trait TransportService: Send + Sync {
    /// Begin connecting to `device`
    fn connect(&self, device: &DeviceHandle);

    /// Abandon the current attempt or link
    fn disconnect(&self);

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Snapshot of the host radio state
#[async_trait]
pub trait RadioStateProbe: Send + Sync {
    async fn is_enabled(&self) -> bool;
}
