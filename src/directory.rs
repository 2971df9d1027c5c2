//! Saved-device directory

use crate::transport::DeviceDirectory;
use earlink_shared::{DeviceHandle, LinkError};

/// Directory holding at most one saved device, fixed at startup
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    primary: Option<DeviceHandle>,
}

impl StaticDirectory {
    pub fn new(primary: Option<DeviceHandle>) -> Self {
        Self { primary }
    }
}

impl DeviceDirectory for StaticDirectory {
    fn primary(&self) -> Result<DeviceHandle, LinkError> {
        self.primary.clone().ok_or(LinkError::NoSavedDevice)
    }
}
