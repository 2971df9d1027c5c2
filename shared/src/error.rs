//! Errors surfaced by the connection coordinator

use thiserror::Error;

/// Errors that can be returned to callers of the coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("No saved device to connect to")]
    NoSavedDevice,

    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("Connection coordinator is not running")]
    CoordinatorClosed,
}
