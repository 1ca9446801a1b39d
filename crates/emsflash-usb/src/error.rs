//! Error types for the USB cart

use thiserror::Error;

/// Errors while locating or talking to the cartridge programmer.
#[derive(Debug, Error)]
pub enum UsbCartError {
    /// No cartridge programmer on the bus.
    #[error("EMS cart not found (vid:pid 4670:9394)")]
    DeviceNotFound,

    /// The device could not be opened.
    #[error("can't open EMS cart: {0}")]
    OpenFailed(String),

    /// The interface or an endpoint could not be claimed.
    #[error("can't claim EMS cart interface: {0}")]
    ClaimFailed(String),

    /// A bulk transfer failed.
    #[error("USB transfer failed: {0}")]
    TransferFailed(String),
}

/// Result type for USB cart operations.
pub type Result<T> = std::result::Result<T, UsbCartError>;
