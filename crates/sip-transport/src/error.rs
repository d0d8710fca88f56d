use std::time::Duration;
use thiserror::Error;

/// Errors from the control client
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer address could not be resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No response datagram arrived in time
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// Response was not a SIP status line
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
