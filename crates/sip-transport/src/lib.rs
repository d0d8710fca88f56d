//! SIP control client for the HCT controller
//!
//! Sends single out-of-dialog `MESSAGE` requests over UDP and reads back the status code
//! of the first response datagram. The controller uses it for the `allow` command that
//! opens the system under test to a given source address.
//!
//! ```text
//!  controller                         peer
//!      │  MESSAGE  {"cmd":"allow",..}  │
//!      │──────────────────────────────▶│
//!      │  SIP/2.0 200 OK               │
//!      │◀──────────────────────────────│
//! ```
//!
//! Any transport failure, timeout or malformed answer is reported as status `503`.

pub mod client;
pub mod error;
pub mod message;

pub use client::{ControlClient, DEFAULT_TIMEOUT, SERVICE_UNAVAILABLE};
pub use error::{Error, Result};
pub use message::{ControlRequest, allow_body, parse_status_code};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{ControlClient, ControlRequest, Error, Result, SERVICE_UNAVAILABLE};
}
