//! Common infrastructure for the HCT controller workspace
//!
//! - [`logging`]: `tracing-subscriber` setup shared by binaries and tests
//! - [`errors`]: the infrastructure error type
//! - [`events`]: the [`MessageBus`](events::MessageBus) abstraction used to receive runs and
//!   publish reports, plus an in-process implementation
//! - [`config`]: TOML loading and environment override helpers

pub mod config;
pub mod errors;
pub mod events;
pub mod logging;

pub use errors::types::{Error, Result};
pub use events::{BusMessage, BusReceiver, InMemoryBus, MessageBus};
pub use logging::setup::{LoggingConfig, log_welcome, parse_log_level, setup_logging};
