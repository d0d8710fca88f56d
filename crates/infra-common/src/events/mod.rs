//! Message bus abstraction
//!
//! Runs arrive on per-context command channels and reports leave on the details and
//! summary channels. The controller only sees [`MessageBus`]; a broker-backed
//! implementation plugs in at the same seam as [`InMemoryBus`].

pub mod bus;
pub mod memory;

pub use bus::{BusMessage, BusReceiver, BusReceiverImpl, MessageBus};
pub use memory::InMemoryBus;
