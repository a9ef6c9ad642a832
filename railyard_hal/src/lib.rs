//! Railyard Hardware Abstraction Layer
//!
//! Defines the outbound command surface every command station driver
//! implements ([`driver::RailDriver`]), the inbound event callbacks
//! ([`driver::ControlEventSink`]), and the registry constructing
//! concrete drivers from a hardware-type tag at startup.
//!
//! Drivers run their own I/O threads (sender queue + receiver loop)
//! and are responsible for transport framing. Sends are
//! fire-and-forget; the control core does not wait for
//! acknowledgements.

pub mod driver;
pub mod drivers;
pub mod params;
pub mod registry;

pub use driver::{ControlEventSink, DriverCapabilities, HalError, RailDriver};
pub use params::{HardwareParams, HardwareType};
pub use registry::DriverRegistry;
