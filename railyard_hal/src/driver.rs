//! Driver trait and error types.

use bitflags::bitflags;
use thiserror::Error;

use railyard_common::datatypes::{
    Address, BoosterState, FeedbackPin, FeedbackState, LocoFunctionNr, LocoFunctionState,
    Orientation, Protocol, Speed,
};
use railyard_common::ids::ControlId;

/// Error types for driver operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Driver construction failed (bad parameters, connect refused).
    #[error("driver initialization failed: {0}")]
    InitFailed(String),

    /// Transport-level send failure.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// No driver registered for the requested hardware type.
    #[error("driver not found: {0}")]
    DriverNotFound(String),

    /// Operation not supported by this command station.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

bitflags! {
    /// What a command station can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverCapabilities: u8 {
        /// Drives locomotive decoders.
        const LOCO          = 0x01;
        /// Drives accessory decoders (switches, signals, generic).
        const ACCESSORY     = 0x02;
        /// Delivers feedback events.
        const FEEDBACK      = 0x04;
        /// Reads decoder configuration variables.
        const PROGRAM_READ  = 0x08;
        /// Writes decoder configuration variables.
        const PROGRAM_WRITE = 0x10;
    }
}

/// Inbound event callbacks into the control core.
///
/// Drivers call these from their receiver threads; implementations
/// must not block on driver locks. `control` identifies the
/// originating command station so echoes are not sent back to it.
pub trait ControlEventSink: Send + Sync {
    fn booster_event(&self, control: ControlId, state: BoosterState);

    fn feedback_event(&self, control: ControlId, pin: FeedbackPin, state: FeedbackState);

    /// Echo of a speed change made on the command station itself.
    fn loco_speed_event(&self, control: ControlId, protocol: Protocol, address: Address, speed: Speed) {
        let _ = (control, protocol, address, speed);
    }

    /// Echo of a direction change made on the command station itself.
    fn loco_orientation_event(
        &self,
        control: ControlId,
        protocol: Protocol,
        address: Address,
        orientation: Orientation,
    ) {
        let _ = (control, protocol, address, orientation);
    }
}

/// Outbound command surface of a command station driver.
///
/// # Lifecycle
///
/// 1. Constructed by its factory from [`crate::params::HardwareParams`],
///    spawning any I/O threads.
/// 2. Commands arrive from the control core on arbitrary threads.
/// 3. `shutdown()` stops the I/O threads; they must observe the stop
///    within one second.
pub trait RailDriver: Send + Sync {
    fn name(&self) -> &str;

    fn control_id(&self) -> ControlId;

    fn capabilities(&self) -> DriverCapabilities;

    fn booster(&self, state: BoosterState) -> Result<(), HalError>;

    fn loco_speed(&self, protocol: Protocol, address: Address, speed: Speed)
        -> Result<(), HalError>;

    fn loco_orientation(
        &self,
        protocol: Protocol,
        address: Address,
        orientation: Orientation,
    ) -> Result<(), HalError>;

    fn loco_function(
        &self,
        protocol: Protocol,
        address: Address,
        nr: LocoFunctionNr,
        state: LocoFunctionState,
    ) -> Result<(), HalError>;

    /// Drive an accessory output. `state` is the opaque state byte of
    /// the item kind (switch position, signal aspect, on/off); `on`
    /// carries the pulse edge: the caller sends `true`, then `false`
    /// after the item's duration.
    fn accessory(
        &self,
        protocol: Protocol,
        address: Address,
        state: u8,
        on: bool,
    ) -> Result<(), HalError>;

    fn program_read(&self, protocol: Protocol, address: Address, cv: u16) -> Result<u8, HalError> {
        let _ = (protocol, address, cv);
        Err(HalError::Unsupported("program read"))
    }

    fn program_write(
        &self,
        protocol: Protocol,
        address: Address,
        cv: u16,
        value: u8,
    ) -> Result<(), HalError> {
        let _ = (protocol, address, cv, value);
        Err(HalError::Unsupported("program write"))
    }

    /// Stop I/O threads. Must complete within one second.
    fn shutdown(&self) -> Result<(), HalError>;
}

// ─── Tests ──────────────────────────────────────────────────────────
