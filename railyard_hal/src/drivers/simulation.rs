//! Loopback driver.
//!
//! Accepts every command, records the last one per category and logs
//! at debug level. Feedback events can be injected through
//! [`SimulationDriver::inject_feedback`], which makes it the driver of
//! choice for dry-running a layout without hardware.

use std::sync::{Arc, Mutex};

use tracing::debug;

use railyard_common::datatypes::{
    Address, BoosterState, FeedbackPin, FeedbackState, LocoFunctionNr, LocoFunctionState,
    Orientation, Protocol, Speed,
};
use railyard_common::ids::ControlId;

use crate::driver::{ControlEventSink, DriverCapabilities, HalError, RailDriver};
use crate::params::HardwareParams;

/// Factory registered for [`crate::params::HardwareType::Simulation`].
pub fn create(
    params: &HardwareParams,
    sink: Arc<dyn ControlEventSink>,
) -> Result<Box<dyn RailDriver>, HalError> {
    Ok(Box::new(SimulationDriver::new(params.control, sink)))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimState {
    pub booster: Option<BoosterState>,
    pub last_speed: Option<(Protocol, Address, Speed)>,
    pub last_orientation: Option<(Protocol, Address, Orientation)>,
    pub last_function: Option<(Protocol, Address, LocoFunctionNr, LocoFunctionState)>,
    pub last_accessory: Option<(Protocol, Address, u8, bool)>,
}

pub struct SimulationDriver {
    control: ControlId,
    sink: Arc<dyn ControlEventSink>,
    state: Mutex<SimState>,
}

impl SimulationDriver {
    pub fn new(control: ControlId, sink: Arc<dyn ControlEventSink>) -> Self {
        Self {
            control,
            sink,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Snapshot of the last received commands.
    pub fn state(&self) -> SimState {
        self.state.lock().expect("sim driver poisoned").clone()
    }

    /// Feed a feedback report back into the control core, as real
    /// hardware would.
    pub fn inject_feedback(&self, pin: FeedbackPin, state: FeedbackState) {
        self.sink.feedback_event(self.control, pin, state);
    }
}

impl RailDriver for SimulationDriver {
    fn name(&self) -> &str {
        "simulation"
    }

    fn control_id(&self) -> ControlId {
        self.control
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::LOCO
            | DriverCapabilities::ACCESSORY
            | DriverCapabilities::FEEDBACK
            | DriverCapabilities::PROGRAM_READ
            | DriverCapabilities::PROGRAM_WRITE
    }

    fn booster(&self, state: BoosterState) -> Result<(), HalError> {
        debug!(control = %self.control, ?state, "sim booster");
        self.state.lock().expect("sim driver poisoned").booster = Some(state);
        Ok(())
    }

    fn loco_speed(
        &self,
        protocol: Protocol,
        address: Address,
        speed: Speed,
    ) -> Result<(), HalError> {
        debug!(control = %self.control, %protocol, address, speed, "sim loco speed");
        self.state.lock().expect("sim driver poisoned").last_speed =
            Some((protocol, address, speed));
        Ok(())
    }

    fn loco_orientation(
        &self,
        protocol: Protocol,
        address: Address,
        orientation: Orientation,
    ) -> Result<(), HalError> {
        debug!(control = %self.control, %protocol, address, %orientation, "sim loco orientation");
        self.state
            .lock()
            .expect("sim driver poisoned")
            .last_orientation = Some((protocol, address, orientation));
        Ok(())
    }

    fn loco_function(
        &self,
        protocol: Protocol,
        address: Address,
        nr: LocoFunctionNr,
        state: LocoFunctionState,
    ) -> Result<(), HalError> {
        debug!(control = %self.control, %protocol, address, nr, ?state, "sim loco function");
        self.state
            .lock()
            .expect("sim driver poisoned")
            .last_function = Some((protocol, address, nr, state));
        Ok(())
    }

    fn accessory(
        &self,
        protocol: Protocol,
        address: Address,
        state: u8,
        on: bool,
    ) -> Result<(), HalError> {
        debug!(control = %self.control, %protocol, address, state, on, "sim accessory");
        self.state
            .lock()
            .expect("sim driver poisoned")
            .last_accessory = Some((protocol, address, state, on));
        Ok(())
    }

    fn program_read(&self, _protocol: Protocol, _address: Address, cv: u16) -> Result<u8, HalError> {
        // The simulated decoder answers every CV with its low byte.
        Ok(cv as u8)
    }

    fn program_write(
        &self,
        _protocol: Protocol,
        address: Address,
        cv: u16,
        value: u8,
    ) -> Result<(), HalError> {
        debug!(control = %self.control, address, cv, value, "sim program write");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), HalError> {
        debug!(control = %self.control, "sim driver shutdown");
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        feedbacks: StdMutex<Vec<(ControlId, FeedbackPin, FeedbackState)>>,
    }

    impl ControlEventSink for RecordingSink {
        fn booster_event(&self, _control: ControlId, _state: BoosterState) {}

        fn feedback_event(&self, control: ControlId, pin: FeedbackPin, state: FeedbackState) {
            self.feedbacks.lock().unwrap().push((control, pin, state));
        }
    }

    #[test]
    fn records_last_commands() {
        let driver = SimulationDriver::new(ControlId(1), Arc::new(RecordingSink::default()));
        driver.booster(BoosterState::Go).unwrap();
        driver.loco_speed(Protocol::DCC, 3, 512).unwrap();
        driver.accessory(Protocol::MM2, 11, 1, true).unwrap();

        let state = driver.state();
        assert_eq!(state.booster, Some(BoosterState::Go));
        assert_eq!(state.last_speed, Some((Protocol::DCC, 3, 512)));
        assert_eq!(state.last_accessory, Some((Protocol::MM2, 11, 1, true)));
    }

    #[test]
    fn injected_feedback_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let driver = SimulationDriver::new(ControlId(2), Arc::clone(&sink) as Arc<dyn ControlEventSink>);
        driver.inject_feedback(7, FeedbackState::Occupied);

        let events = sink.feedbacks.lock().unwrap();
        assert_eq!(events.as_slice(), &[(ControlId(2), 7, FeedbackState::Occupied)]);
    }

    #[test]
    fn program_read_is_supported() {
        let driver = SimulationDriver::new(ControlId(1), Arc::new(RecordingSink::default()));
        assert_eq!(driver.program_read(Protocol::DCC, 3, 0x0102).unwrap(), 0x02);
        assert!(driver
            .capabilities()
            .contains(DriverCapabilities::PROGRAM_READ));
    }
}
