//! Locomotives.
//!
//! Configuration and drive state live here; the per-locomotive
//! automode runner in the control crate drives the [`AutoState`]
//! through its state machine and blocks on [`Loco::feedbacks_reached`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use crate::datatypes::{
    HardwareHandle, Length, LocoFunctionNr, LocoFunctionState, Orientation, Protocol,
    SelectRouteApproach, Speed, MAX_LOCO_FUNCTIONS, MIN_SPEED,
};
use crate::error::RailError;
use crate::ids::{ControlId, FeedbackId, LocoId};
use crate::model::route::Route;
use crate::model::TrackBase;
use crate::queue::EventQueue;
use crate::serialize::{Properties, Writer};

/// States of the per-locomotive automode machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocoState {
    /// Operator drives; no automode resources held.
    Manual,
    /// Runner thread has exited and cannot be restarted.
    Terminated,
    /// In automode, waiting for the booster.
    Off,
    SearchingFirst,
    SearchingSecond,
    Running,
    Stopping,
    /// Safety fault; requires an explicit manual-mode recovery.
    Error,
}

impl LocoState {
    /// Every state except Manual and Terminated counts as automode.
    pub const fn is_auto(self) -> bool {
        !matches!(self, LocoState::Manual | LocoState::Terminated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocoCore {
    pub name: String,
    pub handle: HardwareHandle,
    pub length: Length,
    pub pushpull: bool,
    pub max_speed: Speed,
    pub travel_speed: Speed,
    pub reduced_speed: Speed,
    pub creeping_speed: Speed,
    /// Loco-level route selection override.
    pub select_route_approach: SelectRouteApproach,
    /// Multiple-unit partners mirroring speed, orientation and
    /// functions. Slaves do not participate in reservation.
    pub slaves: Vec<LocoId>,
}

impl Default for LocoCore {
    fn default() -> Self {
        Self {
            name: String::new(),
            handle: HardwareHandle::new(ControlId(0), Protocol::None, 0),
            length: 0,
            pushpull: false,
            max_speed: 1023,
            travel_speed: 700,
            reduced_speed: 400,
            creeping_speed: 150,
            select_route_approach: SelectRouteApproach::SystemDefault,
            slaves: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct DriveState {
    speed: Speed,
    orientation: Orientation,
    functions: [LocoFunctionState; MAX_LOCO_FUNCTIONS],
}

/// Runtime state owned by the automode runner.
///
/// Invariant outside Manual/Terminated: `track_from` is set and
/// hard-locked by this locomotive. The tail is `track_from`; the head
/// is `track_first` (and `track_second` in two-reserve mode).
pub struct AutoState {
    state: LocoState,
    pub track_from: Option<Arc<dyn TrackBase>>,
    pub track_first: Option<Arc<dyn TrackBase>>,
    pub track_second: Option<Arc<dyn TrackBase>>,
    pub route_first: Option<Arc<Route>>,
    pub route_second: Option<Arc<Route>>,
    /// Whether the current head route's relations were already
    /// executed (a promoted second route keeps its execution).
    pub head_executed: bool,
    /// Earliest instant the next search may depart (wait-after-release).
    pub wait_until: Option<Instant>,
}

impl Default for AutoState {
    fn default() -> Self {
        Self {
            state: LocoState::Manual,
            track_from: None,
            track_first: None,
            track_second: None,
            route_first: None,
            route_second: None,
            head_executed: false,
            wait_until: None,
        }
    }
}

impl AutoState {
    pub fn state(&self) -> LocoState {
        self.state
    }

    pub fn set_state(&mut self, state: LocoState) {
        self.state = state;
    }
}

pub struct Loco {
    id: LocoId,
    core: RwLock<LocoCore>,
    drive: RwLock<DriveState>,
    auto: Mutex<AutoState>,
    request_manual: AtomicBool,
    terminate: AtomicBool,
    feedbacks_reached: EventQueue<FeedbackId>,
}

impl Loco {
    pub fn new(id: LocoId, core: LocoCore) -> Self {
        Self {
            id,
            core: RwLock::new(core),
            drive: RwLock::new(DriveState {
                speed: MIN_SPEED,
                orientation: Orientation::Right,
                functions: [LocoFunctionState::Off; MAX_LOCO_FUNCTIONS],
            }),
            auto: Mutex::new(AutoState::default()),
            request_manual: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            feedbacks_reached: EventQueue::new(),
        }
    }

    pub fn id(&self) -> LocoId {
        self.id
    }

    pub fn core(&self) -> LocoCore {
        self.core.read().expect("loco poisoned").clone()
    }

    pub fn object_name(&self) -> String {
        self.core.read().expect("loco poisoned").name.clone()
    }

    pub fn handle(&self) -> HardwareHandle {
        self.core.read().expect("loco poisoned").handle
    }

    pub fn length(&self) -> Length {
        self.core.read().expect("loco poisoned").length
    }

    pub fn pushpull(&self) -> bool {
        self.core.read().expect("loco poisoned").pushpull
    }

    pub fn select_route_approach(&self) -> SelectRouteApproach {
        self.core.read().expect("loco poisoned").select_route_approach
    }

    pub fn slaves(&self) -> Vec<LocoId> {
        self.core.read().expect("loco poisoned").slaves.clone()
    }

    /// Replace the editable attributes. Refused while the locomotive
    /// is in use (moving, placed, or in automode).
    pub fn update(&self, core: LocoCore) -> Result<(), RailError> {
        if self.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "loco {} is in use",
                self.object_name()
            )));
        }
        *self.core.write().expect("loco poisoned") = core;
        Ok(())
    }

    /// Assign the multiple-unit partners; allowed at any time.
    pub fn set_slaves(&self, slaves: Vec<LocoId>) {
        self.core.write().expect("loco poisoned").slaves = slaves;
    }

    // ── Drive state ─────────────────────────────────────────────────

    pub fn speed(&self) -> Speed {
        self.drive.read().expect("loco poisoned").speed
    }

    /// Store the commanded speed, clamped to the configured maximum.
    pub fn set_speed(&self, speed: Speed) -> Speed {
        let max = self.core.read().expect("loco poisoned").max_speed;
        let speed = speed.min(max);
        self.drive.write().expect("loco poisoned").speed = speed;
        speed
    }

    pub fn orientation(&self) -> Orientation {
        self.drive.read().expect("loco poisoned").orientation
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.drive.write().expect("loco poisoned").orientation = orientation;
    }

    pub fn function(&self, nr: LocoFunctionNr) -> LocoFunctionState {
        let drive = self.drive.read().expect("loco poisoned");
        drive
            .functions
            .get(nr as usize)
            .copied()
            .unwrap_or(LocoFunctionState::Off)
    }

    pub fn set_function(&self, nr: LocoFunctionNr, state: LocoFunctionState) {
        let mut drive = self.drive.write().expect("loco poisoned");
        if let Some(slot) = drive.functions.get_mut(nr as usize) {
            *slot = state;
        }
    }

    /// Preset speed of a route speed class.
    pub fn speed_for(&self, class: crate::datatypes::SpeedClass) -> Speed {
        let core = self.core.read().expect("loco poisoned");
        match class {
            crate::datatypes::SpeedClass::Travel => core.travel_speed,
            crate::datatypes::SpeedClass::Reduced => core.reduced_speed,
            crate::datatypes::SpeedClass::Creeping => core.creeping_speed,
        }
    }

    // ── Automode runtime ────────────────────────────────────────────

    pub fn auto_state(&self) -> MutexGuard<'_, AutoState> {
        self.auto.lock().expect("loco poisoned")
    }

    pub fn state(&self) -> LocoState {
        self.auto.lock().expect("loco poisoned").state()
    }

    pub fn is_in_auto_mode(&self) -> bool {
        self.state().is_auto()
    }

    pub fn is_in_use(&self) -> bool {
        let auto = self.auto.lock().expect("loco poisoned");
        self.speed() > MIN_SPEED || auto.state() != LocoState::Manual || auto.track_from.is_some()
    }

    pub fn feedbacks_reached(&self) -> &EventQueue<FeedbackId> {
        &self.feedbacks_reached
    }

    /// Sticky manual-mode request, observed by the runner at every
    /// wake-up.
    pub fn request_manual_mode(&self) {
        self.request_manual.store(true, Ordering::SeqCst);
    }

    pub fn manual_mode_requested(&self) -> bool {
        self.request_manual.load(Ordering::SeqCst)
    }

    pub fn clear_manual_request(&self) {
        self.request_manual.store(false, Ordering::SeqCst);
    }

    /// Shutdown flag for the runner thread.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn clear_terminate(&self) {
        self.terminate.store(false, Ordering::SeqCst);
    }

    // ── Persistence ─────────────────────────────────────────────────

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("loco poisoned");
        let drive = self.drive.read().expect("loco poisoned");
        let functions: u32 = drive
            .functions
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == LocoFunctionState::On)
            .fold(0, |acc, (nr, _)| acc | (1 << nr));
        let slaves = core
            .slaves
            .iter()
            .map(|s| s.0.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Writer::new("Loco")
            .field("id", self.id.0)
            .field("name", &core.name)
            .field("control", core.handle.control.0)
            .field("protocol", core.handle.protocol.to_code())
            .field("address", core.handle.address)
            .field("length", core.length)
            .bool_field("pushpull", core.pushpull)
            .field("maxspeed", core.max_speed)
            .field("travelspeed", core.travel_speed)
            .field("reducedspeed", core.reduced_speed)
            .field("creepingspeed", core.creeping_speed)
            .field("selectrouteapproach", core.select_route_approach.to_code())
            .field("slaves", slaves)
            .field("orientation", drive.orientation.to_code())
            .field("functions", functions)
            .finish()
    }

    /// Speed is deliberately not persisted; a freshly loaded
    /// locomotive is at standstill.
    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Loco") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Loco".to_string(),
            ));
        }
        let slaves = props
            .get_str("slaves", "")
            .split(',')
            .filter_map(|s| s.trim().parse::<u16>().ok())
            .filter(|raw| *raw != 0)
            .map(LocoId)
            .collect();
        let core = LocoCore {
            name: props.get_str("name", ""),
            handle: HardwareHandle::new(
                ControlId(props.get_u8("control", 0)),
                Protocol::from_code(props.get_u8("protocol", 0)),
                props.get_u16("address", 0),
            ),
            length: props.get_u16("length", 0),
            pushpull: props.get_bool("pushpull", false),
            max_speed: props.get_u16("maxspeed", 1023),
            travel_speed: props.get_u16("travelspeed", 700),
            reduced_speed: props.get_u16("reducedspeed", 400),
            creeping_speed: props.get_u16("creepingspeed", 150),
            select_route_approach: SelectRouteApproach::from_code(
                props.get_u8("selectrouteapproach", 0),
            ),
            slaves,
        };
        let loco = Loco::new(LocoId(props.get_u16("id", 0)), core);
        {
            let mut drive = loco.drive.write().expect("loco poisoned");
            drive.orientation = Orientation::from_code(props.get_u8("orientation", 1));
            let functions = props.get_u32("functions", 0);
            for nr in 0..MAX_LOCO_FUNCTIONS {
                if functions & (1 << nr) != 0 {
                    drive.functions[nr] = LocoFunctionState::On;
                }
            }
        }
        Ok(loco)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::SpeedClass;

    fn sample() -> Loco {
        Loco::new(
            LocoId(3),
            LocoCore {
                name: "BR 218".to_string(),
                handle: HardwareHandle::new(ControlId(1), Protocol::DCC, 218),
                length: 120,
                pushpull: true,
                max_speed: 900,
                travel_speed: 650,
                reduced_speed: 380,
                creeping_speed: 120,
                select_route_approach: SelectRouteApproach::LongestUnused,
                slaves: vec![LocoId(4)],
            },
        )
    }

    #[test]
    fn fresh_loco_is_manual_and_stopped() {
        let loco = sample();
        assert_eq!(loco.state(), LocoState::Manual);
        assert_eq!(loco.speed(), MIN_SPEED);
        assert!(!loco.is_in_auto_mode());
        assert!(!loco.is_in_use());
    }

    #[test]
    fn speed_clamps_to_max() {
        let loco = sample();
        assert_eq!(loco.set_speed(1023), 900);
        assert_eq!(loco.speed(), 900);
        assert_eq!(loco.set_speed(100), 100);
    }

    #[test]
    fn speed_presets() {
        let loco = sample();
        assert_eq!(loco.speed_for(SpeedClass::Travel), 650);
        assert_eq!(loco.speed_for(SpeedClass::Reduced), 380);
        assert_eq!(loco.speed_for(SpeedClass::Creeping), 120);
    }

    #[test]
    fn functions_out_of_range_are_ignored() {
        let loco = sample();
        loco.set_function(2, LocoFunctionState::On);
        assert_eq!(loco.function(2), LocoFunctionState::On);

        loco.set_function(200, LocoFunctionState::On);
        assert_eq!(loco.function(200), LocoFunctionState::Off);
    }

    #[test]
    fn auto_state_flags() {
        let loco = sample();
        loco.request_manual_mode();
        assert!(loco.manual_mode_requested());
        loco.clear_manual_request();
        assert!(!loco.manual_mode_requested());

        loco.auto_state().set_state(LocoState::Running);
        assert!(loco.is_in_auto_mode());
        assert!(loco.is_in_use());
    }

    #[test]
    fn update_refused_while_in_use() {
        let loco = sample();
        loco.auto_state().set_state(LocoState::Off);
        assert!(loco.update(LocoCore::default()).is_err());

        loco.auto_state().set_state(LocoState::Manual);
        assert!(loco.update(LocoCore::default()).is_ok());
    }

    #[test]
    fn serialize_deserialize_idempotent() {
        let loco = sample();
        loco.set_orientation(Orientation::Left);
        loco.set_function(0, LocoFunctionState::On);
        loco.set_function(5, LocoFunctionState::On);
        loco.set_speed(500);

        let first = loco.serialize();
        let restored = Loco::deserialize(&first).unwrap();
        assert_eq!(restored.serialize(), first);
        assert_eq!(restored.core(), loco.core());
        assert_eq!(restored.orientation(), Orientation::Left);
        assert_eq!(restored.function(5), LocoFunctionState::On);
        assert_eq!(restored.function(1), LocoFunctionState::Off);
        // Speed starts at standstill after a load.
        assert_eq!(restored.speed(), MIN_SPEED);
    }

    #[test]
    fn feedback_queue_is_per_loco_fifo() {
        let loco = sample();
        loco.feedbacks_reached().push(FeedbackId(1));
        loco.feedbacks_reached().push(FeedbackId(2));
        assert_eq!(
            loco.feedbacks_reached()
                .pop_timeout(std::time::Duration::from_millis(5)),
            Some(FeedbackId(1))
        );
    }
}
