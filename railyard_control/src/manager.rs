//! The process-wide registry and dispatcher.
//!
//! Owns every entity by id, translates commands from UI and automode
//! into state changes plus hardware commands, multiplexes hardware
//! events into the affected entities, and fans state changes out to
//! observers. There is no global layout lock: runtime state is
//! mutated under per-entity locks, and topological mutations refuse
//! entities that are not free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use railyard_common::datatypes::{
    AccessoryState, BoosterState, FeedbackPin, FeedbackState, HardwareHandle, LocoFunctionNr,
    LocoFunctionState, Orientation, SignalAspect, Speed, SwitchPosition,
};
use railyard_common::error::RailError;
use railyard_common::ids::{
    AccessoryId, ControlId, FeedbackId, LayerId, LocoId, ObjectIdentifier, ObjectType, RouteId,
    SignalId, SwitchId, TrackId,
};
use railyard_common::model::accessory::{Accessory, AccessoryCore};
use railyard_common::model::feedback::{Feedback, FeedbackCore};
use railyard_common::model::layer::Layer;
use railyard_common::model::loco::{Loco, LocoCore};
use railyard_common::model::relation::unpack_loco_function_relation_state;
use railyard_common::model::route::{Route, RouteCore};
use railyard_common::model::signal::{Signal, SignalCore};
use railyard_common::model::switch::{Switch, SwitchCore};
use railyard_common::model::track::{Track, TrackCore};
use railyard_common::model::{LayoutContext, LayoutPosition, LockableObject, TrackBase};
use railyard_common::serialize::valid_name;
use railyard_common::settings::Settings;

use railyard_hal::{ControlEventSink, RailDriver};

use crate::observer::LayoutObserver;

pub struct Manager {
    settings: RwLock<Settings>,
    booster: RwLock<BoosterState>,

    tracks: RwLock<HashMap<TrackId, Arc<Track>>>,
    signals: RwLock<HashMap<SignalId, Arc<Signal>>>,
    switches: RwLock<HashMap<SwitchId, Arc<Switch>>>,
    accessories: RwLock<HashMap<AccessoryId, Arc<Accessory>>>,
    feedbacks: RwLock<HashMap<FeedbackId, Arc<Feedback>>>,
    routes: RwLock<HashMap<RouteId, Arc<Route>>>,
    locos: RwLock<HashMap<LocoId, Arc<Loco>>>,
    layers: RwLock<HashMap<LayerId, Arc<Layer>>>,

    observers: RwLock<Vec<Arc<dyn LayoutObserver>>>,
    drivers: RwLock<HashMap<ControlId, Arc<dyn RailDriver>>>,
    storage: Mutex<Option<Box<dyn crate::storage::StorageHandler>>>,

    /// Serializes observer fan-out so a single observer sees
    /// notifications in commit order.
    notify_lock: Mutex<()>,

    /// Join handles of automode runner threads, keyed by locomotive.
    pub(crate) runners: Mutex<HashMap<LocoId, JoinHandle<()>>>,
}

impl Manager {
    pub fn new(settings: Settings) -> Self {
        let mut layers = HashMap::new();
        layers.insert(
            LayerId::DEFAULT,
            Arc::new(Layer::new(LayerId::DEFAULT, "Layer 1".to_string())),
        );
        Self {
            settings: RwLock::new(settings),
            booster: RwLock::new(BoosterState::Stop),
            tracks: RwLock::new(HashMap::new()),
            signals: RwLock::new(HashMap::new()),
            switches: RwLock::new(HashMap::new()),
            accessories: RwLock::new(HashMap::new()),
            feedbacks: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            locos: RwLock::new(HashMap::new()),
            layers: RwLock::new(layers),
            observers: RwLock::new(Vec::new()),
            drivers: RwLock::new(HashMap::new()),
            storage: Mutex::new(None),
            notify_lock: Mutex::new(()),
            runners: Mutex::new(HashMap::new()),
        }
    }

    // ── Registration ────────────────────────────────────────────────

    pub fn register_observer(&self, observer: Arc<dyn LayoutObserver>) {
        self.observers.write().expect("manager poisoned").push(observer);
    }

    pub fn register_driver(&self, driver: Arc<dyn RailDriver>) {
        let control = driver.control_id();
        info!(%control, name = driver.name(), "driver registered");
        self.drivers
            .write()
            .expect("manager poisoned")
            .insert(control, driver);
    }

    pub fn set_storage(&self, storage: Box<dyn crate::storage::StorageHandler>) {
        *self.storage.lock().expect("manager poisoned") = Some(storage);
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().expect("manager poisoned").clone()
    }

    pub fn update_settings(&self, settings: Settings) {
        *self.settings.write().expect("manager poisoned") = settings.clone();
        let mut storage = self.storage.lock().expect("manager poisoned");
        if let Some(storage) = storage.as_mut() {
            for (key, value) in settings.to_pairs() {
                if let Err(err) = storage.save_setting(&key, &value) {
                    error!(%err, "unable to persist setting");
                }
            }
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub fn track(&self, id: TrackId) -> Option<Arc<Track>> {
        self.tracks.read().expect("manager poisoned").get(&id).cloned()
    }

    pub fn signal(&self, id: SignalId) -> Option<Arc<Signal>> {
        self.signals.read().expect("manager poisoned").get(&id).cloned()
    }

    pub fn switch(&self, id: SwitchId) -> Option<Arc<Switch>> {
        self.switches.read().expect("manager poisoned").get(&id).cloned()
    }

    pub fn accessory(&self, id: AccessoryId) -> Option<Arc<Accessory>> {
        self.accessories
            .read()
            .expect("manager poisoned")
            .get(&id)
            .cloned()
    }

    pub fn feedback(&self, id: FeedbackId) -> Option<Arc<Feedback>> {
        self.feedbacks
            .read()
            .expect("manager poisoned")
            .get(&id)
            .cloned()
    }

    pub fn route(&self, id: RouteId) -> Option<Arc<Route>> {
        self.routes.read().expect("manager poisoned").get(&id).cloned()
    }

    pub fn loco(&self, id: LocoId) -> Option<Arc<Loco>> {
        self.locos.read().expect("manager poisoned").get(&id).cloned()
    }

    pub fn layer(&self, id: LayerId) -> Option<Arc<Layer>> {
        self.layers.read().expect("manager poisoned").get(&id).cloned()
    }

    pub fn locos(&self) -> Vec<Arc<Loco>> {
        let mut locos: Vec<_> = self
            .locos
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        locos.sort_by_key(|l| l.id());
        locos
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        let mut items: Vec<_> = self
            .tracks
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|t| t.id());
        items
    }

    pub fn signals(&self) -> Vec<Arc<Signal>> {
        let mut items: Vec<_> = self
            .signals
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|s| s.id());
        items
    }

    pub fn switches(&self) -> Vec<Arc<Switch>> {
        let mut items: Vec<_> = self
            .switches
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|s| s.id());
        items
    }

    pub fn accessories(&self) -> Vec<Arc<Accessory>> {
        let mut items: Vec<_> = self
            .accessories
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|a| a.id());
        items
    }

    pub fn feedbacks(&self) -> Vec<Arc<Feedback>> {
        let mut items: Vec<_> = self
            .feedbacks
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|f| f.id());
        items
    }

    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut items: Vec<_> = self
            .routes
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|r| r.id());
        items
    }

    pub fn layers(&self) -> Vec<Arc<Layer>> {
        let mut items: Vec<_> = self
            .layers
            .read()
            .expect("manager poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|l| l.id());
        items
    }

    // ── Load-time insertion (no validation, no persistence) ─────────

    pub(crate) fn restore_track(&self, track: Arc<Track>) {
        self.tracks
            .write()
            .expect("manager poisoned")
            .insert(track.id(), track);
    }

    pub(crate) fn restore_signal(&self, signal: Arc<Signal>) {
        self.signals
            .write()
            .expect("manager poisoned")
            .insert(signal.id(), signal);
    }

    pub(crate) fn restore_switch(&self, switch: Arc<Switch>) {
        self.switches
            .write()
            .expect("manager poisoned")
            .insert(switch.id(), switch);
    }

    pub(crate) fn restore_accessory(&self, accessory: Arc<Accessory>) {
        self.accessories
            .write()
            .expect("manager poisoned")
            .insert(accessory.id(), accessory);
    }

    pub(crate) fn restore_feedback(&self, feedback: Arc<Feedback>) {
        self.feedbacks
            .write()
            .expect("manager poisoned")
            .insert(feedback.id(), feedback);
    }

    pub(crate) fn restore_route(&self, route: Arc<Route>) {
        self.routes
            .write()
            .expect("manager poisoned")
            .insert(route.id(), route);
    }

    pub(crate) fn restore_loco(&self, loco: Arc<Loco>) {
        self.locos
            .write()
            .expect("manager poisoned")
            .insert(loco.id(), loco);
    }

    pub(crate) fn restore_layer(&self, layer: Arc<Layer>) {
        self.layers
            .write()
            .expect("manager poisoned")
            .insert(layer.id(), layer);
    }

    pub fn feedback_by_pin(&self, control: ControlId, pin: FeedbackPin) -> Option<Arc<Feedback>> {
        self.feedbacks
            .read()
            .expect("manager poisoned")
            .values()
            .find(|f| f.control_and_pin() == (control, pin))
            .cloned()
    }

    fn driver_for(&self, control: ControlId) -> Option<Arc<dyn RailDriver>> {
        self.drivers
            .read()
            .expect("manager poisoned")
            .get(&control)
            .cloned()
    }

    fn lockable_of(&self, id: ObjectIdentifier) -> Option<Arc<dyn LockableObject>> {
        match id.kind {
            ObjectType::Track => self
                .track(TrackId(id.id))
                .map(|t| t as Arc<dyn LockableObject>),
            ObjectType::Signal => self
                .signal(SignalId(id.id))
                .map(|s| s as Arc<dyn LockableObject>),
            ObjectType::Switch => self
                .switch(SwitchId(id.id))
                .map(|s| s as Arc<dyn LockableObject>),
            ObjectType::Accessory => self
                .accessory(AccessoryId(id.id))
                .map(|a| a as Arc<dyn LockableObject>),
            ObjectType::Route => self
                .route(RouteId(id.id))
                .map(|r| r as Arc<dyn LockableObject>),
            _ => None,
        }
    }

    // ── Booster ─────────────────────────────────────────────────────

    pub fn booster_state(&self) -> BoosterState {
        *self.booster.read().expect("manager poisoned")
    }

    /// Set the process-global booster state, fanning out to observers
    /// and to every driver except the originating one.
    pub fn booster(&self, state: BoosterState, origin: Option<ControlId>) {
        {
            let mut booster = self.booster.write().expect("manager poisoned");
            if *booster == state {
                return;
            }
            *booster = state;
        }
        info!(?state, "booster");
        for driver in self.drivers.read().expect("manager poisoned").values() {
            if Some(driver.control_id()) == origin {
                continue;
            }
            if let Err(err) = driver.booster(state) {
                error!(control = %driver.control_id(), %err, "booster command failed");
            }
        }
        self.notify(|o| o.booster_changed(state));
    }

    // ── Locomotive commands ─────────────────────────────────────────

    /// Command a locomotive speed; mirrored to every slave.
    pub fn loco_speed(&self, id: LocoId, speed: Speed) -> Result<(), RailError> {
        let loco = self
            .loco(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(id)))?;
        let speed = loco.set_speed(speed);
        self.send_loco_speed(&loco, speed);
        self.notify(|o| o.loco_speed_changed(id, speed));
        for slave_id in loco.slaves() {
            if let Some(slave) = self.loco(slave_id) {
                let slave_speed = slave.set_speed(speed);
                self.send_loco_speed(&slave, slave_speed);
                self.notify(|o| o.loco_speed_changed(slave_id, slave_speed));
            }
        }
        Ok(())
    }

    fn send_loco_speed(&self, loco: &Loco, speed: Speed) {
        let HardwareHandle {
            control,
            protocol,
            address,
        } = loco.handle();
        if let Some(driver) = self.driver_for(control) {
            if let Err(err) = driver.loco_speed(protocol, address, speed) {
                error!(loco = %loco.object_name(), %err, "speed command failed");
            }
        }
    }

    /// Command a locomotive orientation; mirrored to every slave.
    pub fn loco_orientation(&self, id: LocoId, orientation: Orientation) -> Result<(), RailError> {
        let loco = self
            .loco(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(id)))?;
        loco.set_orientation(orientation);
        self.send_loco_orientation(&loco, orientation);
        self.notify(|o| o.loco_orientation_changed(id, orientation));
        for slave_id in loco.slaves() {
            if let Some(slave) = self.loco(slave_id) {
                slave.set_orientation(orientation);
                self.send_loco_orientation(&slave, orientation);
                self.notify(|o| o.loco_orientation_changed(slave_id, orientation));
            }
        }
        Ok(())
    }

    fn send_loco_orientation(&self, loco: &Loco, orientation: Orientation) {
        let HardwareHandle {
            control,
            protocol,
            address,
        } = loco.handle();
        if let Some(driver) = self.driver_for(control) {
            if let Err(err) = driver.loco_orientation(protocol, address, orientation) {
                error!(loco = %loco.object_name(), %err, "orientation command failed");
            }
        }
    }

    /// Set a locomotive function slot; mirrored to every slave.
    pub fn loco_function(
        &self,
        id: LocoId,
        nr: LocoFunctionNr,
        state: LocoFunctionState,
    ) -> Result<(), RailError> {
        let loco = self
            .loco(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(id)))?;
        loco.set_function(nr, state);
        self.send_loco_function(&loco, nr, state);
        self.notify(|o| o.loco_function_changed(id, nr, state));
        for slave_id in loco.slaves() {
            if let Some(slave) = self.loco(slave_id) {
                slave.set_function(nr, state);
                self.send_loco_function(&slave, nr, state);
                self.notify(|o| o.loco_function_changed(slave_id, nr, state));
            }
        }
        Ok(())
    }

    fn send_loco_function(&self, loco: &Loco, nr: LocoFunctionNr, state: LocoFunctionState) {
        let HardwareHandle {
            control,
            protocol,
            address,
        } = loco.handle();
        if let Some(driver) = self.driver_for(control) {
            if let Err(err) = driver.loco_function(protocol, address, nr, state) {
                error!(loco = %loco.object_name(), %err, "function command failed");
            }
        }
    }

    // ── Accessory family commands ───────────────────────────────────

    /// Drive an accessory output: the on-edge now, the off-edge after
    /// the item's pulse duration on a detached timer thread.
    fn pulse_accessory(&self, handle: HardwareHandle, state_code: u8, duration_ms: u64) {
        let Some(driver) = self.driver_for(handle.control) else {
            debug!(control = %handle.control, "no driver for accessory command");
            return;
        };
        if let Err(err) = driver.accessory(handle.protocol, handle.address, state_code, true) {
            error!(%err, "accessory command failed");
            return;
        }
        let off_driver = Arc::clone(&driver);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(duration_ms));
            if let Err(err) =
                off_driver.accessory(handle.protocol, handle.address, state_code, false)
            {
                error!(%err, "accessory off-edge failed");
            }
        });
    }

    fn effective_duration(&self, duration: u16) -> u64 {
        if duration > 0 {
            u64::from(duration)
        } else {
            u64::from(self.settings().accessory_pulse_ms)
        }
    }

    pub fn accessory_state(&self, id: AccessoryId, state: AccessoryState) -> Result<(), RailError> {
        let accessory = self
            .accessory(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::accessory(id)))?;
        accessory.set_state(state);
        let duration = self.effective_duration(accessory.duration());
        self.pulse_accessory(accessory.handle(), state.to_code(), duration);
        self.notify(|o| o.accessory_changed(id, state));
        Ok(())
    }

    pub fn switch_state(&self, id: SwitchId, state: SwitchPosition) -> Result<(), RailError> {
        let switch = self
            .switch(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::switch(id)))?;
        switch.set_state(state);
        let duration = self.effective_duration(switch.duration());
        self.pulse_accessory(switch.handle(), state.to_code(), duration);
        self.notify(|o| o.switch_changed(id, state));
        Ok(())
    }

    pub fn signal_state(&self, id: SignalId, aspect: SignalAspect) -> Result<(), RailError> {
        let signal = self
            .signal(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::signal(id)))?;
        signal.set_aspect(aspect);
        let duration = self.effective_duration(signal.duration());
        self.pulse_accessory(signal.handle(), aspect.to_code(), duration);
        self.notify(|o| o.signal_changed(id, aspect));
        Ok(())
    }

    /// Manually trigger a route's at-lock relations.
    pub fn route_execute(&self, id: RouteId) -> Result<(), RailError> {
        let route = self
            .route(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::route(id)))?;
        route.execute(self)?;
        self.notify(|o| o.route_executed(id));
        Ok(())
    }

    // ── Track commands ──────────────────────────────────────────────

    /// Place a locomotive on a track-base: reserve and hard-lock it
    /// and record it as the locomotive's tail.
    pub fn track_set_loco(&self, track: ObjectIdentifier, loco_id: LocoId) -> Result<(), RailError> {
        let base = self
            .track_base(track)
            .ok_or(RailError::UnknownObject(track))?;
        let loco = self
            .loco(loco_id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(loco_id)))?;
        if base.is_blocked() {
            return Err(RailError::ConfigInvalid(format!(
                "track {} is blocked",
                base.object_name()
            )));
        }
        let mut auto = loco.auto_state();
        if auto.state().is_auto() || auto.track_from.is_some() {
            return Err(RailError::ConfigInvalid(format!(
                "loco {} is already placed",
                loco.object_name()
            )));
        }
        base.lockable().reserve(loco_id)?;
        if let Err(err) = base.lockable().lock(loco_id) {
            base.lockable().release_force();
            return Err(err);
        }
        auto.track_from = Some(Arc::clone(&base));
        drop(auto);
        info!(loco = %loco.object_name(), track = %base.object_name(), "loco placed");
        self.notify(|o| o.track_changed(track));
        Ok(())
    }

    pub fn track_set_block(&self, track: ObjectIdentifier, blocked: bool) -> Result<(), RailError> {
        let base = self
            .track_base(track)
            .ok_or(RailError::UnknownObject(track))?;
        base.set_blocked(blocked);
        self.notify(|o| o.track_changed(track));
        Ok(())
    }

    /// Turn the travel orientation stored on a free track-base.
    pub fn track_orientation(
        &self,
        track: ObjectIdentifier,
        orientation: Orientation,
    ) -> Result<(), RailError> {
        let base = self
            .track_base(track)
            .ok_or(RailError::UnknownObject(track))?;
        if let Some(owner) = base.lockable().owner() {
            return Err(RailError::ReservationDenied { owner });
        }
        base.set_orientation(orientation);
        self.notify(|o| o.track_changed(track));
        Ok(())
    }

    pub fn loco_manual_mode(&self, id: LocoId) -> Result<(), RailError> {
        let loco = self
            .loco(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(id)))?;
        loco.request_manual_mode();
        Ok(())
    }

    // ── Hardware event fan-in ───────────────────────────────────────

    /// Canonical feedback event entry, also used by the drivers'
    /// receiver threads through [`ControlEventSink`].
    pub fn feedback_state(&self, control: ControlId, pin: FeedbackPin, raw: FeedbackState) {
        let feedback = match self.feedback_by_pin(control, pin) {
            Some(feedback) => feedback,
            None => {
                if !self.settings().auto_add_feedback {
                    debug!(%control, pin, "report from unknown feedback ignored");
                    return;
                }
                match self.auto_add_feedback(control, pin) {
                    Ok(feedback) => feedback,
                    Err(err) => {
                        error!(%control, pin, %err, "unable to auto-add feedback");
                        return;
                    }
                }
            }
        };
        let effective = feedback.set_raw_state(raw);
        let id = feedback.id();
        debug!(%control, pin, ?effective, "feedback");
        self.notify(|o| o.feedback_changed(id, effective));

        if effective != FeedbackState::Occupied {
            return;
        }
        let Some(track_id) = feedback.related_track() else {
            return;
        };
        let Some(base) = self.track_base(track_id) else {
            return;
        };
        match base.lockable().owner() {
            Some(owner) => {
                if let Some(loco) = self.loco(owner) {
                    if loco.is_in_auto_mode() {
                        loco.feedbacks_reached().push(id);
                    }
                }
            }
            None => {
                if self.settings().stop_on_feedback_in_free_track {
                    warn!(
                        track = %base.object_name(),
                        "occupied feedback on a free track, stopping booster"
                    );
                    self.booster(BoosterState::Stop, None);
                }
            }
        }
    }

    fn auto_add_feedback(
        &self,
        control: ControlId,
        pin: FeedbackPin,
    ) -> Result<Arc<Feedback>, RailError> {
        let core = FeedbackCore {
            name: format!("Feedback {control}/{pin}"),
            position: LayoutPosition {
                x: pin,
                y: 0,
                layer: LayerId::feedback_grid_of(control),
                rotation: railyard_common::model::Rotation::Deg0,
            },
            visible: false,
            control,
            pin,
            inverted: false,
            track: None,
        };
        let id = self.feedback_save(None, core)?;
        info!(%control, pin, %id, "feedback auto-added");
        self.feedback(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::feedback(id)))
    }

    // ── Observer fan-out ────────────────────────────────────────────

    fn notify(&self, f: impl Fn(&dyn LayoutObserver)) {
        let observers = self.observers.read().expect("manager poisoned").clone();
        let _ordered = self.notify_lock.lock().expect("manager poisoned");
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    pub(crate) fn notify_track_changed(&self, track: ObjectIdentifier) {
        self.notify(|o| o.track_changed(track));
    }

    pub(crate) fn notify_route_released(&self, route: RouteId) {
        self.notify(|o| o.route_released(route));
    }

    pub(crate) fn notify_route_executed(&self, route: RouteId) {
        self.notify(|o| o.route_executed(route));
    }

    pub(crate) fn notify_loco_released(&self, loco: LocoId) {
        self.notify(|o| o.loco_released(loco));
    }

    // ── CRUD: validation helpers ────────────────────────────────────

    fn check_name(name: &str) -> Result<(), RailError> {
        if valid_name(name) {
            Ok(())
        } else {
            Err(RailError::ConfigInvalid(format!("invalid name '{name}'")))
        }
    }

    /// Visible items may not share a (layer, x, y) cell.
    fn check_position(
        &self,
        position: &LayoutPosition,
        visible: bool,
        exclude: ObjectIdentifier,
    ) -> Result<(), RailError> {
        if !visible {
            return Ok(());
        }
        let conflict = |other: &LayoutPosition, other_visible: bool| {
            other_visible
                && other.layer == position.layer
                && other.x == position.x
                && other.y == position.y
        };
        let occupied = self
            .tracks
            .read()
            .expect("manager poisoned")
            .values()
            .filter(|t| t.identifier() != exclude)
            .any(|t| {
                let core = t.core();
                conflict(&core.position, core.visible)
            })
            || self
                .signals
                .read()
                .expect("manager poisoned")
                .values()
                .filter(|s| s.identifier() != exclude)
                .any(|s| {
                    let core = s.core();
                    conflict(&core.position, core.visible)
                })
            || self
                .switches
                .read()
                .expect("manager poisoned")
                .values()
                .filter(|s| s.identifier() != exclude)
                .any(|s| {
                    let core = s.core();
                    conflict(&core.position, core.visible)
                })
            || self
                .accessories
                .read()
                .expect("manager poisoned")
                .values()
                .filter(|a| a.identifier() != exclude)
                .any(|a| {
                    let core = a.core();
                    conflict(&core.position, core.visible)
                })
            || self
                .feedbacks
                .read()
                .expect("manager poisoned")
                .values()
                .filter(|f| ObjectIdentifier::feedback(f.id()) != exclude)
                .any(|f| {
                    let core = f.core();
                    conflict(&core.position, core.visible)
                });
        if occupied {
            return Err(RailError::ConfigInvalid(format!(
                "position {position} is already occupied"
            )));
        }
        Ok(())
    }

    fn next_id<K: Copy + Ord + std::hash::Hash, V>(map: &HashMap<K, V>, mk: impl Fn(u16) -> K) -> K {
        let mut id = 1u16;
        while map.contains_key(&mk(id)) {
            id += 1;
        }
        mk(id)
    }

    fn persist(&self, kind: ObjectType, id: u16, name: &str, serialized: &str) {
        let mut storage = self.storage.lock().expect("manager poisoned");
        if let Some(storage) = storage.as_mut() {
            if let Err(err) = storage.save_object(kind, id, name, serialized) {
                error!(%kind, id, %err, "unable to persist object");
            }
        }
    }

    fn unpersist(&self, kind: ObjectType, id: u16) {
        let mut storage = self.storage.lock().expect("manager poisoned");
        if let Some(storage) = storage.as_mut() {
            if let Err(err) = storage.delete_object(kind, id) {
                error!(%kind, id, %err, "unable to delete persisted object");
            }
        }
    }

    // ── CRUD: tracks ────────────────────────────────────────────────

    pub fn track_save(&self, id: Option<TrackId>, core: TrackCore) -> Result<TrackId, RailError> {
        Self::check_name(&core.name)?;
        let exclude = id
            .map(ObjectIdentifier::track)
            .unwrap_or(ObjectIdentifier::new(ObjectType::Track, 0));
        self.check_position(&core.position, core.visible, exclude)?;
        let feedbacks = core.base.feedbacks.clone();
        for feedback in &feedbacks {
            if self.feedback(*feedback).is_none() {
                return Err(RailError::UnknownObject(ObjectIdentifier::feedback(
                    *feedback,
                )));
            }
        }

        let track = match id {
            Some(id) => {
                let track = self
                    .track(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::track(id)))?;
                track.update(core)?;
                track
            }
            None => {
                let mut tracks = self.tracks.write().expect("manager poisoned");
                let id = Self::next_id(&tracks, TrackId);
                let track = Arc::new(Track::new(id, core));
                tracks.insert(id, Arc::clone(&track));
                track
            }
        };
        self.sync_feedback_backrefs(track.identifier(), &feedbacks);
        self.persist(
            ObjectType::Track,
            track.id().0,
            &track.object_name(),
            &track.serialize(),
        );
        self.notify(|o| o.object_saved(track.identifier()));
        Ok(track.id())
    }

    /// Point the given feedbacks at their track-base and orphan the
    /// ones no longer listed.
    fn sync_feedback_backrefs(&self, owner: ObjectIdentifier, feedbacks: &[FeedbackId]) {
        for feedback in self.feedbacks.read().expect("manager poisoned").values() {
            let listed = feedbacks.contains(&feedback.id());
            match feedback.related_track() {
                Some(track) if track == owner && !listed => feedback.set_related_track(None),
                _ if listed => feedback.set_related_track(Some(owner)),
                _ => {}
            }
        }
    }

    pub fn track_delete(&self, id: TrackId) -> Result<(), RailError> {
        let track = self
            .track(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::track(id)))?;
        if track.lockable().is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "track {} is in use",
                track.object_name()
            )));
        }
        let identifier = track.identifier();
        if self.track_base_referenced(identifier) {
            return Err(RailError::ConfigInvalid(format!(
                "track {} is referenced by a route",
                track.object_name()
            )));
        }
        self.tracks.write().expect("manager poisoned").remove(&id);
        self.sync_feedback_backrefs(identifier, &[]);
        self.unpersist(ObjectType::Track, id.0);
        self.notify(|o| o.object_deleted(identifier));
        Ok(())
    }

    fn track_base_referenced(&self, id: ObjectIdentifier) -> bool {
        self.routes
            .read()
            .expect("manager poisoned")
            .values()
            .any(|route| {
                let core = route.core();
                core.from_track == Some(id) || core.to_track == Some(id)
            })
    }

    // ── CRUD: signals ───────────────────────────────────────────────

    pub fn signal_save(&self, id: Option<SignalId>, core: SignalCore) -> Result<SignalId, RailError> {
        Self::check_name(&core.name)?;
        let exclude = id
            .map(ObjectIdentifier::signal)
            .unwrap_or(ObjectIdentifier::new(ObjectType::Signal, 0));
        self.check_position(&core.position, core.visible, exclude)?;
        let feedbacks = core.base.feedbacks.clone();

        let signal = match id {
            Some(id) => {
                let signal = self
                    .signal(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::signal(id)))?;
                signal.update(core)?;
                signal
            }
            None => {
                let mut signals = self.signals.write().expect("manager poisoned");
                let id = Self::next_id(&signals, SignalId);
                let signal = Arc::new(Signal::new(id, core));
                signals.insert(id, Arc::clone(&signal));
                signal
            }
        };
        self.sync_feedback_backrefs(signal.identifier(), &feedbacks);
        self.persist(
            ObjectType::Signal,
            signal.id().0,
            &signal.object_name(),
            &signal.serialize(),
        );
        self.notify(|o| o.object_saved(signal.identifier()));
        Ok(signal.id())
    }

    pub fn signal_delete(&self, id: SignalId) -> Result<(), RailError> {
        let signal = self
            .signal(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::signal(id)))?;
        if signal.lockable().is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "signal {} is in use",
                signal.object_name()
            )));
        }
        let identifier = signal.identifier();
        if self.track_base_referenced(identifier) || self.relation_referenced(identifier) {
            return Err(RailError::ConfigInvalid(format!(
                "signal {} is referenced by a route",
                signal.object_name()
            )));
        }
        self.signals.write().expect("manager poisoned").remove(&id);
        self.sync_feedback_backrefs(identifier, &[]);
        self.unpersist(ObjectType::Signal, id.0);
        self.notify(|o| o.object_deleted(identifier));
        Ok(())
    }

    fn relation_referenced(&self, id: ObjectIdentifier) -> bool {
        self.routes
            .read()
            .expect("manager poisoned")
            .values()
            .any(|route| {
                route
                    .relations_at_lock()
                    .iter()
                    .chain(route.relations_at_unlock().iter())
                    .any(|relation| relation.target == id)
            })
    }

    // ── CRUD: switches ──────────────────────────────────────────────

    pub fn switch_save(&self, id: Option<SwitchId>, core: SwitchCore) -> Result<SwitchId, RailError> {
        Self::check_name(&core.name)?;
        let exclude = id
            .map(ObjectIdentifier::switch)
            .unwrap_or(ObjectIdentifier::new(ObjectType::Switch, 0));
        self.check_position(&core.position, core.visible, exclude)?;

        let switch = match id {
            Some(id) => {
                let switch = self
                    .switch(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::switch(id)))?;
                switch.update(core)?;
                switch
            }
            None => {
                let mut switches = self.switches.write().expect("manager poisoned");
                let id = Self::next_id(&switches, SwitchId);
                let switch = Arc::new(Switch::new(id, core));
                switches.insert(id, Arc::clone(&switch));
                switch
            }
        };
        self.persist(
            ObjectType::Switch,
            switch.id().0,
            &switch.object_name(),
            &switch.serialize(),
        );
        self.notify(|o| o.object_saved(switch.identifier()));
        Ok(switch.id())
    }

    pub fn switch_delete(&self, id: SwitchId) -> Result<(), RailError> {
        let switch = self
            .switch(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::switch(id)))?;
        if switch.lockable().is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "switch {} is in use",
                switch.object_name()
            )));
        }
        let identifier = switch.identifier();
        if self.relation_referenced(identifier) {
            return Err(RailError::ConfigInvalid(format!(
                "switch {} is referenced by a route",
                switch.object_name()
            )));
        }
        self.switches.write().expect("manager poisoned").remove(&id);
        self.unpersist(ObjectType::Switch, id.0);
        self.notify(|o| o.object_deleted(identifier));
        Ok(())
    }

    // ── CRUD: accessories ───────────────────────────────────────────

    pub fn accessory_save(
        &self,
        id: Option<AccessoryId>,
        core: AccessoryCore,
    ) -> Result<AccessoryId, RailError> {
        Self::check_name(&core.name)?;
        let exclude = id
            .map(ObjectIdentifier::accessory)
            .unwrap_or(ObjectIdentifier::new(ObjectType::Accessory, 0));
        self.check_position(&core.position, core.visible, exclude)?;

        let accessory = match id {
            Some(id) => {
                let accessory = self
                    .accessory(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::accessory(id)))?;
                accessory.update(core)?;
                accessory
            }
            None => {
                let mut accessories = self.accessories.write().expect("manager poisoned");
                let id = Self::next_id(&accessories, AccessoryId);
                let accessory = Arc::new(Accessory::new(id, core));
                accessories.insert(id, Arc::clone(&accessory));
                accessory
            }
        };
        self.persist(
            ObjectType::Accessory,
            accessory.id().0,
            &accessory.object_name(),
            &accessory.serialize(),
        );
        self.notify(|o| o.object_saved(accessory.identifier()));
        Ok(accessory.id())
    }

    pub fn accessory_delete(&self, id: AccessoryId) -> Result<(), RailError> {
        let accessory = self
            .accessory(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::accessory(id)))?;
        if accessory.lockable().is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "accessory {} is in use",
                accessory.object_name()
            )));
        }
        let identifier = accessory.identifier();
        if self.relation_referenced(identifier) {
            return Err(RailError::ConfigInvalid(format!(
                "accessory {} is referenced by a route",
                accessory.object_name()
            )));
        }
        self.accessories
            .write()
            .expect("manager poisoned")
            .remove(&id);
        self.unpersist(ObjectType::Accessory, id.0);
        self.notify(|o| o.object_deleted(identifier));
        Ok(())
    }

    // ── CRUD: feedbacks ─────────────────────────────────────────────

    pub fn feedback_save(
        &self,
        id: Option<FeedbackId>,
        core: FeedbackCore,
    ) -> Result<FeedbackId, RailError> {
        Self::check_name(&core.name)?;
        let exclude = id
            .map(ObjectIdentifier::feedback)
            .unwrap_or(ObjectIdentifier::new(ObjectType::Feedback, 0));
        self.check_position(&core.position, core.visible, exclude)?;
        // Pin unique per control.
        if let Some(existing) = self.feedback_by_pin(core.control, core.pin) {
            if Some(existing.id()) != id {
                return Err(RailError::ConfigInvalid(format!(
                    "pin {} is already used on control {}",
                    core.pin, core.control
                )));
            }
        }

        let feedback = match id {
            Some(id) => {
                let feedback = self
                    .feedback(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::feedback(id)))?;
                feedback.update(core);
                feedback
            }
            None => {
                let mut feedbacks = self.feedbacks.write().expect("manager poisoned");
                let id = Self::next_id(&feedbacks, FeedbackId);
                let feedback = Arc::new(Feedback::new(id, core));
                feedbacks.insert(id, Arc::clone(&feedback));
                feedback
            }
        };
        self.persist(
            ObjectType::Feedback,
            feedback.id().0,
            &feedback.object_name(),
            &feedback.serialize(),
        );
        self.notify(|o| o.object_saved(ObjectIdentifier::feedback(feedback.id())));
        Ok(feedback.id())
    }

    pub fn feedback_delete(&self, id: FeedbackId) -> Result<(), RailError> {
        let feedback = self
            .feedback(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::feedback(id)))?;
        let referenced = self
            .routes
            .read()
            .expect("manager poisoned")
            .values()
            .any(|route| {
                let core = route.core();
                [
                    core.feedback_reduced,
                    core.feedback_creep,
                    core.feedback_stop,
                    core.feedback_over,
                ]
                .contains(&Some(id))
            })
            || feedback.related_track().is_some();
        if referenced {
            return Err(RailError::ConfigInvalid(format!(
                "feedback {} is referenced",
                feedback.object_name()
            )));
        }
        self.feedbacks.write().expect("manager poisoned").remove(&id);
        self.unpersist(ObjectType::Feedback, id.0);
        self.notify(|o| o.object_deleted(ObjectIdentifier::feedback(id)));
        Ok(())
    }

    // ── CRUD: routes ────────────────────────────────────────────────

    pub fn route_save(&self, id: Option<RouteId>, core: RouteCore) -> Result<RouteId, RailError> {
        Self::check_name(&core.name)?;
        if core.automode {
            let from = core.from_track.ok_or_else(|| {
                RailError::ConfigInvalid("automode route needs an origin".to_string())
            })?;
            let to = core.to_track.ok_or_else(|| {
                RailError::ConfigInvalid("automode route needs a destination".to_string())
            })?;
            if self.track_base(from).is_none() {
                return Err(RailError::UnknownObject(from));
            }
            if self.track_base(to).is_none() {
                return Err(RailError::UnknownObject(to));
            }
            let stop = core.feedback_stop.ok_or_else(|| {
                RailError::ConfigInvalid("automode route needs a stop feedback".to_string())
            })?;
            if self.feedback(stop).is_none() {
                return Err(RailError::UnknownObject(ObjectIdentifier::feedback(stop)));
            }
        }
        for relation in core.at_lock.iter().chain(core.at_unlock.iter()) {
            if let Some(this) = id {
                if relation.target == ObjectIdentifier::route(this) {
                    return Err(RailError::ConfigInvalid(
                        "route relation may not target its own route".to_string(),
                    ));
                }
            }
            let exists = match relation.target.kind {
                ObjectType::Loco => self.loco(LocoId(relation.target.id)).is_some(),
                ObjectType::Track | ObjectType::Signal => {
                    self.track_base(relation.target).is_some()
                }
                _ => self.lockable_of(relation.target).is_some(),
            };
            if !exists {
                return Err(RailError::UnknownObject(relation.target));
            }
        }

        let old_from = id.and_then(|id| self.route(id)).and_then(|r| r.from_track());
        let new_from = core.from_track;

        let route = match id {
            Some(id) => {
                let route = self
                    .route(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::route(id)))?;
                route.update(core)?;
                route
            }
            None => {
                let mut routes = self.routes.write().expect("manager poisoned");
                let id = Self::next_id(&routes, RouteId);
                let route = Arc::new(Route::new(id, core));
                routes.insert(id, Arc::clone(&route));
                route
            }
        };

        // Maintain the derived outgoing-route index.
        if old_from != new_from {
            if let Some(old) = old_from.and_then(|id| self.track_base(id)) {
                old.remove_route_from(route.id());
            }
        }
        if let Some(new) = new_from.and_then(|id| self.track_base(id)) {
            new.add_route_from(route.id());
        }

        self.persist(
            ObjectType::Route,
            route.id().0,
            &route.object_name(),
            &route.serialize(),
        );
        self.persist_route_relations(&route);
        self.notify(|o| o.object_saved(route.identifier()));
        Ok(route.id())
    }

    fn persist_route_relations(&self, route: &Route) {
        let mut storage = self.storage.lock().expect("manager poisoned");
        if let Some(storage) = storage.as_mut() {
            let at_lock: Vec<String> = route
                .relations_at_lock()
                .iter()
                .map(|r| r.serialize())
                .collect();
            let at_unlock: Vec<String> = route
                .relations_at_unlock()
                .iter()
                .map(|r| r.serialize())
                .collect();
            if let Err(err) = storage.save_relations(
                route.identifier(),
                crate::storage::RelationSlot::AtLock,
                &at_lock,
            ) {
                error!(%err, "unable to persist at-lock relations");
            }
            if let Err(err) = storage.save_relations(
                route.identifier(),
                crate::storage::RelationSlot::AtUnlock,
                &at_unlock,
            ) {
                error!(%err, "unable to persist at-unlock relations");
            }
        }
    }

    pub fn route_delete(&self, id: RouteId) -> Result<(), RailError> {
        let route = self
            .route(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::route(id)))?;
        if route.lockable().is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "route {} is in use",
                route.object_name()
            )));
        }
        let identifier = route.identifier();
        if self.relation_referenced(identifier) {
            return Err(RailError::ConfigInvalid(format!(
                "route {} is referenced by another route",
                route.object_name()
            )));
        }
        if let Some(from) = route.from_track().and_then(|id| self.track_base(id)) {
            from.remove_route_from(id);
        }
        self.routes.write().expect("manager poisoned").remove(&id);
        self.unpersist(ObjectType::Route, id.0);
        self.notify(|o| o.object_deleted(identifier));
        Ok(())
    }

    // ── CRUD: locos ─────────────────────────────────────────────────

    pub fn loco_save(&self, id: Option<LocoId>, core: LocoCore) -> Result<LocoId, RailError> {
        Self::check_name(&core.name)?;
        // Address unique per control and protocol.
        let duplicate = self
            .locos
            .read()
            .expect("manager poisoned")
            .values()
            .filter(|l| Some(l.id()) != id)
            .any(|l| l.handle() == core.handle);
        if duplicate {
            return Err(RailError::ConfigInvalid(format!(
                "address {} is already used on control {}",
                core.handle.address, core.handle.control
            )));
        }
        for slave in &core.slaves {
            if self.loco(*slave).is_none() {
                return Err(RailError::UnknownObject(ObjectIdentifier::loco(*slave)));
            }
            if Some(*slave) == id {
                return Err(RailError::ConfigInvalid(
                    "loco may not be its own slave".to_string(),
                ));
            }
        }

        let loco = match id {
            Some(id) => {
                let loco = self
                    .loco(id)
                    .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(id)))?;
                loco.update(core)?;
                loco
            }
            None => {
                let mut locos = self.locos.write().expect("manager poisoned");
                let id = Self::next_id(&locos, LocoId);
                let loco = Arc::new(Loco::new(id, core));
                locos.insert(id, Arc::clone(&loco));
                loco
            }
        };
        self.persist(
            ObjectType::Loco,
            loco.id().0,
            &loco.object_name(),
            &loco.serialize(),
        );
        self.notify(|o| o.object_saved(ObjectIdentifier::loco(loco.id())));
        Ok(loco.id())
    }

    pub fn loco_delete(&self, id: LocoId) -> Result<(), RailError> {
        let loco = self
            .loco(id)
            .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(id)))?;
        if loco.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "loco {} is in use",
                loco.object_name()
            )));
        }
        let is_slave = self
            .locos
            .read()
            .expect("manager poisoned")
            .values()
            .any(|l| l.slaves().contains(&id));
        if is_slave {
            return Err(RailError::ConfigInvalid(format!(
                "loco {} is a slave of another loco",
                loco.object_name()
            )));
        }
        self.locos.write().expect("manager poisoned").remove(&id);
        self.unpersist(ObjectType::Loco, id.0);
        self.notify(|o| o.object_deleted(ObjectIdentifier::loco(id)));
        Ok(())
    }

    // ── CRUD: layers ────────────────────────────────────────────────

    pub fn layer_save(&self, id: Option<LayerId>, name: String) -> Result<LayerId, RailError> {
        Self::check_name(&name)?;
        let layer = match id {
            Some(id) => {
                let layer = self.layer(id).ok_or(RailError::ConfigInvalid(format!(
                    "unknown layer {id}"
                )))?;
                layer.set_name(name);
                layer
            }
            None => {
                let mut layers = self.layers.write().expect("manager poisoned");
                let mut id = 2i16;
                while layers.contains_key(&LayerId(id)) {
                    id += 1;
                }
                let layer = Arc::new(Layer::new(LayerId(id), name));
                layers.insert(layer.id(), Arc::clone(&layer));
                layer
            }
        };
        self.persist(
            ObjectType::Layer,
            layer.id().0 as u16,
            &layer.name(),
            &layer.serialize(),
        );
        Ok(layer.id())
    }

    pub fn layer_delete(&self, id: LayerId) -> Result<(), RailError> {
        if id == LayerId::DEFAULT {
            return Err(RailError::ConfigInvalid(
                "layer 1 cannot be deleted".to_string(),
            ));
        }
        let in_use = self
            .tracks
            .read()
            .expect("manager poisoned")
            .values()
            .any(|t| t.core().position.layer == id);
        if in_use {
            return Err(RailError::ConfigInvalid(format!("layer {id} is not empty")));
        }
        self.layers
            .write()
            .expect("manager poisoned")
            .remove(&id)
            .ok_or(RailError::ConfigInvalid(format!("unknown layer {id}")))?;
        self.unpersist(ObjectType::Layer, id.0 as u16);
        Ok(())
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Write every entity, the settings and the relation tuples to
    /// the attached store.
    pub fn persist_all(&self) {
        let mut storage = self.storage.lock().expect("manager poisoned");
        if let Some(storage) = storage.as_mut() {
            if let Err(err) = crate::storage::save_layout(self, storage.as_mut()) {
                error!(%err, "unable to persist layout");
            }
        }
    }

    /// Stop every automode runner, switch the booster off, shut down
    /// every driver and flush the store. Runners observe their flag
    /// within a tick.
    pub fn shutdown(&self) {
        info!("shutting down");
        for loco in self.locos() {
            loco.request_terminate();
        }
        let handles: Vec<_> = {
            let mut runners = self.runners.lock().expect("manager poisoned");
            runners.drain().collect()
        };
        for (loco, handle) in handles {
            if handle.join().is_err() {
                error!(%loco, "automode runner panicked");
            }
        }
        self.booster(BoosterState::Stop, None);
        for driver in self.drivers.read().expect("manager poisoned").values() {
            if let Err(err) = driver.shutdown() {
                error!(control = %driver.control_id(), %err, "driver shutdown failed");
            }
        }
        self.persist_all();
    }
}

// ─── LayoutContext ──────────────────────────────────────────────────

impl LayoutContext for Manager {
    fn booster(&self) -> BoosterState {
        self.booster_state()
    }

    fn track_base(&self, id: ObjectIdentifier) -> Option<Arc<dyn TrackBase>> {
        match id.kind {
            ObjectType::Track => self.track(TrackId(id.id)).map(|t| t as Arc<dyn TrackBase>),
            ObjectType::Signal => self.signal(SignalId(id.id)).map(|s| s as Arc<dyn TrackBase>),
            _ => None,
        }
    }

    fn reserve_object(&self, id: ObjectIdentifier, loco: LocoId) -> Result<(), RailError> {
        match id.kind {
            ObjectType::Loco => Ok(()),
            ObjectType::Route => {
                let route = self.route(RouteId(id.id)).ok_or(RailError::UnknownObject(id))?;
                route.reserve(self, loco)
            }
            _ => self
                .lockable_of(id)
                .ok_or(RailError::UnknownObject(id))?
                .lockable()
                .reserve(loco),
        }
    }

    fn lock_object(&self, id: ObjectIdentifier, loco: LocoId) -> Result<(), RailError> {
        match id.kind {
            ObjectType::Loco => Ok(()),
            ObjectType::Route => {
                let route = self.route(RouteId(id.id)).ok_or(RailError::UnknownObject(id))?;
                route.lock(self, loco)
            }
            _ => self
                .lockable_of(id)
                .ok_or(RailError::UnknownObject(id))?
                .lockable()
                .lock(loco),
        }
    }

    fn release_object(&self, id: ObjectIdentifier, loco: LocoId) -> Result<(), RailError> {
        match id.kind {
            ObjectType::Loco => Ok(()),
            ObjectType::Route => {
                let route = self.route(RouteId(id.id)).ok_or(RailError::UnknownObject(id))?;
                route.release(self, loco);
                Ok(())
            }
            ObjectType::Signal => {
                let signal = self
                    .signal(SignalId(id.id))
                    .ok_or(RailError::UnknownObject(id))?;
                signal.lockable().release(loco)?;
                // A freed signal falls back to stop.
                if let Err(err) = self.signal_state(signal.id(), SignalAspect::Stop) {
                    debug!(signal = %signal.object_name(), %err, "unable to reset signal");
                }
                Ok(())
            }
            _ => self
                .lockable_of(id)
                .ok_or(RailError::UnknownObject(id))?
                .lockable()
                .release(loco),
        }
    }

    fn apply_relation_state(&self, id: ObjectIdentifier, state: u8) -> Result<(), RailError> {
        match id.kind {
            ObjectType::Switch => self.switch_state(SwitchId(id.id), SwitchPosition::from_code(state)),
            ObjectType::Signal => self.signal_state(SignalId(id.id), SignalAspect::from_code(state)),
            ObjectType::Accessory => {
                self.accessory_state(AccessoryId(id.id), AccessoryState::from_code(state))
            }
            ObjectType::Track => {
                let base = self.track_base(id).ok_or(RailError::UnknownObject(id))?;
                base.set_orientation(Orientation::from_code(state));
                self.notify(|o| o.track_changed(id));
                Ok(())
            }
            ObjectType::Route => {
                let route = self.route(RouteId(id.id)).ok_or(RailError::UnknownObject(id))?;
                route.execute(self)?;
                self.notify(|o| o.route_executed(RouteId(id.id)));
                Ok(())
            }
            ObjectType::Loco => {
                let (nr, on) = unpack_loco_function_relation_state(state);
                let state = if on {
                    LocoFunctionState::On
                } else {
                    LocoFunctionState::Off
                };
                self.loco_function(LocoId(id.id), nr, state)
            }
            _ => Err(RailError::ConfigInvalid(format!(
                "{id} cannot be a relation target"
            ))),
        }
    }
}

// ─── ControlEventSink ───────────────────────────────────────────────

impl ControlEventSink for Manager {
    fn booster_event(&self, control: ControlId, state: BoosterState) {
        self.booster(state, Some(control));
    }

    fn feedback_event(&self, control: ControlId, pin: FeedbackPin, state: FeedbackState) {
        self.feedback_state(control, pin, state);
    }

    fn loco_speed_event(
        &self,
        _control: ControlId,
        protocol: railyard_common::datatypes::Protocol,
        address: railyard_common::datatypes::Address,
        speed: Speed,
    ) {
        let loco = self
            .locos
            .read()
            .expect("manager poisoned")
            .values()
            .find(|l| {
                let handle = l.handle();
                handle.protocol == protocol && handle.address == address
            })
            .cloned();
        if let Some(loco) = loco {
            let speed = loco.set_speed(speed);
            self.notify(|o| o.loco_speed_changed(loco.id(), speed));
        }
    }

    fn loco_orientation_event(
        &self,
        _control: ControlId,
        protocol: railyard_common::datatypes::Protocol,
        address: railyard_common::datatypes::Address,
        orientation: Orientation,
    ) {
        let loco = self
            .locos
            .read()
            .expect("manager poisoned")
            .values()
            .find(|l| {
                let handle = l.handle();
                handle.protocol == protocol && handle.address == address
            })
            .cloned();
        if let Some(loco) = loco {
            loco.set_orientation(orientation);
            self.notify(|o| o.loco_orientation_changed(loco.id(), orientation));
        }
    }
}
