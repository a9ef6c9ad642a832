//! Routes: directed edges between track-bases carrying the
//! interlocking relations.
//!
//! The reserve/lock/execute/release sequence of a route is serialized
//! by a per-route interlock mutex. Relations are traversed in
//! ascending priority order; rollback and release reverse it, so two
//! locomotives contending for overlapping resources can fail to
//! reserve but never deadlock.

use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::datatypes::{
    unix_now, BoosterState, DelayMs, Length, Orientation, PushpullMode, SelectRouteApproach,
    SpeedClass,
};
use crate::error::RailError;
use crate::ids::{FeedbackId, LayerId, LocoId, ObjectIdentifier, ObjectType, RouteId};
use crate::model::lockable::Lockable;
use crate::model::relation::Relation;
use crate::model::{LayoutContext, LayoutPosition, LockableObject, Rotation};
use crate::serialize::{Properties, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCore {
    pub name: String,
    pub position: LayoutPosition,
    pub visible: bool,
    /// Whether the automode engine may select this route.
    pub automode: bool,
    pub from_track: Option<ObjectIdentifier>,
    pub from_orientation: Orientation,
    pub to_track: Option<ObjectIdentifier>,
    pub to_orientation: Orientation,
    pub speed_class: SpeedClass,
    pub feedback_reduced: Option<FeedbackId>,
    pub feedback_creep: Option<FeedbackId>,
    /// Required when `automode` is set.
    pub feedback_stop: Option<FeedbackId>,
    pub feedback_over: Option<FeedbackId>,
    pub pushpull: PushpullMode,
    /// `0` means unbounded.
    pub min_train_length: Length,
    /// `0` means unbounded.
    pub max_train_length: Length,
    /// Inter-command spacing while executing relations, milliseconds.
    pub delay: DelayMs,
    /// Rest of the destination after release, seconds.
    pub wait_after_release: u16,
    /// Executed (and reserved/locked) when the route locks.
    pub at_lock: Vec<Relation>,
    /// Executed when the route unlocks; never reserved.
    pub at_unlock: Vec<Relation>,
}

impl Default for RouteCore {
    fn default() -> Self {
        Self {
            name: String::new(),
            position: LayoutPosition::default(),
            visible: true,
            automode: false,
            from_track: None,
            from_orientation: Orientation::Right,
            to_track: None,
            to_orientation: Orientation::Left,
            speed_class: SpeedClass::Travel,
            feedback_reduced: None,
            feedback_creep: None,
            feedback_stop: None,
            feedback_over: None,
            pushpull: PushpullMode::Both,
            min_train_length: 0,
            max_train_length: 0,
            delay: 250,
            wait_after_release: 0,
            at_lock: Vec::new(),
            at_unlock: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    last_used: u64,
    counter: u32,
}

#[derive(Debug)]
pub struct Route {
    id: RouteId,
    lockable: Lockable,
    core: RwLock<RouteCore>,
    usage: Mutex<Usage>,
    /// Serializes the reserve/lock/execute/release sequences.
    interlock: Mutex<()>,
}

impl Route {
    pub fn new(id: RouteId, mut core: RouteCore) -> Self {
        sort_relations(&mut core);
        Self {
            id,
            lockable: Lockable::new(),
            core: RwLock::new(core),
            usage: Mutex::new(Usage::default()),
            interlock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn core(&self) -> RouteCore {
        self.core.read().expect("route poisoned").clone()
    }

    pub fn automode(&self) -> bool {
        self.core.read().expect("route poisoned").automode
    }

    pub fn from_track(&self) -> Option<ObjectIdentifier> {
        self.core.read().expect("route poisoned").from_track
    }

    pub fn from_orientation(&self) -> Orientation {
        self.core.read().expect("route poisoned").from_orientation
    }

    pub fn to_track(&self) -> Option<ObjectIdentifier> {
        self.core.read().expect("route poisoned").to_track
    }

    pub fn to_orientation(&self) -> Orientation {
        self.core.read().expect("route poisoned").to_orientation
    }

    pub fn speed_class(&self) -> SpeedClass {
        self.core.read().expect("route poisoned").speed_class
    }

    pub fn feedback_reduced(&self) -> Option<FeedbackId> {
        self.core.read().expect("route poisoned").feedback_reduced
    }

    pub fn feedback_creep(&self) -> Option<FeedbackId> {
        self.core.read().expect("route poisoned").feedback_creep
    }

    pub fn feedback_stop(&self) -> Option<FeedbackId> {
        self.core.read().expect("route poisoned").feedback_stop
    }

    pub fn feedback_over(&self) -> Option<FeedbackId> {
        self.core.read().expect("route poisoned").feedback_over
    }

    pub fn wait_after_release(&self) -> u16 {
        self.core.read().expect("route poisoned").wait_after_release
    }

    pub fn relations_at_lock(&self) -> Vec<Relation> {
        self.core.read().expect("route poisoned").at_lock.clone()
    }

    pub fn relations_at_unlock(&self) -> Vec<Relation> {
        self.core.read().expect("route poisoned").at_unlock.clone()
    }

    pub fn last_used(&self) -> u64 {
        self.usage.lock().expect("route poisoned").last_used
    }

    pub fn counter(&self) -> u32 {
        self.usage.lock().expect("route poisoned").counter
    }

    /// Replace the editable attributes, relation lists included.
    /// Refused while the route is reserved or locked.
    pub fn update(&self, mut core: RouteCore) -> Result<(), RailError> {
        if self.lockable.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "route {} is in use",
                self.object_name()
            )));
        }
        sort_relations(&mut core);
        *self.core.write().expect("route poisoned") = core;
        Ok(())
    }

    /// Admissibility gate for a locomotive asking to depart `origin`
    /// with `origin_orientation`.
    pub fn admits_from(
        &self,
        origin: ObjectIdentifier,
        origin_orientation: Orientation,
        train_length: Length,
        train_pushpull: bool,
        allow_turn: bool,
    ) -> bool {
        let core = self.core.read().expect("route poisoned");
        if !core.automode {
            return false;
        }
        if core.from_track != Some(origin) {
            return false;
        }
        if train_length < core.min_train_length {
            debug!(route = %core.name, "train is too short");
            return false;
        }
        if core.max_train_length > 0 && train_length > core.max_train_length {
            debug!(route = %core.name, "train is too long");
            return false;
        }
        if !core.pushpull.admits(train_pushpull) {
            debug!(route = %core.name, "pushpull type does not match");
            return false;
        }
        if allow_turn && train_pushpull {
            return true;
        }
        if core.from_orientation != origin_orientation {
            debug!(route = %core.name, "orientations differ");
            return false;
        }
        true
    }

    /// Reserve the route, its destination track-base and every at-lock
    /// relation target, in priority order. Either fully succeeds or
    /// leaves everything as before the call.
    pub fn reserve(&self, ctx: &dyn LayoutContext, loco: LocoId) -> Result<(), RailError> {
        if ctx.booster() == BoosterState::Stop {
            return Err(RailError::BoosterOff);
        }
        let _guard = self.interlock.lock().expect("route poisoned");
        self.lockable.reserve(loco)?;
        let core = self.core.read().expect("route poisoned").clone();

        if core.automode {
            match self.destination(ctx, &core) {
                Ok(track) => {
                    if let Err(err) = track.lockable().reserve(loco) {
                        debug!(route = %core.name, destination = %track.object_name(), %err,
                            "unable to reserve destination");
                        self.release_relations_and_self(ctx, loco, &core);
                        return Err(err);
                    }
                }
                Err(err) => {
                    self.release_relations_and_self(ctx, loco, &core);
                    return Err(err);
                }
            }
        }

        for relation in &core.at_lock {
            if let Err(err) = relation.reserve(ctx, loco) {
                debug!(route = %core.name, target = %relation.target, %err,
                    "unable to reserve relation");
                self.release_all(ctx, loco, &core);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Hard-lock a previously reserved route with its destination and
    /// at-lock relations. Rolls back fully on any failure.
    pub fn lock(&self, ctx: &dyn LayoutContext, loco: LocoId) -> Result<(), RailError> {
        if ctx.booster() == BoosterState::Stop {
            return Err(RailError::BoosterOff);
        }
        let _guard = self.interlock.lock().expect("route poisoned");
        self.lockable.lock(loco)?;
        let core = self.core.read().expect("route poisoned").clone();

        if core.automode {
            match self.destination(ctx, &core) {
                Ok(track) => {
                    if let Err(err) = track.lockable().lock(loco) {
                        debug!(route = %core.name, destination = %track.object_name(), %err,
                            "unable to lock destination");
                        self.release_all(ctx, loco, &core);
                        return Err(err);
                    }
                }
                Err(err) => {
                    self.release_all(ctx, loco, &core);
                    return Err(err);
                }
            }
        }

        for relation in &core.at_lock {
            if let Err(err) = relation.lock(ctx, loco) {
                debug!(route = %core.name, target = %relation.target, %err,
                    "unable to lock relation");
                self.release_all(ctx, loco, &core);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Set every at-lock relation target to its prescribed state, with
    /// the route delay between commands. Already-executed relations
    /// stand on a mid-sequence failure; drivers handle physical
    /// idempotence.
    pub fn execute(&self, ctx: &dyn LayoutContext) -> Result<(), RailError> {
        if ctx.booster() == BoosterState::Stop {
            return Err(RailError::BoosterOff);
        }
        let _guard = self.interlock.lock().expect("route poisoned");
        let core = self.core.read().expect("route poisoned").clone();
        for relation in &core.at_lock {
            relation.execute(ctx)?;
            if core.delay > 0 {
                thread::sleep(Duration::from_millis(u64::from(core.delay)));
            }
        }
        let mut usage = self.usage.lock().expect("route poisoned");
        usage.counter += 1;
        usage.last_used = unix_now();
        Ok(())
    }

    /// Run the at-unlock relations. Skipped under booster stop:
    /// releases proceed, commands do not.
    pub fn execute_at_unlock(&self, ctx: &dyn LayoutContext) {
        let _guard = self.interlock.lock().expect("route poisoned");
        let core = self.core.read().expect("route poisoned").clone();
        if ctx.booster() == BoosterState::Stop {
            if !core.at_unlock.is_empty() {
                debug!(route = %core.name, "booster is off, skipping unlock relations");
            }
            return;
        }
        for relation in &core.at_unlock {
            if let Err(err) = relation.execute(ctx) {
                debug!(route = %core.name, target = %relation.target, %err,
                    "unable to execute unlock relation");
            }
            if core.delay > 0 {
                thread::sleep(Duration::from_millis(u64::from(core.delay)));
            }
        }
    }

    /// Release the at-lock relations and the route itself. The
    /// destination track-base stays with the locomotive until it
    /// leaves.
    pub fn release(&self, ctx: &dyn LayoutContext, loco: LocoId) {
        let _guard = self.interlock.lock().expect("route poisoned");
        let core = self.core.read().expect("route poisoned").clone();
        self.release_relations_and_self(ctx, loco, &core);
    }

    /// Release including the destination track-base. Used for rollback
    /// and for full teardown after an error.
    pub fn release_with_destination(&self, ctx: &dyn LayoutContext, loco: LocoId) {
        let _guard = self.interlock.lock().expect("route poisoned");
        let core = self.core.read().expect("route poisoned").clone();
        self.release_all(ctx, loco, &core);
    }

    fn destination(
        &self,
        ctx: &dyn LayoutContext,
        core: &RouteCore,
    ) -> Result<Arc<dyn crate::model::TrackBase>, RailError> {
        let to = core.to_track.ok_or_else(|| {
            RailError::ConfigInvalid(format!("route {} has no destination", core.name))
        })?;
        ctx.track_base(to).ok_or(RailError::UnknownObject(to))
    }

    fn release_relations_and_self(
        &self,
        ctx: &dyn LayoutContext,
        loco: LocoId,
        core: &RouteCore,
    ) {
        for relation in core.at_lock.iter().rev() {
            relation.release(ctx, loco);
        }
        if let Err(err) = self.lockable.release(loco) {
            debug!(route = %core.name, %err, "unable to release route");
        }
    }

    fn release_all(&self, ctx: &dyn LayoutContext, loco: LocoId, core: &RouteCore) {
        self.release_relations_and_self(ctx, loco, core);
        if !core.automode {
            return;
        }
        if let Ok(track) = self.destination(ctx, core) {
            if let Err(err) = track.lockable().release(loco) {
                debug!(route = %core.name, destination = %track.object_name(), %err,
                    "unable to release destination");
            }
        }
    }

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("route poisoned");
        let usage = self.usage.lock().expect("route poisoned");
        let (from_type, from_id) = split_identifier(core.from_track);
        let (to_type, to_id) = split_identifier(core.to_track);
        let writer = Writer::new("Route")
            .field("id", self.id.0)
            .field("name", &core.name)
            .field("x", core.position.x)
            .field("y", core.position.y)
            .field("layer", core.position.layer.0)
            .field("rotation", core.position.rotation.to_code())
            .bool_field("visible", core.visible)
            .bool_field("automode", core.automode)
            .field("fromtype", from_type)
            .field("fromid", from_id)
            .field("fromorientation", core.from_orientation.to_code())
            .field("totype", to_type)
            .field("toid", to_id)
            .field("toorientation", core.to_orientation.to_code())
            .field("speedclass", core.speed_class.to_code())
            .id_field("feedbackreduced", core.feedback_reduced.map(|f| f.0))
            .id_field("feedbackcreep", core.feedback_creep.map(|f| f.0))
            .id_field("feedbackstop", core.feedback_stop.map(|f| f.0))
            .id_field("feedbackover", core.feedback_over.map(|f| f.0))
            .field("pushpull", core.pushpull.to_code())
            .field("mintrainlength", core.min_train_length)
            .field("maxtrainlength", core.max_train_length)
            .field("delay", core.delay)
            .field("waitafterrelease", core.wait_after_release)
            .field("lastused", usage.last_used)
            .field("counter", usage.counter);
        self.lockable.write_fields(writer).finish()
    }

    /// Relations are stored as separate tuples and attached afterwards
    /// by the loader; the deserialized route starts with empty lists.
    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Route") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Route".to_string(),
            ));
        }
        let core = RouteCore {
            name: props.get_str("name", ""),
            position: LayoutPosition {
                x: props.get_u16("x", 0),
                y: props.get_u16("y", 0),
                layer: LayerId(props.get_i16("layer", 1)),
                rotation: Rotation::from_code(props.get_u8("rotation", 0)),
            },
            visible: props.get_bool("visible", true),
            automode: props.get_bool("automode", false),
            from_track: join_identifier(props.get_u8("fromtype", 0), props.get_u16("fromid", 0)),
            from_orientation: Orientation::from_code(props.get_u8("fromorientation", 1)),
            to_track: join_identifier(props.get_u8("totype", 0), props.get_u16("toid", 0)),
            to_orientation: Orientation::from_code(props.get_u8("toorientation", 0)),
            speed_class: SpeedClass::from_code(props.get_u8("speedclass", 0)),
            feedback_reduced: props.get_id("feedbackreduced").map(FeedbackId),
            feedback_creep: props.get_id("feedbackcreep").map(FeedbackId),
            feedback_stop: props.get_id("feedbackstop").map(FeedbackId),
            feedback_over: props.get_id("feedbackover").map(FeedbackId),
            pushpull: PushpullMode::from_code(props.get_u8("pushpull", 2)),
            min_train_length: props.get_u16("mintrainlength", 0),
            max_train_length: props.get_u16("maxtrainlength", 0),
            delay: props.get_u16("delay", 250),
            wait_after_release: props.get_u16("waitafterrelease", 0),
            at_lock: Vec::new(),
            at_unlock: Vec::new(),
        };
        let route = Route::new(RouteId(props.get_u16("id", 0)), core);
        {
            let mut usage = route.usage.lock().expect("route poisoned");
            usage.last_used = props.get_u64("lastused", 0);
            usage.counter = props.get_u32("counter", 0);
        }
        route.lockable.read_fields(&props);
        Ok(route)
    }
}

impl LockableObject for Route {
    fn lockable(&self) -> &Lockable {
        &self.lockable
    }

    fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::route(self.id)
    }

    fn object_name(&self) -> String {
        self.core.read().expect("route poisoned").name.clone()
    }
}

fn sort_relations(core: &mut RouteCore) {
    core.at_lock.sort_by_key(|r| r.priority);
    core.at_unlock.sort_by_key(|r| r.priority);
}

fn split_identifier(id: Option<ObjectIdentifier>) -> (u8, u16) {
    match id {
        Some(id) => (id.kind.code(), id.id),
        None => (0, 0),
    }
}

fn join_identifier(kind: u8, id: u16) -> Option<ObjectIdentifier> {
    match (ObjectType::from_code(kind), id) {
        (Some(kind), id) if id != 0 => Some(ObjectIdentifier::new(kind, id)),
        _ => None,
    }
}

/// Order admissible candidates per the selection policy. `DoNotCare`
/// keeps declaration order; `SystemDefault` must be resolved by the
/// caller before this point and behaves like `DoNotCare` here.
pub fn order_candidates(
    mut candidates: Vec<Arc<Route>>,
    approach: SelectRouteApproach,
    ctx: &dyn LayoutContext,
) -> Vec<Arc<Route>> {
    match approach {
        SelectRouteApproach::SystemDefault | SelectRouteApproach::DoNotCare => {}
        SelectRouteApproach::Random => {
            candidates.shuffle(&mut rand::thread_rng());
        }
        SelectRouteApproach::MinTrackLength => {
            candidates.sort_by_key(|route| {
                route
                    .to_track()
                    .and_then(|to| ctx.track_base(to))
                    .map(|track| track.length())
                    .unwrap_or(Length::MAX)
            });
        }
        SelectRouteApproach::LongestUnused => {
            candidates.sort_by_key(|route| route.last_used());
        }
    }
    candidates
}

// ─── Tests ──────────────────────────────────────────────────────────
