//! Signals.
//!
//! A signal is an accessory-addressed aspect display that doubles as a
//! track-base: it carries the same block attributes as a track and can
//! be reserved and driven through in automode.

use std::sync::RwLock;

use crate::datatypes::{DelayMs, HardwareHandle, Length, Orientation, SelectRouteApproach,
    SignalAspect};
use crate::error::RailError;
use crate::ids::{FeedbackId, LayerId, ObjectIdentifier, RouteId, SignalId};
use crate::model::lockable::Lockable;
use crate::model::track::TrackBaseCore;
use crate::model::{LayoutPosition, LockableObject, Rotation, TrackBase};
use crate::serialize::{Properties, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalCore {
    pub name: String,
    pub position: LayoutPosition,
    pub visible: bool,
    pub handle: HardwareHandle,
    /// Activation pulse in milliseconds.
    pub duration: DelayMs,
    pub inverted: bool,
    pub aspect: SignalAspect,
    pub base: TrackBaseCore,
}

#[derive(Debug)]
pub struct Signal {
    id: SignalId,
    lockable: Lockable,
    core: RwLock<SignalCore>,
}

impl Signal {
    pub fn new(id: SignalId, core: SignalCore) -> Self {
        Self {
            id,
            lockable: Lockable::new(),
            core: RwLock::new(core),
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn core(&self) -> SignalCore {
        self.core.read().expect("signal poisoned").clone()
    }

    pub fn handle(&self) -> HardwareHandle {
        self.core.read().expect("signal poisoned").handle
    }

    pub fn duration(&self) -> DelayMs {
        self.core.read().expect("signal poisoned").duration
    }

    pub fn aspect(&self) -> SignalAspect {
        self.core.read().expect("signal poisoned").aspect
    }

    pub fn set_aspect(&self, aspect: SignalAspect) {
        self.core.write().expect("signal poisoned").aspect = aspect;
    }

    pub fn update(&self, mut core: SignalCore) -> Result<(), RailError> {
        if self.lockable.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "signal {} is in use",
                self.object_name()
            )));
        }
        let mut current = self.core.write().expect("signal poisoned");
        core.base.routes_from = current.base.routes_from.clone();
        *current = core;
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("signal poisoned");
        let writer = Writer::new("Signal")
            .field("id", self.id.0)
            .field("name", &core.name)
            .field("x", core.position.x)
            .field("y", core.position.y)
            .field("layer", core.position.layer.0)
            .field("rotation", core.position.rotation.to_code())
            .bool_field("visible", core.visible)
            .field("control", core.handle.control.0)
            .field("protocol", core.handle.protocol.to_code())
            .field("address", core.handle.address)
            .field("duration", core.duration)
            .bool_field("inverted", core.inverted)
            .field("aspect", core.aspect.to_code());
        let writer = core.base.write_fields(writer);
        self.lockable.write_fields(writer).finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Signal") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Signal".to_string(),
            ));
        }
        let core = SignalCore {
            name: props.get_str("name", ""),
            position: LayoutPosition {
                x: props.get_u16("x", 0),
                y: props.get_u16("y", 0),
                layer: LayerId(props.get_i16("layer", 1)),
                rotation: Rotation::from_code(props.get_u8("rotation", 0)),
            },
            visible: props.get_bool("visible", true),
            handle: HardwareHandle::new(
                crate::ids::ControlId(props.get_u8("control", 0)),
                crate::datatypes::Protocol::from_code(props.get_u8("protocol", 0)),
                props.get_u16("address", 0),
            ),
            duration: props.get_u16("duration", 100),
            inverted: props.get_bool("inverted", false),
            aspect: SignalAspect::from_code(props.get_u8("aspect", 0)),
            base: TrackBaseCore::read_fields(&props),
        };
        let signal = Signal::new(SignalId(props.get_u16("id", 0)), core);
        signal.lockable.read_fields(&props);
        Ok(signal)
    }
}

impl LockableObject for Signal {
    fn lockable(&self) -> &Lockable {
        &self.lockable
    }

    fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::signal(self.id)
    }

    fn object_name(&self) -> String {
        self.core.read().expect("signal poisoned").name.clone()
    }
}

impl TrackBase for Signal {
    fn orientation(&self) -> Orientation {
        self.core.read().expect("signal poisoned").base.orientation
    }

    fn set_orientation(&self, orientation: Orientation) {
        self.core.write().expect("signal poisoned").base.orientation = orientation;
    }

    fn length(&self) -> Length {
        self.core.read().expect("signal poisoned").base.length
    }

    fn feedbacks(&self) -> Vec<FeedbackId> {
        self.core.read().expect("signal poisoned").base.feedbacks.clone()
    }

    fn routes_from(&self) -> Vec<RouteId> {
        self.core.read().expect("signal poisoned").base.routes_from.clone()
    }

    fn add_route_from(&self, route: RouteId) {
        let mut core = self.core.write().expect("signal poisoned");
        if !core.base.routes_from.contains(&route) {
            core.base.routes_from.push(route);
        }
    }

    fn remove_route_from(&self, route: RouteId) {
        let mut core = self.core.write().expect("signal poisoned");
        core.base.routes_from.retain(|r| *r != route);
    }

    fn select_route_approach(&self) -> SelectRouteApproach {
        self.core
            .read()
            .expect("signal poisoned")
            .base
            .select_route_approach
    }

    fn release_when_free(&self) -> bool {
        self.core.read().expect("signal poisoned").base.release_when_free
    }

    fn is_blocked(&self) -> bool {
        self.core.read().expect("signal poisoned").base.blocked
    }

    fn set_blocked(&self, blocked: bool) {
        self.core.write().expect("signal poisoned").base.blocked = blocked;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Protocol;
    use crate::ids::ControlId;

    fn sample() -> Signal {
        Signal::new(
            SignalId(2),
            SignalCore {
                name: "Exit North".to_string(),
                position: LayoutPosition::default(),
                visible: true,
                handle: HardwareHandle::new(ControlId(1), Protocol::DCC, 44),
                duration: 200,
                inverted: false,
                aspect: SignalAspect::Clear,
                base: TrackBaseCore {
                    length: 90,
                    ..TrackBaseCore::default()
                },
            },
        )
    }

    #[test]
    fn serialize_deserialize_idempotent() {
        let signal = sample();
        let first = signal.serialize();
        let restored = Signal::deserialize(&first).unwrap();
        assert_eq!(restored.serialize(), first);
        assert_eq!(restored.aspect(), SignalAspect::Clear);
        assert_eq!(restored.handle().address, 44);
        assert_eq!(restored.length(), 90);
    }

    #[test]
    fn aspect_is_runtime_state() {
        let signal = sample();
        signal.set_aspect(SignalAspect::Stop);
        assert_eq!(signal.aspect(), SignalAspect::Stop);
    }

    #[test]
    fn signal_acts_as_track_base() {
        let signal = sample();
        signal.add_route_from(RouteId(3));
        assert_eq!(signal.routes_from(), vec![RouteId(3)]);
        assert!(signal.identifier().is_track_base());
    }
}
