//! Tracks: the primary reservation unit of the layout.

use std::sync::RwLock;

use crate::datatypes::{Length, Orientation, SelectRouteApproach};
use crate::error::RailError;
use crate::ids::{FeedbackId, LayerId, ObjectIdentifier, RouteId, TrackId};
use crate::model::lockable::Lockable;
use crate::model::{LayoutPosition, LockableObject, Rotation, TrackBase};
use crate::serialize::{Properties, Writer};

/// Attributes shared by every track-base (Track or Signal acting as a
/// block). `routes_from` is a derived index maintained on route save
/// and delete; it is not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackBaseCore {
    /// Travel direction of the occupying locomotive.
    pub orientation: Orientation,
    pub length: Length,
    /// Feedbacks considered part of this track-base.
    pub feedbacks: Vec<FeedbackId>,
    pub select_route_approach: SelectRouteApproach,
    pub release_when_free: bool,
    pub blocked: bool,
    pub routes_from: Vec<RouteId>,
}

impl Default for TrackBaseCore {
    fn default() -> Self {
        Self {
            orientation: Orientation::Right,
            length: 0,
            feedbacks: Vec::new(),
            select_route_approach: SelectRouteApproach::SystemDefault,
            release_when_free: true,
            blocked: false,
            routes_from: Vec::new(),
        }
    }
}

impl TrackBaseCore {
    pub(crate) fn write_fields(&self, writer: Writer) -> Writer {
        let feedbacks = self
            .feedbacks
            .iter()
            .map(|f| f.0.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writer
            .field("orientation", self.orientation.to_code())
            .field("length", self.length)
            .field("feedbacks", feedbacks)
            .field("selectrouteapproach", self.select_route_approach.to_code())
            .bool_field("releasewhenfree", self.release_when_free)
            .bool_field("blocked", self.blocked)
    }

    pub(crate) fn read_fields(props: &Properties) -> Self {
        let feedbacks = props
            .get_str("feedbacks", "")
            .split(',')
            .filter_map(|s| s.trim().parse::<u16>().ok())
            .filter(|raw| *raw != 0)
            .map(FeedbackId)
            .collect();
        Self {
            orientation: Orientation::from_code(props.get_u8("orientation", 1)),
            length: props.get_u16("length", 0),
            feedbacks,
            select_route_approach: SelectRouteApproach::from_code(
                props.get_u8("selectrouteapproach", 0),
            ),
            release_when_free: props.get_bool("releasewhenfree", true),
            blocked: props.get_bool("blocked", false),
            routes_from: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCore {
    pub name: String,
    pub position: LayoutPosition,
    pub visible: bool,
    pub base: TrackBaseCore,
}

impl Default for TrackCore {
    fn default() -> Self {
        Self {
            name: String::new(),
            position: LayoutPosition::default(),
            visible: true,
            base: TrackBaseCore::default(),
        }
    }
}

#[derive(Debug)]
pub struct Track {
    id: TrackId,
    lockable: Lockable,
    core: RwLock<TrackCore>,
}

impl Track {
    pub fn new(id: TrackId, core: TrackCore) -> Self {
        Self {
            id,
            lockable: Lockable::new(),
            core: RwLock::new(core),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn core(&self) -> TrackCore {
        self.core.read().expect("track poisoned").clone()
    }

    /// Replace the editable attributes. Refused while reserved or
    /// locked; the derived route index survives the update.
    pub fn update(&self, mut core: TrackCore) -> Result<(), RailError> {
        if self.lockable.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "track {} is in use",
                self.object_name()
            )));
        }
        let mut current = self.core.write().expect("track poisoned");
        core.base.routes_from = current.base.routes_from.clone();
        *current = core;
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("track poisoned");
        let writer = Writer::new("Track")
            .field("id", self.id.0)
            .field("name", &core.name)
            .field("x", core.position.x)
            .field("y", core.position.y)
            .field("layer", core.position.layer.0)
            .field("rotation", core.position.rotation.to_code())
            .bool_field("visible", core.visible);
        let writer = core.base.write_fields(writer);
        self.lockable.write_fields(writer).finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Track") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Track".to_string(),
            ));
        }
        let core = TrackCore {
            name: props.get_str("name", ""),
            position: LayoutPosition {
                x: props.get_u16("x", 0),
                y: props.get_u16("y", 0),
                layer: LayerId(props.get_i16("layer", 1)),
                rotation: Rotation::from_code(props.get_u8("rotation", 0)),
            },
            visible: props.get_bool("visible", true),
            base: TrackBaseCore::read_fields(&props),
        };
        let track = Track::new(TrackId(props.get_u16("id", 0)), core);
        track.lockable.read_fields(&props);
        Ok(track)
    }
}

impl LockableObject for Track {
    fn lockable(&self) -> &Lockable {
        &self.lockable
    }

    fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::track(self.id)
    }

    fn object_name(&self) -> String {
        self.core.read().expect("track poisoned").name.clone()
    }
}

impl TrackBase for Track {
    fn orientation(&self) -> Orientation {
        self.core.read().expect("track poisoned").base.orientation
    }

    fn set_orientation(&self, orientation: Orientation) {
        self.core.write().expect("track poisoned").base.orientation = orientation;
    }

    fn length(&self) -> Length {
        self.core.read().expect("track poisoned").base.length
    }

    fn feedbacks(&self) -> Vec<FeedbackId> {
        self.core.read().expect("track poisoned").base.feedbacks.clone()
    }

    fn routes_from(&self) -> Vec<RouteId> {
        self.core.read().expect("track poisoned").base.routes_from.clone()
    }

    fn add_route_from(&self, route: RouteId) {
        let mut core = self.core.write().expect("track poisoned");
        if !core.base.routes_from.contains(&route) {
            core.base.routes_from.push(route);
        }
    }

    fn remove_route_from(&self, route: RouteId) {
        let mut core = self.core.write().expect("track poisoned");
        core.base.routes_from.retain(|r| *r != route);
    }

    fn select_route_approach(&self) -> SelectRouteApproach {
        self.core
            .read()
            .expect("track poisoned")
            .base
            .select_route_approach
    }

    fn release_when_free(&self) -> bool {
        self.core.read().expect("track poisoned").base.release_when_free
    }

    fn is_blocked(&self) -> bool {
        self.core.read().expect("track poisoned").base.blocked
    }

    fn set_blocked(&self, blocked: bool) {
        self.core.write().expect("track poisoned").base.blocked = blocked;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LocoId;

    fn sample() -> Track {
        Track::new(
            TrackId(5),
            TrackCore {
                name: "Yard West".to_string(),
                position: LayoutPosition {
                    x: 10,
                    y: 4,
                    layer: LayerId(2),
                    rotation: Rotation::Deg90,
                },
                visible: true,
                base: TrackBaseCore {
                    orientation: Orientation::Left,
                    length: 120,
                    feedbacks: vec![FeedbackId(7), FeedbackId(8)],
                    select_route_approach: SelectRouteApproach::MinTrackLength,
                    release_when_free: false,
                    blocked: true,
                    routes_from: Vec::new(),
                },
            },
        )
    }

    #[test]
    fn serialize_deserialize_idempotent() {
        let track = sample();
        track.lockable().reserve(LocoId(3)).unwrap();

        let first = track.serialize();
        let restored = Track::deserialize(&first).unwrap();
        assert_eq!(restored.serialize(), first);
        assert_eq!(restored.id(), TrackId(5));
        assert_eq!(restored.core(), track.core());
        assert_eq!(restored.lockable().owner(), Some(LocoId(3)));
    }

    #[test]
    fn deserialize_rejects_wrong_kind() {
        assert!(Track::deserialize("objectType=Signal;id=1").is_err());
    }

    #[test]
    fn update_refused_while_in_use() {
        let track = sample();
        track.lockable().reserve(LocoId(1)).unwrap();
        assert!(track.update(TrackCore::default()).is_err());

        track.lockable().release(LocoId(1)).unwrap();
        assert!(track.update(TrackCore::default()).is_ok());
    }

    #[test]
    fn update_keeps_route_index() {
        let track = sample();
        track.add_route_from(RouteId(9));
        track.update(TrackCore::default()).unwrap();
        assert_eq!(track.routes_from(), vec![RouteId(9)]);

        track.remove_route_from(RouteId(9));
        assert!(track.routes_from().is_empty());
    }

    #[test]
    fn route_index_deduplicates() {
        let track = sample();
        track.add_route_from(RouteId(4));
        track.add_route_from(RouteId(4));
        assert_eq!(track.routes_from().len(), 1);
    }

    #[test]
    fn orientation_is_mutable_at_runtime() {
        let track = sample();
        assert_eq!(track.orientation(), Orientation::Left);
        track.set_orientation(Orientation::Right);
        assert_eq!(track.orientation(), Orientation::Right);
    }
}
