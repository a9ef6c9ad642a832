//! Layout entities and the trait seams between them.
//!
//! Entities refer to one another by identifier; the registry owning
//! them implements [`LayoutContext`] so that routes and relations can
//! resolve targets and dispatch state changes without owning pointers
//! in both directions.

pub mod accessory;
pub mod feedback;
pub mod layer;
pub mod lockable;
pub mod loco;
pub mod relation;
pub mod route;
pub mod signal;
pub mod switch;
pub mod track;

use std::fmt;
use std::sync::Arc;

use crate::datatypes::{BoosterState, Length, Orientation, SelectRouteApproach};
use crate::error::RailError;
use crate::ids::{FeedbackId, LayerId, LocoId, ObjectIdentifier, RouteId};
use crate::model::lockable::Lockable;

/// Rotation of a layout item in the plan view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const fn to_code(self) -> u8 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }
}

/// Placement of an item in the plan view. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPosition {
    pub x: u16,
    pub y: u16,
    pub layer: LayerId,
    pub rotation: Rotation,
}

impl Default for LayoutPosition {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            layer: LayerId::DEFAULT,
            rotation: Rotation::Deg0,
        }
    }
}

impl fmt::Display for LayoutPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, layer {})", self.x, self.y, self.layer)
    }
}

/// Capability of every reservable layout item.
pub trait LockableObject: Send + Sync {
    fn lockable(&self) -> &Lockable;

    fn identifier(&self) -> ObjectIdentifier;

    fn object_name(&self) -> String;
}

/// A Track or Signal used as a reservation unit in automode.
///
/// The stored orientation is the travel direction of the occupying
/// locomotive; routes departing the track-base match against it.
pub trait TrackBase: LockableObject {
    fn orientation(&self) -> Orientation;

    fn set_orientation(&self, orientation: Orientation);

    fn length(&self) -> Length;

    fn feedbacks(&self) -> Vec<FeedbackId>;

    fn routes_from(&self) -> Vec<RouteId>;

    fn add_route_from(&self, route: RouteId);

    fn remove_route_from(&self, route: RouteId);

    fn select_route_approach(&self) -> SelectRouteApproach;

    fn release_when_free(&self) -> bool;

    fn is_blocked(&self) -> bool;

    fn set_blocked(&self, blocked: bool);
}

/// Resolves identifiers to live entities and dispatches the state
/// changes of route relations.
///
/// Implemented by the process-wide registry. Routes and relations call
/// through it so that the entity graph stays acyclic: an operation
/// carries the context down instead of entities holding back-pointers.
pub trait LayoutContext: Send + Sync {
    fn booster(&self) -> BoosterState;

    /// Track or Signal lookup; `None` for dangling identifiers.
    fn track_base(&self, id: ObjectIdentifier) -> Option<Arc<dyn TrackBase>>;

    /// Reserve any lockable object for a locomotive. Dispatches per
    /// kind; nested route targets recurse through the route protocol.
    fn reserve_object(&self, id: ObjectIdentifier, loco: LocoId) -> Result<(), RailError>;

    fn lock_object(&self, id: ObjectIdentifier, loco: LocoId) -> Result<(), RailError>;

    fn release_object(&self, id: ObjectIdentifier, loco: LocoId) -> Result<(), RailError>;

    /// Apply a relation target state: switch position, signal aspect,
    /// accessory state, track orientation, loco function or a nested
    /// route execute. Commands the hardware where applicable.
    fn apply_relation_state(&self, id: ObjectIdentifier, state: u8) -> Result<(), RailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_codes_roundtrip() {
        for r in [
            Rotation::Deg0,
            Rotation::Deg90,
            Rotation::Deg180,
            Rotation::Deg270,
        ] {
            assert_eq!(Rotation::from_code(r.to_code()), r);
        }
        assert_eq!(Rotation::from_code(77), Rotation::Deg0);
    }

    #[test]
    fn default_position_is_origin_on_layer_one() {
        let p = LayoutPosition::default();
        assert_eq!(p.layer, LayerId::DEFAULT);
        assert_eq!((p.x, p.y), (0, 0));
    }
}
