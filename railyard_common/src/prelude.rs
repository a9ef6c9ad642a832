//! Common re-exports for convenience.

pub use crate::datatypes::{
    AccessoryState, BoosterState, FeedbackState, Orientation, Protocol, PushpullMode,
    SelectRouteApproach, SignalAspect, SpeedClass, SwitchPosition, MAX_SPEED, MIN_SPEED,
};
pub use crate::error::RailError;
pub use crate::ids::{
    AccessoryId, ControlId, FeedbackId, LayerId, LocoId, ObjectIdentifier, ObjectType, RouteId,
    SignalId, SwitchId, TrackId,
};
pub use crate::model::lockable::{LockState, Lockable};
pub use crate::model::{LayoutContext, LockableObject, TrackBase};
