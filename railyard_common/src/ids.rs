//! Typed entity identifiers.
//!
//! Every persistent entity has a stable numeric identifier within its
//! type. The persisted sentinel `0` maps to `Option::None` at the API
//! boundary; runtime state always uses `Option<...Id>`.

use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u16);

        impl $name {
            /// Raw numeric value as persisted.
            #[inline]
            pub const fn value(self) -> u16 {
                self.0
            }

            /// Map the persisted `0` sentinel to `None`.
            #[inline]
            pub const fn from_raw(raw: u16) -> Option<Self> {
                match raw {
                    0 => None,
                    n => Some(Self(n)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`crate::model::track::Track`].
    TrackId
);
id_type!(
    /// Identifier of a [`crate::model::signal::Signal`].
    SignalId
);
id_type!(
    /// Identifier of a [`crate::model::switch::Switch`].
    SwitchId
);
id_type!(
    /// Identifier of a [`crate::model::accessory::Accessory`].
    AccessoryId
);
id_type!(
    /// Identifier of a [`crate::model::feedback::Feedback`].
    FeedbackId
);
id_type!(
    /// Identifier of a [`crate::model::route::Route`].
    RouteId
);
id_type!(
    /// Identifier of a [`crate::model::loco::Loco`].
    LocoId
);

/// Identifier of a presentation layer.
///
/// Layer 1 always exists and cannot be deleted. Negative ids denote
/// the raw feedback grid of a control (`-(control id)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub i16);

impl LayerId {
    /// The undeletable default layer.
    pub const DEFAULT: LayerId = LayerId(1);

    /// The raw feedback grid layer of a control.
    #[inline]
    pub fn feedback_grid_of(control: ControlId) -> Self {
        LayerId(-(control.0 as i16))
    }

    #[inline]
    pub const fn value(self) -> i16 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a hardware control (command station).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(pub u8);

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of persistent entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Track,
    Signal,
    Switch,
    Accessory,
    Feedback,
    Route,
    Loco,
    Layer,
}

impl ObjectType {
    /// Stable name used in the persisted `objectType=` field.
    pub const fn name(self) -> &'static str {
        match self {
            ObjectType::Track => "Track",
            ObjectType::Signal => "Signal",
            ObjectType::Switch => "Switch",
            ObjectType::Accessory => "Accessory",
            ObjectType::Feedback => "Feedback",
            ObjectType::Route => "Route",
            ObjectType::Loco => "Loco",
            ObjectType::Layer => "Layer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Track" => Some(ObjectType::Track),
            "Signal" => Some(ObjectType::Signal),
            "Switch" => Some(ObjectType::Switch),
            "Accessory" => Some(ObjectType::Accessory),
            "Feedback" => Some(ObjectType::Feedback),
            "Route" => Some(ObjectType::Route),
            "Loco" => Some(ObjectType::Loco),
            "Layer" => Some(ObjectType::Layer),
            _ => None,
        }
    }

    /// Numeric tag used where the codec stores a kind as an integer.
    pub const fn code(self) -> u8 {
        match self {
            ObjectType::Track => 1,
            ObjectType::Signal => 2,
            ObjectType::Switch => 3,
            ObjectType::Accessory => 4,
            ObjectType::Feedback => 5,
            ObjectType::Route => 6,
            ObjectType::Loco => 7,
            ObjectType::Layer => 8,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectType::Track),
            2 => Some(ObjectType::Signal),
            3 => Some(ObjectType::Switch),
            4 => Some(ObjectType::Accessory),
            5 => Some(ObjectType::Feedback),
            6 => Some(ObjectType::Route),
            7 => Some(ObjectType::Loco),
            8 => Some(ObjectType::Layer),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference that may target any entity kind.
///
/// Used wherever a reference targets a Track or Signal interchangeably
/// (a "track-base") and in route relations, which may point at any
/// reservable kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub kind: ObjectType,
    pub id: u16,
}

impl ObjectIdentifier {
    pub const fn new(kind: ObjectType, id: u16) -> Self {
        Self { kind, id }
    }

    pub const fn track(id: TrackId) -> Self {
        Self::new(ObjectType::Track, id.0)
    }

    pub const fn signal(id: SignalId) -> Self {
        Self::new(ObjectType::Signal, id.0)
    }

    pub const fn switch(id: SwitchId) -> Self {
        Self::new(ObjectType::Switch, id.0)
    }

    pub const fn accessory(id: AccessoryId) -> Self {
        Self::new(ObjectType::Accessory, id.0)
    }

    pub const fn feedback(id: FeedbackId) -> Self {
        Self::new(ObjectType::Feedback, id.0)
    }

    pub const fn route(id: RouteId) -> Self {
        Self::new(ObjectType::Route, id.0)
    }

    pub const fn loco(id: LocoId) -> Self {
        Self::new(ObjectType::Loco, id.0)
    }

    pub fn as_track(&self) -> Option<TrackId> {
        match self.kind {
            ObjectType::Track => Some(TrackId(self.id)),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<SignalId> {
        match self.kind {
            ObjectType::Signal => Some(SignalId(self.id)),
            _ => None,
        }
    }

    pub fn as_route(&self) -> Option<RouteId> {
        match self.kind {
            ObjectType::Route => Some(RouteId(self.id)),
            _ => None,
        }
    }

    pub fn as_loco(&self) -> Option<LocoId> {
        match self.kind {
            ObjectType::Loco => Some(LocoId(self.id)),
            _ => None,
        }
    }

    /// True for the two kinds usable as a reservation unit in automode.
    pub const fn is_track_base(&self) -> bool {
        matches!(self.kind, ObjectType::Track | ObjectType::Signal)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.id)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_zero_is_none() {
        assert_eq!(TrackId::from_raw(0), None);
        assert_eq!(TrackId::from_raw(7), Some(TrackId(7)));
        assert_eq!(LocoId::from_raw(1).unwrap().value(), 1);
    }

    #[test]
    fn object_type_name_roundtrip() {
        for kind in [
            ObjectType::Track,
            ObjectType::Signal,
            ObjectType::Switch,
            ObjectType::Accessory,
            ObjectType::Feedback,
            ObjectType::Route,
            ObjectType::Loco,
            ObjectType::Layer,
        ] {
            assert_eq!(ObjectType::from_name(kind.name()), Some(kind));
            assert_eq!(ObjectType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ObjectType::from_name("Booster"), None);
        assert_eq!(ObjectType::from_code(0), None);
    }

    #[test]
    fn identifier_downcasts() {
        let id = ObjectIdentifier::track(TrackId(3));
        assert_eq!(id.as_track(), Some(TrackId(3)));
        assert_eq!(id.as_signal(), None);
        assert!(id.is_track_base());

        let id = ObjectIdentifier::switch(SwitchId(9));
        assert!(!id.is_track_base());
        assert_eq!(id.to_string(), "Switch:9");
    }

    #[test]
    fn feedback_grid_layer_is_negative() {
        let layer = LayerId::feedback_grid_of(ControlId(2));
        assert_eq!(layer.value(), -2);
        assert!(layer < LayerId::DEFAULT);
    }
}
