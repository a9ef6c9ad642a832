//! Feedback sensors.
//!
//! A feedback is a (control, pin) input. It optionally belongs to a
//! track-base; occupied reports on owned track-bases wake the owning
//! locomotive's automode runner.

use std::sync::RwLock;

use crate::datatypes::{FeedbackPin, FeedbackState};
use crate::error::RailError;
use crate::ids::{ControlId, FeedbackId, LayerId, ObjectIdentifier, ObjectType};
use crate::model::{LayoutPosition, Rotation};
use crate::serialize::{Properties, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackCore {
    pub name: String,
    pub position: LayoutPosition,
    pub visible: bool,
    pub control: ControlId,
    pub pin: FeedbackPin,
    pub inverted: bool,
    /// Track-base this feedback belongs to, if any.
    pub track: Option<ObjectIdentifier>,
}

#[derive(Debug)]
pub struct Feedback {
    id: FeedbackId,
    core: RwLock<FeedbackCore>,
    state: RwLock<FeedbackState>,
}

impl Feedback {
    pub fn new(id: FeedbackId, core: FeedbackCore) -> Self {
        Self {
            id,
            core: RwLock::new(core),
            state: RwLock::new(FeedbackState::Free),
        }
    }

    pub fn id(&self) -> FeedbackId {
        self.id
    }

    pub fn core(&self) -> FeedbackCore {
        self.core.read().expect("feedback poisoned").clone()
    }

    pub fn update(&self, core: FeedbackCore) {
        *self.core.write().expect("feedback poisoned") = core;
    }

    pub fn object_name(&self) -> String {
        self.core.read().expect("feedback poisoned").name.clone()
    }

    pub fn control_and_pin(&self) -> (ControlId, FeedbackPin) {
        let core = self.core.read().expect("feedback poisoned");
        (core.control, core.pin)
    }

    pub fn related_track(&self) -> Option<ObjectIdentifier> {
        self.core.read().expect("feedback poisoned").track
    }

    pub fn set_related_track(&self, track: Option<ObjectIdentifier>) {
        self.core.write().expect("feedback poisoned").track = track;
    }

    pub fn state(&self) -> FeedbackState {
        *self.state.read().expect("feedback poisoned")
    }

    /// Store a raw hardware report, applying the inversion flag.
    /// Returns the effective state.
    pub fn set_raw_state(&self, raw: FeedbackState) -> FeedbackState {
        let inverted = self.core.read().expect("feedback poisoned").inverted;
        let effective = if inverted { raw.inverted() } else { raw };
        *self.state.write().expect("feedback poisoned") = effective;
        effective
    }

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("feedback poisoned");
        let (track_type, track_id) = match core.track {
            Some(id) => (id.kind.code(), id.id),
            None => (0, 0),
        };
        Writer::new("Feedback")
            .field("id", self.id.0)
            .field("name", &core.name)
            .field("x", core.position.x)
            .field("y", core.position.y)
            .field("layer", core.position.layer.0)
            .field("rotation", core.position.rotation.to_code())
            .bool_field("visible", core.visible)
            .field("control", core.control.0)
            .field("pin", core.pin)
            .bool_field("inverted", core.inverted)
            .field("tracktype", track_type)
            .field("trackid", track_id)
            .field("state", self.state().to_code())
            .finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Feedback") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Feedback".to_string(),
            ));
        }
        let track = match (
            ObjectType::from_code(props.get_u8("tracktype", 0)),
            props.get_id("trackid"),
        ) {
            (Some(kind), Some(id)) => Some(ObjectIdentifier::new(kind, id)),
            _ => None,
        };
        let core = FeedbackCore {
            name: props.get_str("name", ""),
            position: LayoutPosition {
                x: props.get_u16("x", 0),
                y: props.get_u16("y", 0),
                layer: LayerId(props.get_i16("layer", 1)),
                rotation: Rotation::from_code(props.get_u8("rotation", 0)),
            },
            visible: props.get_bool("visible", true),
            control: ControlId(props.get_u8("control", 0)),
            pin: props.get_u16("pin", 0),
            inverted: props.get_bool("inverted", false),
            track,
        };
        let feedback = Feedback::new(FeedbackId(props.get_u16("id", 0)), core);
        *feedback.state.write().expect("feedback poisoned") =
            FeedbackState::from_code(props.get_u8("state", 0));
        Ok(feedback)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
