//! Switches (turnouts).

use std::sync::RwLock;

use crate::datatypes::{DelayMs, HardwareHandle, Protocol, SwitchPosition};
use crate::error::RailError;
use crate::ids::{ControlId, LayerId, ObjectIdentifier, SwitchId};
use crate::model::lockable::Lockable;
use crate::model::{LayoutPosition, LockableObject, Rotation};
use crate::serialize::{Properties, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCore {
    pub name: String,
    pub position: LayoutPosition,
    pub visible: bool,
    pub handle: HardwareHandle,
    /// Activation pulse in milliseconds.
    pub duration: DelayMs,
    pub inverted: bool,
    pub state: SwitchPosition,
}

#[derive(Debug)]
pub struct Switch {
    id: SwitchId,
    lockable: Lockable,
    core: RwLock<SwitchCore>,
}

impl Switch {
    pub fn new(id: SwitchId, core: SwitchCore) -> Self {
        Self {
            id,
            lockable: Lockable::new(),
            core: RwLock::new(core),
        }
    }

    pub fn id(&self) -> SwitchId {
        self.id
    }

    pub fn core(&self) -> SwitchCore {
        self.core.read().expect("switch poisoned").clone()
    }

    pub fn handle(&self) -> HardwareHandle {
        self.core.read().expect("switch poisoned").handle
    }

    pub fn duration(&self) -> DelayMs {
        self.core.read().expect("switch poisoned").duration
    }

    pub fn state(&self) -> SwitchPosition {
        self.core.read().expect("switch poisoned").state
    }

    pub fn set_state(&self, state: SwitchPosition) {
        self.core.write().expect("switch poisoned").state = state;
    }

    pub fn update(&self, core: SwitchCore) -> Result<(), RailError> {
        if self.lockable.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "switch {} is in use",
                self.object_name()
            )));
        }
        *self.core.write().expect("switch poisoned") = core;
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("switch poisoned");
        let writer = Writer::new("Switch")
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
            .field("state", core.state.to_code());
        self.lockable.write_fields(writer).finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Switch") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Switch".to_string(),
            ));
        }
        let core = SwitchCore {
            name: props.get_str("name", ""),
            position: LayoutPosition {
                x: props.get_u16("x", 0),
                y: props.get_u16("y", 0),
                layer: LayerId(props.get_i16("layer", 1)),
                rotation: Rotation::from_code(props.get_u8("rotation", 0)),
            },
            visible: props.get_bool("visible", true),
            handle: HardwareHandle::new(
                ControlId(props.get_u8("control", 0)),
                Protocol::from_code(props.get_u8("protocol", 0)),
                props.get_u16("address", 0),
            ),
            duration: props.get_u16("duration", 100),
            inverted: props.get_bool("inverted", false),
            state: SwitchPosition::from_code(props.get_u8("state", 0)),
        };
        let switch = Switch::new(SwitchId(props.get_u16("id", 0)), core);
        switch.lockable.read_fields(&props);
        Ok(switch)
    }
}

impl LockableObject for Switch {
    fn lockable(&self) -> &Lockable {
        &self.lockable
    }

    fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::switch(self.id)
    }

    fn object_name(&self) -> String {
        self.core.read().expect("switch poisoned").name.clone()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
