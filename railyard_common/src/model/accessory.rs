//! Generic two-state accessories (uncouplers, lights, ...).

use std::sync::RwLock;

use crate::datatypes::{AccessoryState, DelayMs, HardwareHandle, Protocol};
use crate::error::RailError;
use crate::ids::{AccessoryId, ControlId, LayerId, ObjectIdentifier};
use crate::model::lockable::Lockable;
use crate::model::{LayoutPosition, LockableObject, Rotation};
use crate::serialize::{Properties, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryCore {
    pub name: String,
    pub position: LayoutPosition,
    pub visible: bool,
    pub handle: HardwareHandle,
    /// Activation pulse in milliseconds.
    pub duration: DelayMs,
    pub inverted: bool,
    pub state: AccessoryState,
}

#[derive(Debug)]
pub struct Accessory {
    id: AccessoryId,
    lockable: Lockable,
    core: RwLock<AccessoryCore>,
}

impl Accessory {
    pub fn new(id: AccessoryId, core: AccessoryCore) -> Self {
        Self {
            id,
            lockable: Lockable::new(),
            core: RwLock::new(core),
        }
    }

    pub fn id(&self) -> AccessoryId {
        self.id
    }

    pub fn core(&self) -> AccessoryCore {
        self.core.read().expect("accessory poisoned").clone()
    }

    pub fn handle(&self) -> HardwareHandle {
        self.core.read().expect("accessory poisoned").handle
    }

    pub fn duration(&self) -> DelayMs {
        self.core.read().expect("accessory poisoned").duration
    }

    pub fn state(&self) -> AccessoryState {
        self.core.read().expect("accessory poisoned").state
    }

    pub fn set_state(&self, state: AccessoryState) {
        self.core.write().expect("accessory poisoned").state = state;
    }

    pub fn update(&self, core: AccessoryCore) -> Result<(), RailError> {
        if self.lockable.is_in_use() {
            return Err(RailError::ConfigInvalid(format!(
                "accessory {} is in use",
                self.object_name()
            )));
        }
        *self.core.write().expect("accessory poisoned") = core;
        Ok(())
    }

    pub fn serialize(&self) -> String {
        let core = self.core.read().expect("accessory poisoned");
        let writer = Writer::new("Accessory")
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
        if props.object_type() != Some("Accessory") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not an Accessory".to_string(),
            ));
        }
        let core = AccessoryCore {
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
            state: AccessoryState::from_code(props.get_u8("state", 0)),
        };
        let accessory = Accessory::new(AccessoryId(props.get_u16("id", 0)), core);
        accessory.lockable.read_fields(&props);
        Ok(accessory)
    }
}

impl LockableObject for Accessory {
    fn lockable(&self) -> &Lockable {
        &self.lockable
    }

    fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier::accessory(self.id)
    }

    fn object_name(&self) -> String {
        self.core.read().expect("accessory poisoned").name.clone()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
