//! Presentation layers.

use std::sync::RwLock;

use crate::error::RailError;
use crate::ids::LayerId;
use crate::serialize::{Properties, Writer};

#[derive(Debug)]
pub struct Layer {
    id: LayerId,
    name: RwLock<String>,
}

impl Layer {
    pub fn new(id: LayerId, name: String) -> Self {
        Self {
            id,
            name: RwLock::new(name),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().expect("layer poisoned").clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.write().expect("layer poisoned") = name;
    }

    /// True for the raw feedback grid layers owned by a control.
    pub fn is_feedback_grid(&self) -> bool {
        self.id.0 < 0
    }

    pub fn serialize(&self) -> String {
        Writer::new("Layer")
            .field("id", self.id.0)
            .field("name", self.name())
            .finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("Layer") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not a Layer".to_string(),
            ));
        }
        Ok(Layer::new(
            LayerId(props.get_i16("id", 1)),
            props.get_str("name", ""),
        ))
    }
}
