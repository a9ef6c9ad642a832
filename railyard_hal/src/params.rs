//! Hardware parameters: one row per configured command station.

use railyard_common::error::RailError;
use railyard_common::ids::ControlId;
use railyard_common::serialize::{Properties, Writer};

/// Closed set of supported command station families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareType {
    /// Loopback driver for tests and dry-running layouts.
    Simulation,
    /// Märklin CS2/CS3 CAN over TCP.
    Cs2Tcp,
}

impl HardwareType {
    pub const fn tag(self) -> &'static str {
        match self {
            HardwareType::Simulation => "simulation",
            HardwareType::Cs2Tcp => "cs2tcp",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "simulation" => Some(HardwareType::Simulation),
            "cs2tcp" => Some(HardwareType::Cs2Tcp),
            _ => None,
        }
    }
}

/// Driver construction parameters as stored in the hardware table.
///
/// `arg1..arg5` are driver-defined strings; for `cs2tcp` arg1 is the
/// station IP address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareParams {
    pub control: ControlId,
    pub hardware_type: HardwareType,
    pub name: String,
    pub arg1: String,
    pub arg2: String,
    pub arg3: String,
    pub arg4: String,
    pub arg5: String,
}

impl HardwareParams {
    pub fn new(control: ControlId, hardware_type: HardwareType, name: &str, arg1: &str) -> Self {
        Self {
            control,
            hardware_type,
            name: name.to_string(),
            arg1: arg1.to_string(),
            arg2: String::new(),
            arg3: String::new(),
            arg4: String::new(),
            arg5: String::new(),
        }
    }

    pub fn serialize(&self) -> String {
        Writer::new("HardwareParams")
            .field("control", self.control.0)
            .field("type", self.hardware_type.tag())
            .field("name", &self.name)
            .field("arg1", &self.arg1)
            .field("arg2", &self.arg2)
            .field("arg3", &self.arg3)
            .field("arg4", &self.arg4)
            .field("arg5", &self.arg5)
            .finish()
    }

    pub fn deserialize(serialized: &str) -> Result<Self, RailError> {
        let props = Properties::parse(serialized);
        if props.object_type() != Some("HardwareParams") {
            return Err(RailError::ConfigInvalid(
                "serialized object is not HardwareParams".to_string(),
            ));
        }
        let tag = props.get_str("type", "");
        let hardware_type = HardwareType::from_tag(&tag)
            .ok_or_else(|| RailError::ConfigInvalid(format!("unknown hardware type '{tag}'")))?;
        Ok(Self {
            control: ControlId(props.get_u8("control", 0)),
            hardware_type,
            name: props.get_str("name", ""),
            arg1: props.get_str("arg1", ""),
            arg2: props.get_str("arg2", ""),
            arg3: props.get_str("arg3", ""),
            arg4: props.get_str("arg4", ""),
            arg5: props.get_str("arg5", ""),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip() {
        for hw in [HardwareType::Simulation, HardwareType::Cs2Tcp] {
            assert_eq!(HardwareType::from_tag(hw.tag()), Some(hw));
        }
        assert_eq!(HardwareType::from_tag("m6051"), None);
    }

    #[test]
    fn serialize_deserialize_idempotent() {
        let params = HardwareParams::new(
            ControlId(1),
            HardwareType::Cs2Tcp,
            "CS2 cellar",
            "192.168.1.90",
        );
        let first = params.serialize();
        let restored = HardwareParams::deserialize(&first).unwrap();
        assert_eq!(restored, params);
        assert_eq!(restored.serialize(), first);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(HardwareParams::deserialize(
            "objectType=HardwareParams;control=1;type=telex;name=x"
        )
        .is_err());
    }
}
