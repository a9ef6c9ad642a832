//! Flat `key=value` persistence codec.
//!
//! Every persisted object is a semicolon-delimited string beginning
//! with `objectType=<Kind>;`. Unknown keys are ignored on load,
//! missing keys use documented defaults, so files written by newer
//! versions load in older ones and vice versa.

use std::collections::HashMap;

/// Parsed view of a serialized object string.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn parse(serialized: &str) -> Self {
        let mut values = HashMap::new();
        for part in serialized.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            values.insert(key.trim().to_string(), value.to_string());
        }
        Self { values }
    }

    /// The `objectType` discriminator, if present.
    pub fn object_type(&self) -> Option<&str> {
        self.values.get("objectType").map(String::as_str)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_u8(&self, key: &str, default: u8) -> u8 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_i16(&self, key: &str, default: i16) -> i16 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key).map(String::as_str) {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => default,
        }
    }

    /// `0` is the per-type None sentinel for identifier fields.
    pub fn get_id(&self, key: &str) -> Option<u16> {
        match self.get_u16(key, 0) {
            0 => None,
            id => Some(id),
        }
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| v.parse().ok())
    }
}

/// Builder for the serialized form.
///
/// Fields are emitted in call order so the output of an entity is
/// stable across runs.
#[derive(Debug)]
pub struct Writer {
    out: String,
}

impl Writer {
    pub fn new(object_type: &str) -> Self {
        Self {
            out: format!("objectType={object_type}"),
        }
    }

    pub fn field(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.out.push(';');
        self.out.push_str(key);
        self.out.push('=');
        self.out.push_str(&value.to_string());
        self
    }

    pub fn bool_field(self, key: &str, value: bool) -> Self {
        self.field(key, u8::from(value))
    }

    /// Identifier field with the `0` None sentinel.
    pub fn id_field(self, key: &str, value: Option<u16>) -> Self {
        self.field(key, value.unwrap_or(0))
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Rejects names that would corrupt the flat codec or the storage
/// line format.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains([';', '=', '\t', '\n', '\r'])
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_emits_in_order() {
        let s = Writer::new("Track")
            .field("id", 3)
            .field("name", "Station 1")
            .bool_field("visible", true)
            .id_field("feedback", None)
            .finish();
        assert_eq!(s, "objectType=Track;id=3;name=Station 1;visible=1;feedback=0");
    }

    #[test]
    fn parse_extracts_typed_values() {
        let p = Properties::parse("objectType=Route;id=9;delay=250;automode=1;lastused=1700000000");
        assert_eq!(p.object_type(), Some("Route"));
        assert_eq!(p.get_u16("id", 0), 9);
        assert_eq!(p.get_u16("delay", 0), 250);
        assert!(p.get_bool("automode", false));
        assert_eq!(p.get_u64("lastused", 0), 1_700_000_000);
    }

    #[test]
    fn unknown_keys_ignored_missing_keys_default() {
        let p = Properties::parse("objectType=Track;futurefield=xyz");
        assert_eq!(p.get_u16("length", 100), 100);
        assert_eq!(p.get_str("name", "fallback"), "fallback");
        assert!(!p.get_bool("blocked", false));
    }

    #[test]
    fn id_sentinel_zero_is_none() {
        let p = Properties::parse("a=0;b=7");
        assert_eq!(p.get_id("a"), None);
        assert_eq!(p.get_id("b"), Some(7));
        assert_eq!(p.get_id("missing"), None);
    }

    #[test]
    fn malformed_fragments_are_skipped() {
        let p = Properties::parse("objectType=Loco;;novalue;speed=80");
        assert_eq!(p.object_type(), Some("Loco"));
        assert_eq!(p.get_u16("speed", 0), 80);
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("Main Station West"));
        assert!(!valid_name(""));
        assert!(!valid_name("bad;name"));
        assert!(!valid_name("bad=name"));
        assert!(!valid_name("bad\tname"));
    }
}
