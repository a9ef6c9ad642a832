//! Scalar types and closed enums of the layout domain.
//!
//! All enums carry a stable numeric code used by the persistence codec
//! (`to_code`/`from_code`); unknown codes fall back to the documented
//! default on load.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::ControlId;

/// Commanded locomotive speed in decoder steps.
pub type Speed = u16;

/// Standstill.
pub const MIN_SPEED: Speed = 0;
/// Full scale of the internal speed range.
pub const MAX_SPEED: Speed = 1023;

/// Physical length of tracks and trains in logical units.
pub type Length = u16;

/// Inter-command spacing in milliseconds.
pub type DelayMs = u16;

/// Decoder address on a control bus.
pub type Address = u16;

/// Input pin of a feedback module.
pub type FeedbackPin = u16;

/// Locomotive function slot number.
pub type LocoFunctionNr = u8;

/// Number of addressable function slots per locomotive.
pub const MAX_LOCO_FUNCTIONS: usize = 32;

/// Seconds since the unix epoch, used for route usage stamps.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Travel orientation of a locomotive or route endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Left,
    Right,
}

impl Orientation {
    pub const fn flipped(self) -> Self {
        match self {
            Orientation::Left => Orientation::Right,
            Orientation::Right => Orientation::Left,
        }
    }

    pub const fn to_code(self) -> u8 {
        match self {
            Orientation::Left => 0,
            Orientation::Right => 1,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Orientation::Left,
            _ => Orientation::Right,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Orientation::Left => "left",
            Orientation::Right => "right",
        })
    }
}

/// Process-global track power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoosterState {
    Stop,
    Go,
}

impl BoosterState {
    pub const fn to_code(self) -> u8 {
        match self {
            BoosterState::Stop => 0,
            BoosterState::Go => 1,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => BoosterState::Stop,
            _ => BoosterState::Go,
        }
    }
}

/// Digital protocol a decoder speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    None,
    MM,
    MM2,
    MFX,
    DCC,
    SX1,
    SX2,
}

impl Protocol {
    pub const fn to_code(self) -> u8 {
        match self {
            Protocol::None => 0,
            Protocol::MM => 1,
            Protocol::MM2 => 2,
            Protocol::MFX => 3,
            Protocol::DCC => 4,
            Protocol::SX1 => 5,
            Protocol::SX2 => 6,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Protocol::MM,
            2 => Protocol::MM2,
            3 => Protocol::MFX,
            4 => Protocol::DCC,
            5 => Protocol::SX1,
            6 => Protocol::SX2,
            _ => Protocol::None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::None => "none",
            Protocol::MM => "MM",
            Protocol::MM2 => "MM2",
            Protocol::MFX => "mfx",
            Protocol::DCC => "DCC",
            Protocol::SX1 => "SX1",
            Protocol::SX2 => "SX2",
        })
    }
}

/// Protocol address triple shared by locomotives and accessories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareHandle {
    pub control: ControlId,
    pub protocol: Protocol,
    pub address: Address,
}

impl HardwareHandle {
    pub const fn new(control: ControlId, protocol: Protocol, address: Address) -> Self {
        Self {
            control,
            protocol,
            address,
        }
    }
}

/// Two-state accessory output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessoryState {
    Off,
    On,
}

impl AccessoryState {
    pub const fn to_code(self) -> u8 {
        match self {
            AccessoryState::Off => 0,
            AccessoryState::On => 1,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => AccessoryState::Off,
            _ => AccessoryState::On,
        }
    }
}

/// Position of a switch (turnout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPosition {
    Straight,
    Turnout,
    Third,
}

impl SwitchPosition {
    pub const fn to_code(self) -> u8 {
        match self {
            SwitchPosition::Straight => 0,
            SwitchPosition::Turnout => 1,
            SwitchPosition::Third => 2,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => SwitchPosition::Turnout,
            2 => SwitchPosition::Third,
            _ => SwitchPosition::Straight,
        }
    }
}

/// Aspect shown by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAspect {
    /// Red.
    Stop,
    /// Green.
    Clear,
}

impl SignalAspect {
    pub const fn to_code(self) -> u8 {
        match self {
            SignalAspect::Stop => 0,
            SignalAspect::Clear => 1,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => SignalAspect::Stop,
            _ => SignalAspect::Clear,
        }
    }
}

/// Occupancy state of a feedback input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackState {
    Free,
    Occupied,
}

impl FeedbackState {
    pub const fn to_code(self) -> u8 {
        match self {
            FeedbackState::Free => 0,
            FeedbackState::Occupied => 1,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => FeedbackState::Free,
            _ => FeedbackState::Occupied,
        }
    }

    pub const fn inverted(self) -> Self {
        match self {
            FeedbackState::Free => FeedbackState::Occupied,
            FeedbackState::Occupied => FeedbackState::Free,
        }
    }
}

/// Speed preset class a route is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedClass {
    Travel,
    Reduced,
    Creeping,
}

impl SpeedClass {
    pub const fn to_code(self) -> u8 {
        match self {
            SpeedClass::Travel => 0,
            SpeedClass::Reduced => 1,
            SpeedClass::Creeping => 2,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => SpeedClass::Reduced,
            2 => SpeedClass::Creeping,
            _ => SpeedClass::Travel,
        }
    }
}

/// Pushpull admission policy of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushpullMode {
    /// Only non-pushpull trains.
    No,
    /// Only pushpull trains.
    Only,
    /// Any train.
    Both,
}

impl PushpullMode {
    pub const fn to_code(self) -> u8 {
        match self {
            PushpullMode::No => 0,
            PushpullMode::Only => 1,
            PushpullMode::Both => 2,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => PushpullMode::No,
            1 => PushpullMode::Only,
            _ => PushpullMode::Both,
        }
    }

    /// Whether a train with the given pushpull capability may use the route.
    pub const fn admits(self, pushpull: bool) -> bool {
        match self {
            PushpullMode::Both => true,
            PushpullMode::Only => pushpull,
            PushpullMode::No => !pushpull,
        }
    }
}

/// Policy used to pick among admissible routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectRouteApproach {
    /// Defer to the next level (loco -> track-base -> global setting).
    SystemDefault,
    DoNotCare,
    Random,
    /// Prefer the destination with the shortest length that still
    /// admits the train.
    MinTrackLength,
    /// Prefer the destination unused for the longest time.
    LongestUnused,
}

impl SelectRouteApproach {
    pub const fn to_code(self) -> u8 {
        match self {
            SelectRouteApproach::SystemDefault => 0,
            SelectRouteApproach::DoNotCare => 1,
            SelectRouteApproach::Random => 2,
            SelectRouteApproach::MinTrackLength => 3,
            SelectRouteApproach::LongestUnused => 4,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => SelectRouteApproach::DoNotCare,
            2 => SelectRouteApproach::Random,
            3 => SelectRouteApproach::MinTrackLength,
            4 => SelectRouteApproach::LongestUnused,
            _ => SelectRouteApproach::SystemDefault,
        }
    }
}

/// How many track-bases an automode locomotive reserves ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrOfTracksToReserve {
    One,
    Two,
}

impl NrOfTracksToReserve {
    pub const fn to_code(self) -> u8 {
        match self {
            NrOfTracksToReserve::One => 1,
            NrOfTracksToReserve::Two => 2,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            2 => NrOfTracksToReserve::Two,
            _ => NrOfTracksToReserve::One,
        }
    }
}

/// On/off state of a locomotive function slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocoFunctionState {
    Off,
    On,
}

impl LocoFunctionState {
    pub const fn to_code(self) -> u8 {
        match self {
            LocoFunctionState::Off => 0,
            LocoFunctionState::On => 1,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => LocoFunctionState::Off,
            _ => LocoFunctionState::On,
        }
    }
}

/// UI language of localized messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    German,
    Spanish,
}

impl Language {
    pub const fn to_code(self) -> u8 {
        match self {
            Language::English => 0,
            Language::German => 1,
            Language::Spanish => 2,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Language::German,
            2 => Language::Spanish,
            _ => Language::English,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_flip() {
        assert_eq!(Orientation::Left.flipped(), Orientation::Right);
        assert_eq!(Orientation::Right.flipped(), Orientation::Left);
    }

    #[test]
    fn enum_codes_roundtrip() {
        for o in [Orientation::Left, Orientation::Right] {
            assert_eq!(Orientation::from_code(o.to_code()), o);
        }
        for p in [
            Protocol::None,
            Protocol::MM,
            Protocol::MM2,
            Protocol::MFX,
            Protocol::DCC,
            Protocol::SX1,
            Protocol::SX2,
        ] {
            assert_eq!(Protocol::from_code(p.to_code()), p);
        }
        for s in [
            SwitchPosition::Straight,
            SwitchPosition::Turnout,
            SwitchPosition::Third,
        ] {
            assert_eq!(SwitchPosition::from_code(s.to_code()), s);
        }
        for s in [SpeedClass::Travel, SpeedClass::Reduced, SpeedClass::Creeping] {
            assert_eq!(SpeedClass::from_code(s.to_code()), s);
        }
        for a in [
            SelectRouteApproach::SystemDefault,
            SelectRouteApproach::DoNotCare,
            SelectRouteApproach::Random,
            SelectRouteApproach::MinTrackLength,
            SelectRouteApproach::LongestUnused,
        ] {
            assert_eq!(SelectRouteApproach::from_code(a.to_code()), a);
        }
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(Protocol::from_code(99), Protocol::None);
        assert_eq!(SwitchPosition::from_code(99), SwitchPosition::Straight);
        assert_eq!(SpeedClass::from_code(99), SpeedClass::Travel);
        assert_eq!(
            SelectRouteApproach::from_code(99),
            SelectRouteApproach::SystemDefault
        );
    }

    #[test]
    fn pushpull_admission() {
        assert!(PushpullMode::Both.admits(true));
        assert!(PushpullMode::Both.admits(false));
        assert!(PushpullMode::Only.admits(true));
        assert!(!PushpullMode::Only.admits(false));
        assert!(!PushpullMode::No.admits(true));
        assert!(PushpullMode::No.admits(false));
    }

    #[test]
    fn feedback_state_inversion() {
        assert_eq!(
            FeedbackState::Free.inverted(),
            FeedbackState::Occupied
        );
        assert_eq!(
            FeedbackState::Occupied.inverted(),
            FeedbackState::Free
        );
    }
}
