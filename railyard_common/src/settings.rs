//! Runtime settings.
//!
//! Unlike the boot configuration these are editable while the system
//! runs and persist through the storage key-value table.

use std::collections::HashMap;

use crate::config::LogLevel;
use crate::datatypes::{Language, NrOfTracksToReserve, SelectRouteApproach};

const KEY_LANGUAGE: &str = "language";
const KEY_ACCESSORY_PULSE: &str = "accessorypulse";
const KEY_AUTO_ADD_FEEDBACK: &str = "autoaddfeedback";
const KEY_STOP_ON_FREE_TRACK: &str = "stoponfeedbackinfreetrack";
const KEY_SELECT_ROUTE: &str = "selectrouteapproach";
const KEY_TRACKS_TO_RESERVE: &str = "nroftrackstoreserve";
const KEY_LOG_LEVEL: &str = "loglevel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub language: Language,
    /// Accessory activation pulse in milliseconds.
    pub accessory_pulse_ms: u16,
    /// Create a Feedback entity when an unknown (control, pin) reports.
    pub auto_add_feedback: bool,
    /// Booster stop when an unowned track-base reports occupied.
    pub stop_on_feedback_in_free_track: bool,
    /// Global fallback route selection policy; never `SystemDefault`.
    pub default_select_route_approach: SelectRouteApproach,
    pub nr_of_tracks_to_reserve: NrOfTracksToReserve,
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: Language::English,
            accessory_pulse_ms: 100,
            auto_add_feedback: false,
            stop_on_feedback_in_free_track: true,
            default_select_route_approach: SelectRouteApproach::DoNotCare,
            nr_of_tracks_to_reserve: NrOfTracksToReserve::One,
            log_level: LogLevel::Info,
        }
    }
}

impl Settings {
    /// Key-value pairs for the storage settings table.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            (KEY_LANGUAGE.into(), self.language.to_code().to_string()),
            (
                KEY_ACCESSORY_PULSE.into(),
                self.accessory_pulse_ms.to_string(),
            ),
            (
                KEY_AUTO_ADD_FEEDBACK.into(),
                u8::from(self.auto_add_feedback).to_string(),
            ),
            (
                KEY_STOP_ON_FREE_TRACK.into(),
                u8::from(self.stop_on_feedback_in_free_track).to_string(),
            ),
            (
                KEY_SELECT_ROUTE.into(),
                self.default_select_route_approach.to_code().to_string(),
            ),
            (
                KEY_TRACKS_TO_RESERVE.into(),
                self.nr_of_tracks_to_reserve.to_code().to_string(),
            ),
            (KEY_LOG_LEVEL.into(), self.log_level.to_code().to_string()),
        ]
    }

    /// Rebuild from stored pairs; missing or unparsable keys default.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> Self {
        let defaults = Settings::default();
        let code = |key: &str, fallback: u8| -> u8 {
            pairs
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback)
        };
        let approach =
            SelectRouteApproach::from_code(code(
                KEY_SELECT_ROUTE,
                defaults.default_select_route_approach.to_code(),
            ));
        Self {
            language: Language::from_code(code(KEY_LANGUAGE, defaults.language.to_code())),
            accessory_pulse_ms: pairs
                .get(KEY_ACCESSORY_PULSE)
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.accessory_pulse_ms),
            auto_add_feedback: code(KEY_AUTO_ADD_FEEDBACK, 0) != 0,
            stop_on_feedback_in_free_track: code(KEY_STOP_ON_FREE_TRACK, 1) != 0,
            // The global fallback must resolve; SystemDefault here would recurse.
            default_select_route_approach: match approach {
                SelectRouteApproach::SystemDefault => SelectRouteApproach::DoNotCare,
                other => other,
            },
            nr_of_tracks_to_reserve: NrOfTracksToReserve::from_code(code(
                KEY_TRACKS_TO_RESERVE,
                defaults.nr_of_tracks_to_reserve.to_code(),
            )),
            log_level: LogLevel::from_code(code(KEY_LOG_LEVEL, defaults.log_level.to_code())),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
