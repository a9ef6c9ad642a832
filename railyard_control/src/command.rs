//! Text command surface.
//!
//! The stable verbs that console and web front-ends feed into the
//! control core. Each verb maps one-to-one onto a manager call; the
//! parser is whitespace-delimited and case-insensitive on verbs and
//! keywords.

use std::sync::Arc;

use railyard_common::datatypes::{
    AccessoryState, BoosterState, LocoFunctionState, Orientation, SignalAspect, Speed,
    SwitchPosition,
};
use railyard_common::error::RailError;
use railyard_common::ids::{
    AccessoryId, LocoId, ObjectIdentifier, ObjectType, RouteId, SignalId, SwitchId, TrackId,
};

use crate::automode;
use crate::manager::Manager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Booster(BoosterState),
    LocoSpeed(LocoId, Speed),
    LocoOrientation(LocoId, Orientation),
    LocoFunction(LocoId, u8, LocoFunctionState),
    AccessoryState(AccessoryId, AccessoryState),
    SwitchState(SwitchId, SwitchPosition),
    SignalState(SignalId, SignalAspect),
    RouteExecute(RouteId),
    LocoRelease(LocoId),
    TrackSetLoco(ObjectIdentifier, LocoId),
    TrackSetBlock(ObjectIdentifier, bool),
    TrackOrientation(ObjectIdentifier, Orientation),
    LocoAutomode(LocoId),
    LocoManualMode(LocoId),
}

impl ControlCommand {
    /// Parse a command line such as `locospeed 3 80`.
    pub fn parse(line: &str) -> Result<Self, RailError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| invalid("empty command"))?
            .to_ascii_lowercase();
        let args: Vec<&str> = tokens.collect();

        let command = match verb.as_str() {
            "booster" => ControlCommand::Booster(match keyword(&args, 0)?.as_str() {
                "go" | "on" => BoosterState::Go,
                "stop" | "off" => BoosterState::Stop,
                other => return Err(invalid(&format!("unknown booster state '{other}'"))),
            }),
            "locospeed" => ControlCommand::LocoSpeed(LocoId(number(&args, 0)?), number(&args, 1)?),
            "locoorientation" => {
                ControlCommand::LocoOrientation(LocoId(number(&args, 0)?), orientation(&args, 1)?)
            }
            "locofunction" => ControlCommand::LocoFunction(
                LocoId(number(&args, 0)?),
                number::<u8>(&args, 1)?,
                match keyword(&args, 2)?.as_str() {
                    "on" | "1" => LocoFunctionState::On,
                    "off" | "0" => LocoFunctionState::Off,
                    other => return Err(invalid(&format!("unknown function state '{other}'"))),
                },
            ),
            "accessorystate" => ControlCommand::AccessoryState(
                AccessoryId(number(&args, 0)?),
                match keyword(&args, 1)?.as_str() {
                    "on" | "1" => AccessoryState::On,
                    "off" | "0" => AccessoryState::Off,
                    other => return Err(invalid(&format!("unknown accessory state '{other}'"))),
                },
            ),
            "switchstate" => ControlCommand::SwitchState(
                SwitchId(number(&args, 0)?),
                match keyword(&args, 1)?.as_str() {
                    "straight" => SwitchPosition::Straight,
                    "turnout" => SwitchPosition::Turnout,
                    "third" => SwitchPosition::Third,
                    other => return Err(invalid(&format!("unknown switch state '{other}'"))),
                },
            ),
            "signalstate" => ControlCommand::SignalState(
                SignalId(number(&args, 0)?),
                match keyword(&args, 1)?.as_str() {
                    "stop" | "red" => SignalAspect::Stop,
                    "clear" | "green" => SignalAspect::Clear,
                    other => return Err(invalid(&format!("unknown signal aspect '{other}'"))),
                },
            ),
            "routeexecute" => ControlCommand::RouteExecute(RouteId(number(&args, 0)?)),
            "locorelease" => ControlCommand::LocoRelease(LocoId(number(&args, 0)?)),
            "tracksetloco" => ControlCommand::TrackSetLoco(
                track_base(&args, 0)?,
                LocoId(number(&args, 1)?),
            ),
            "tracksetblock" => ControlCommand::TrackSetBlock(
                track_base(&args, 0)?,
                match keyword(&args, 1)?.as_str() {
                    "true" | "1" | "on" => true,
                    "false" | "0" | "off" => false,
                    other => return Err(invalid(&format!("unknown block flag '{other}'"))),
                },
            ),
            "trackorientation" => {
                ControlCommand::TrackOrientation(track_base(&args, 0)?, orientation(&args, 1)?)
            }
            "locoautomode" => ControlCommand::LocoAutomode(LocoId(number(&args, 0)?)),
            "locomanualmode" => ControlCommand::LocoManualMode(LocoId(number(&args, 0)?)),
            other => return Err(invalid(&format!("unknown command '{other}'"))),
        };
        Ok(command)
    }

    /// Apply the command to the control core.
    pub fn dispatch(self, manager: &Arc<Manager>) -> Result<(), RailError> {
        match self {
            ControlCommand::Booster(state) => {
                manager.booster(state, None);
                Ok(())
            }
            ControlCommand::LocoSpeed(loco, speed) => manager.loco_speed(loco, speed),
            ControlCommand::LocoOrientation(loco, orientation) => {
                manager.loco_orientation(loco, orientation)
            }
            ControlCommand::LocoFunction(loco, nr, state) => manager.loco_function(loco, nr, state),
            ControlCommand::AccessoryState(accessory, state) => {
                manager.accessory_state(accessory, state)
            }
            ControlCommand::SwitchState(switch, state) => manager.switch_state(switch, state),
            ControlCommand::SignalState(signal, aspect) => manager.signal_state(signal, aspect),
            ControlCommand::RouteExecute(route) => manager.route_execute(route),
            ControlCommand::LocoRelease(loco) => automode::release_loco(manager, loco),
            ControlCommand::TrackSetLoco(track, loco) => manager.track_set_loco(track, loco),
            ControlCommand::TrackSetBlock(track, blocked) => {
                manager.track_set_block(track, blocked)
            }
            ControlCommand::TrackOrientation(track, orientation) => {
                manager.track_orientation(track, orientation)
            }
            ControlCommand::LocoAutomode(loco) => automode::go_to_auto(manager, loco),
            ControlCommand::LocoManualMode(loco) => manager.loco_manual_mode(loco),
        }
    }
}

fn invalid(message: &str) -> RailError {
    RailError::ConfigInvalid(message.to_string())
}

fn keyword(args: &[&str], index: usize) -> Result<String, RailError> {
    args.get(index)
        .map(|s| s.to_ascii_lowercase())
        .ok_or_else(|| invalid("missing argument"))
}

fn number<T: std::str::FromStr>(args: &[&str], index: usize) -> Result<T, RailError> {
    args.get(index)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid("missing or invalid numeric argument"))
}

fn orientation(args: &[&str], index: usize) -> Result<Orientation, RailError> {
    match keyword(args, index)?.as_str() {
        "left" => Ok(Orientation::Left),
        "right" => Ok(Orientation::Right),
        other => Err(invalid(&format!("unknown orientation '{other}'"))),
    }
}

/// A track-base reference: a bare number is a track, `signal:<id>`
/// names a signal used as a block.
fn track_base(args: &[&str], index: usize) -> Result<ObjectIdentifier, RailError> {
    let token = keyword(args, index)?;
    if let Some(id) = token.strip_prefix("signal:") {
        let id: u16 = id
            .parse()
            .map_err(|_| invalid("invalid signal reference"))?;
        return Ok(ObjectIdentifier::new(ObjectType::Signal, id));
    }
    let raw = token.strip_prefix("track:").unwrap_or(token.as_str());
    let id: u16 = raw.parse().map_err(|_| invalid("invalid track reference"))?;
    Ok(ObjectIdentifier::track(TrackId(id)))
}

// ─── Tests ──────────────────────────────────────────────────────────
