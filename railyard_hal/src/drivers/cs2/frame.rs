//! Märklin CAN frame codec.
//!
//! Every datagram is 13 bytes: a 4-byte CAN identifier
//! (priority, command, response bit, sender hash), a length byte and
//! 8 data bytes. The same framing is used over TCP and UDP.

use railyard_common::datatypes::{Address, BoosterState, FeedbackState, Protocol, Speed, MAX_SPEED};

pub const FRAME_LEN: usize = 13;

/// Fixed sender hash of this application on the CAN bus.
pub const HASH: u16 = 0x7337;

pub const CMD_SYSTEM: u8 = 0x00;
pub const CMD_LOCO_SPEED: u8 = 0x04;
pub const CMD_LOCO_DIRECTION: u8 = 0x05;
pub const CMD_LOCO_FUNCTION: u8 = 0x06;
pub const CMD_ACCESSORY: u8 = 0x0B;
pub const CMD_S88_EVENT: u8 = 0x11;

const SYSTEM_STOP: u8 = 0x00;
const SYSTEM_GO: u8 = 0x01;

/// Address bases of the unified locomotive identifier space.
const UID_BASE_MFX: u32 = 0x4000;
const UID_BASE_DCC: u32 = 0xC000;
/// Address bases of the accessory identifier space.
const UID_BASE_ACC_MM: u32 = 0x3000;
const UID_BASE_ACC_DCC: u32 = 0x3800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    pub prio: u8,
    pub command: u8,
    pub response: bool,
    pub hash: u16,
    pub dlc: u8,
    pub data: [u8; 8],
}

impl CanFrame {
    pub fn new(command: u8, dlc: u8, data: [u8; 8]) -> Self {
        Self {
            prio: 0,
            command,
            response: false,
            hash: HASH,
            dlc,
            data,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let id: u32 = (u32::from(self.prio) << 25)
            | (u32::from(self.command) << 17)
            | (u32::from(self.response) << 16)
            | u32::from(self.hash);
        let mut out = [0u8; FRAME_LEN];
        out[..4].copy_from_slice(&id.to_be_bytes());
        out[4] = self.dlc;
        out[5..].copy_from_slice(&self.data);
        out
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != FRAME_LEN {
            return None;
        }
        let id = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let dlc = raw[4];
        if dlc > 8 {
            return None;
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&raw[5..]);
        Some(Self {
            prio: ((id >> 25) & 0x0F) as u8,
            command: ((id >> 17) & 0xFF) as u8,
            response: (id >> 16) & 0x01 != 0,
            hash: (id & 0xFFFF) as u16,
            dlc,
            data,
        })
    }
}

/// Unified locomotive identifier of a protocol/address pair.
pub fn loco_uid(protocol: Protocol, address: Address) -> u32 {
    let address = u32::from(address);
    match protocol {
        Protocol::MFX => UID_BASE_MFX + address,
        Protocol::DCC | Protocol::SX1 | Protocol::SX2 => UID_BASE_DCC + address,
        _ => address,
    }
}

/// Unified accessory identifier; on the wire addresses count from zero.
pub fn accessory_uid(protocol: Protocol, address: Address) -> u32 {
    let address = u32::from(address.saturating_sub(1));
    match protocol {
        Protocol::DCC => UID_BASE_ACC_DCC + address,
        _ => UID_BASE_ACC_MM + address,
    }
}

pub fn system_frame(state: BoosterState) -> CanFrame {
    let mut data = [0u8; 8];
    data[4] = match state {
        BoosterState::Stop => SYSTEM_STOP,
        BoosterState::Go => SYSTEM_GO,
    };
    CanFrame::new(CMD_SYSTEM, 5, data)
}

pub fn loco_speed_frame(protocol: Protocol, address: Address, speed: Speed) -> CanFrame {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&loco_uid(protocol, address).to_be_bytes());
    // Internal 0..=1023 scales to the wire range 0..=1000.
    let wire = u32::from(speed.min(MAX_SPEED)) * 1000 / u32::from(MAX_SPEED);
    data[4..6].copy_from_slice(&(wire as u16).to_be_bytes());
    CanFrame::new(CMD_LOCO_SPEED, 6, data)
}

pub fn loco_direction_frame(protocol: Protocol, address: Address, forward: bool) -> CanFrame {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&loco_uid(protocol, address).to_be_bytes());
    data[4] = if forward { 1 } else { 2 };
    CanFrame::new(CMD_LOCO_DIRECTION, 5, data)
}

pub fn loco_function_frame(protocol: Protocol, address: Address, nr: u8, on: bool) -> CanFrame {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&loco_uid(protocol, address).to_be_bytes());
    data[4] = nr;
    data[5] = u8::from(on);
    CanFrame::new(CMD_LOCO_FUNCTION, 6, data)
}

pub fn accessory_frame(protocol: Protocol, address: Address, position: u8, power: bool) -> CanFrame {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&accessory_uid(protocol, address).to_be_bytes());
    data[4] = position;
    data[5] = u8::from(power);
    CanFrame::new(CMD_ACCESSORY, 6, data)
}

/// Decode a system go/stop datagram.
pub fn as_system_event(frame: &CanFrame) -> Option<BoosterState> {
    if frame.command != CMD_SYSTEM || frame.dlc < 5 {
        return None;
    }
    match frame.data[4] {
        SYSTEM_STOP => Some(BoosterState::Stop),
        SYSTEM_GO => Some(BoosterState::Go),
        _ => None,
    }
}

/// Decode an S88 feedback event into (contact, state).
pub fn as_feedback_event(frame: &CanFrame) -> Option<(u16, FeedbackState)> {
    if frame.command != CMD_S88_EVENT || frame.dlc < 6 {
        return None;
    }
    let contact = u16::from_be_bytes([frame.data[2], frame.data[3]]);
    let state = if frame.data[5] != 0 {
        FeedbackState::Occupied
    } else {
        FeedbackState::Free
    };
    Some((contact, state))
}

// ─── Tests ──────────────────────────────────────────────────────────
