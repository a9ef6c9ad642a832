//! The reserve/lock/release ownership protocol.
//!
//! Every reservable layout item embeds a [`Lockable`]. The state and
//! owner move together under one per-instance mutex; there is no
//! global lock. Invariant: `state == Free` exactly when no owner is
//! recorded.

use std::sync::Mutex;

use crate::error::RailError;
use crate::ids::LocoId;
use crate::serialize::{Properties, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Reserved,
    /// Intermediate used by some collaborators; equivalent to
    /// `Reserved` for the owner check.
    SoftLocked,
    HardLocked,
}

impl LockState {
    pub const fn to_code(self) -> u8 {
        match self {
            LockState::Free => 0,
            LockState::Reserved => 1,
            LockState::SoftLocked => 2,
            LockState::HardLocked => 3,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => LockState::Reserved,
            2 => LockState::SoftLocked,
            3 => LockState::HardLocked,
            _ => LockState::Free,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockInner {
    state: LockState,
    owner: Option<LocoId>,
}

/// Per-instance lock record of a reservable item.
#[derive(Debug)]
pub struct Lockable {
    inner: Mutex<LockInner>,
}

impl Lockable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockInner {
                state: LockState::Free,
                owner: None,
            }),
        }
    }

    /// Soft-claim for a locomotive.
    ///
    /// Succeeds when free, and idempotently when already owned by the
    /// same locomotive (a free-but-owned record is upgraded back to
    /// Reserved).
    pub fn reserve(&self, loco: LocoId) -> Result<(), RailError> {
        let mut inner = self.inner.lock().expect("lockable poisoned");
        if inner.owner == Some(loco) {
            if inner.state == LockState::Free {
                inner.state = LockState::Reserved;
            }
            return Ok(());
        }
        if inner.state != LockState::Free {
            // owner is always present outside Free
            let owner = inner.owner.unwrap_or(LocoId(0));
            return Err(RailError::ReservationDenied { owner });
        }
        inner.state = LockState::Reserved;
        inner.owner = Some(loco);
        Ok(())
    }

    /// Hard-claim. Requires a prior reservation by the same locomotive.
    pub fn lock(&self, loco: LocoId) -> Result<(), RailError> {
        let mut inner = self.inner.lock().expect("lockable poisoned");
        let reserved = matches!(inner.state, LockState::Reserved | LockState::SoftLocked);
        if !reserved || inner.owner != Some(loco) {
            return Err(RailError::LockViolation { loco });
        }
        inner.state = LockState::HardLocked;
        Ok(())
    }

    /// Relinquish. Trivially succeeds when already free; otherwise the
    /// caller must be the owner.
    pub fn release(&self, loco: LocoId) -> Result<(), RailError> {
        let mut inner = self.inner.lock().expect("lockable poisoned");
        if inner.state == LockState::Free && inner.owner.is_none() {
            return Ok(());
        }
        if inner.owner != Some(loco) {
            let owner = inner.owner.unwrap_or(LocoId(0));
            return Err(RailError::ReservationDenied { owner });
        }
        inner.state = LockState::Free;
        inner.owner = None;
        Ok(())
    }

    /// Administrative release bypassing the owner check.
    pub fn release_force(&self) {
        let mut inner = self.inner.lock().expect("lockable poisoned");
        inner.state = LockState::Free;
        inner.owner = None;
    }

    pub fn state(&self) -> LockState {
        self.inner.lock().expect("lockable poisoned").state
    }

    pub fn owner(&self) -> Option<LocoId> {
        self.inner.lock().expect("lockable poisoned").owner
    }

    pub fn is_in_use(&self) -> bool {
        let inner = self.inner.lock().expect("lockable poisoned");
        inner.state != LockState::Free || inner.owner.is_some()
    }

    /// True when free or already owned by the given locomotive; the
    /// admission check of route destinations.
    pub fn free_or_owned_by(&self, loco: LocoId) -> bool {
        let inner = self.inner.lock().expect("lockable poisoned");
        inner.state == LockState::Free || inner.owner == Some(loco)
    }

    /// Append the persisted fields to a serialized record.
    pub fn write_fields(&self, writer: Writer) -> Writer {
        let inner = self.inner.lock().expect("lockable poisoned");
        writer
            .field("lockState", inner.state.to_code())
            .id_field("locoID", inner.owner.map(|l| l.0))
    }

    /// Restore the persisted fields; an ownerless non-free record
    /// collapses back to Free.
    pub fn read_fields(&self, props: &Properties) {
        let mut inner = self.inner.lock().expect("lockable poisoned");
        let state = LockState::from_code(props.get_u8("lockState", 0));
        let owner = props.get_id("locoID").map(LocoId);
        match owner {
            Some(_) => {
                inner.state = state;
                inner.owner = owner;
            }
            None => {
                inner.state = LockState::Free;
                inner.owner = None;
            }
        }
    }
}

impl Default for Lockable {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const L1: LocoId = LocoId(1);
    const L2: LocoId = LocoId(2);

    #[test]
    fn fresh_lockable_is_free() {
        let l = Lockable::new();
        assert_eq!(l.state(), LockState::Free);
        assert_eq!(l.owner(), None);
        assert!(!l.is_in_use());
    }

    #[test]
    fn reserve_then_lock_then_release() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        assert_eq!(l.state(), LockState::Reserved);
        assert_eq!(l.owner(), Some(L1));

        l.lock(L1).unwrap();
        assert_eq!(l.state(), LockState::HardLocked);

        l.release(L1).unwrap();
        assert_eq!(l.state(), LockState::Free);
        assert_eq!(l.owner(), None);
    }

    #[test]
    fn reserve_is_idempotent_for_owner() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        l.reserve(L1).unwrap();
        assert_eq!(l.state(), LockState::Reserved);
        assert_eq!(l.owner(), Some(L1));
    }

    #[test]
    fn reserve_denied_for_other_loco() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        assert_eq!(
            l.reserve(L2),
            Err(RailError::ReservationDenied { owner: L1 })
        );
        // Owner unchanged.
        assert_eq!(l.owner(), Some(L1));
    }

    #[test]
    fn lock_requires_reservation_by_same_loco() {
        let l = Lockable::new();
        assert!(matches!(l.lock(L1), Err(RailError::LockViolation { .. })));

        l.reserve(L1).unwrap();
        assert!(matches!(l.lock(L2), Err(RailError::LockViolation { .. })));
        assert_eq!(l.state(), LockState::Reserved);
    }

    #[test]
    fn double_lock_is_a_violation() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        l.lock(L1).unwrap();
        assert!(matches!(l.lock(L1), Err(RailError::LockViolation { .. })));
    }

    #[test]
    fn release_by_non_owner_fails() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        assert!(l.release(L2).is_err());
        assert_eq!(l.owner(), Some(L1));
    }

    #[test]
    fn release_when_free_is_trivial() {
        let l = Lockable::new();
        assert!(l.release(L2).is_ok());
    }

    #[test]
    fn release_force_bypasses_owner() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        l.lock(L1).unwrap();
        l.release_force();
        assert_eq!(l.state(), LockState::Free);
        assert_eq!(l.owner(), None);
    }

    #[test]
    fn free_or_owned_by_gate() {
        let l = Lockable::new();
        assert!(l.free_or_owned_by(L1));
        l.reserve(L1).unwrap();
        assert!(l.free_or_owned_by(L1));
        assert!(!l.free_or_owned_by(L2));
    }

    #[test]
    fn state_owner_move_together() {
        // Free exactly when no owner, across every transition.
        let l = Lockable::new();
        let consistent = |l: &Lockable| {
            (l.state() == LockState::Free) == l.owner().is_none()
        };
        assert!(consistent(&l));
        l.reserve(L1).unwrap();
        assert!(consistent(&l));
        l.lock(L1).unwrap();
        assert!(consistent(&l));
        l.release(L1).unwrap();
        assert!(consistent(&l));
    }

    #[test]
    fn persisted_fields_roundtrip() {
        let l = Lockable::new();
        l.reserve(L1).unwrap();
        l.lock(L1).unwrap();

        let s = l.write_fields(Writer::new("Test")).finish();
        let restored = Lockable::new();
        restored.read_fields(&Properties::parse(&s));
        assert_eq!(restored.state(), LockState::HardLocked);
        assert_eq!(restored.owner(), Some(L1));
    }

    #[test]
    fn ownerless_record_collapses_to_free() {
        let l = Lockable::new();
        l.read_fields(&Properties::parse("lockState=3;locoID=0"));
        assert_eq!(l.state(), LockState::Free);
        assert_eq!(l.owner(), None);
    }
}
