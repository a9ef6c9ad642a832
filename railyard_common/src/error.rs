//! The shared error type of the control core.
//!
//! Reservation contention is an expected condition during route
//! selection and is retried via the next policy candidate; everything
//! else is reported upward and either parks the locomotive or moves it
//! to the error state.

use thiserror::Error;

use crate::ids::{LocoId, ObjectIdentifier};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RailError {
    /// Target already owned by another locomotive.
    #[error("already locked by loco {owner}")]
    ReservationDenied { owner: LocoId },

    /// Attempt to hard-lock something not reserved by this locomotive.
    #[error("resource is not reserved by loco {loco}")]
    LockViolation { loco: LocoId },

    /// No admissible route candidate from the current track-base.
    #[error("no route found")]
    NoRouteFound,

    /// Booster is not switched on; reserve/lock/execute fail fast.
    #[error("booster is off")]
    BoosterOff,

    /// The overrun feedback fired while the locomotive was moving.
    #[error("loco {loco} overran its stop feedback")]
    Overrun { loco: LocoId },

    /// A driver send failed. The high-level action is not retried.
    #[error("hardware unreachable: {0}")]
    HardwareUnreachable(String),

    /// Entity save/delete refused; nothing was mutated.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An identifier did not resolve to a live entity.
    #[error("unknown object {0}")]
    UnknownObject(ObjectIdentifier),
}
