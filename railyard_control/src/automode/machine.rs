//! Pure per-locomotive state transitions.
//!
//! The table below is the single source of truth for which automode
//! transitions are legal; the threaded runner performs the side
//! effects and applies events through [`transition`]. Keeping the
//! table pure makes every row testable without a layout.

use railyard_common::model::loco::LocoState;

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded with the new state.
    Ok(LocoState),
    /// Transition rejected with the reason.
    Rejected(&'static str),
}

/// Event that can move a locomotive between automode states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocoEvent {
    /// Operator sends the locomotive into automode (guard: placed on
    /// a track-base).
    GoAuto,
    /// Booster is on; the first route search may begin.
    BoosterGo,
    /// First route reserved and locked.
    FirstRouteLocked,
    /// Head complete (with or without a second route); start driving.
    HeadReady,
    /// Sticky manual-mode request observed.
    ManualRequested,
    /// Stop feedback fired and a locked second route takes over.
    StopWithNewHead,
    /// Stop feedback fired with no second route; loco at standstill.
    StopWithoutHead,
    /// Stop sequence finished while a manual request was pending.
    StopCompleted,
    /// Overrun feedback fired while still moving.
    Overrun,
    /// Unrecoverable internal failure.
    InternalFault,
    /// Operator recovery out of the error state.
    Recover,
    /// Runner shutdown.
    Terminate,
}

/// Attempt a transition.
pub fn transition(state: LocoState, event: LocoEvent) -> TransitionResult {
    use LocoEvent::*;
    use LocoState::*;

    let next = match (state, event) {
        (Manual, GoAuto) => Off,

        (Off, BoosterGo) => SearchingFirst,

        (SearchingFirst, FirstRouteLocked) => SearchingSecond,

        (SearchingSecond, HeadReady) => Running,

        // A waiting or searching locomotive drops to manual directly.
        (Off | SearchingFirst | SearchingSecond, ManualRequested) => Manual,
        // A moving one finishes the current head first.
        (Running, ManualRequested) => Stopping,

        (Running, StopWithNewHead) => SearchingSecond,
        (Running, StopWithoutHead) => SearchingFirst,
        (Running | Stopping, StopCompleted) => Manual,

        (Running | Stopping, Overrun) => Error,

        (Error, Recover) => Manual,

        // Faults and shutdown apply from any automode state.
        (s, InternalFault) if s.is_auto() => Error,
        (s, Terminate) if s != Terminated => Terminated,

        _ => return TransitionResult::Rejected(rejection_reason(state, event)),
    };
    TransitionResult::Ok(next)
}

fn rejection_reason(state: LocoState, event: LocoEvent) -> &'static str {
    use LocoState::*;
    match (state, event) {
        (Error, _) => "error state requires explicit recovery",
        (Terminated, _) => "terminated runner cannot transition",
        (Manual, _) => "manual locomotive only accepts go-to-auto",
        (Off, _) => "waiting for booster",
        (SearchingFirst, _) => "searching first route",
        (SearchingSecond, _) => "searching second route",
        (Running, _) => "running",
        (Stopping, _) => "stopping",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
