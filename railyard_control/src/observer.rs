//! Observer fan-out.
//!
//! Subscribers (UI push channels, storage, loggers) are notified after
//! entity state transitions commit. Notifications run on the mutating
//! thread; implementations must return quickly and must not call back
//! into the manager's mutating surface. A single observer sees a
//! consistent sequence, but observers do not see each other's
//! ordering.

use railyard_common::datatypes::{
    AccessoryState, BoosterState, FeedbackState, LocoFunctionNr, LocoFunctionState, Orientation,
    SignalAspect, Speed, SwitchPosition,
};
use railyard_common::ids::{
    AccessoryId, FeedbackId, LocoId, ObjectIdentifier, RouteId, SignalId, SwitchId,
};

/// Notification capability of a subscriber. Every method has a no-op
/// default so observers implement only what they care about.
#[allow(unused_variables)]
pub trait LayoutObserver: Send + Sync {
    fn booster_changed(&self, state: BoosterState) {}

    fn loco_speed_changed(&self, loco: LocoId, speed: Speed) {}

    fn loco_orientation_changed(&self, loco: LocoId, orientation: Orientation) {}

    fn loco_function_changed(&self, loco: LocoId, nr: LocoFunctionNr, state: LocoFunctionState) {}

    fn accessory_changed(&self, accessory: AccessoryId, state: AccessoryState) {}

    fn switch_changed(&self, switch: SwitchId, state: SwitchPosition) {}

    fn signal_changed(&self, signal: SignalId, aspect: SignalAspect) {}

    fn feedback_changed(&self, feedback: FeedbackId, state: FeedbackState) {}

    /// Occupancy or lock state of a track-base changed.
    fn track_changed(&self, track: ObjectIdentifier) {}

    fn loco_released(&self, loco: LocoId) {}

    fn route_released(&self, route: RouteId) {}

    fn route_executed(&self, route: RouteId) {}

    fn object_saved(&self, id: ObjectIdentifier) {}

    fn object_deleted(&self, id: ObjectIdentifier) {}
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl LayoutObserver for CountingObserver {
        fn booster_changed(&self, _state: BoosterState) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn defaults_are_no_ops() {
        let observer = CountingObserver {
            calls: AtomicUsize::new(0),
        };
        // Unimplemented notifications fall through silently.
        observer.loco_speed_changed(LocoId(1), 100);
        observer.track_changed(ObjectIdentifier::track(railyard_common::ids::TrackId(1)));
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);

        observer.booster_changed(BoosterState::Go);
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
    }
}
