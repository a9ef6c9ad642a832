//! End-to-end automode scenarios against a real manager.
//!
//! The layout is built programmatically through the CRUD surface and
//! feedback events are injected through the hardware event fan-in, so
//! these tests exercise the same paths the drivers do. No driver is
//! registered; commands update entity state only, which is what the
//! assertions observe.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use railyard_common::datatypes::{
    BoosterState, FeedbackState, HardwareHandle, NrOfTracksToReserve, Orientation, Protocol,
    SwitchPosition,
};
use railyard_common::ids::{
    ControlId, FeedbackId, LocoId, ObjectIdentifier, RouteId, SwitchId, TrackId,
};
use railyard_common::model::feedback::FeedbackCore;
use railyard_common::model::lockable::LockState;
use railyard_common::model::loco::{LocoCore, LocoState};
use railyard_common::model::relation::Relation;
use railyard_common::model::route::RouteCore;
use railyard_common::model::switch::SwitchCore;
use railyard_common::model::track::{TrackBaseCore, TrackCore};
use railyard_common::model::{LayoutPosition, LockableObject};
use railyard_common::settings::Settings;

use railyard_control::automode;
use railyard_control::manager::Manager;

const CONTROL: ControlId = ControlId(1);

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

struct Harness {
    manager: Arc<Manager>,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        Self {
            manager: Arc::new(Manager::new(settings)),
        }
    }

    fn add_feedback(&self, pin: u16) -> FeedbackId {
        self.manager
            .feedback_save(
                None,
                FeedbackCore {
                    name: format!("F{pin}"),
                    position: LayoutPosition {
                        x: 100 + pin,
                        y: 50,
                        ..LayoutPosition::default()
                    },
                    visible: true,
                    control: CONTROL,
                    pin,
                    inverted: false,
                    track: None,
                },
            )
            .expect("feedback save")
    }

    fn add_track(&self, x: u16, feedbacks: Vec<FeedbackId>) -> TrackId {
        self.manager
            .track_save(
                None,
                TrackCore {
                    name: format!("T@{x}"),
                    position: LayoutPosition {
                        x,
                        y: 0,
                        ..LayoutPosition::default()
                    },
                    visible: true,
                    base: TrackBaseCore {
                        orientation: Orientation::Right,
                        length: 200,
                        feedbacks,
                        ..TrackBaseCore::default()
                    },
                },
            )
            .expect("track save")
    }

    fn add_switch(&self, address: u16) -> SwitchId {
        self.manager
            .switch_save(
                None,
                SwitchCore {
                    name: format!("W{address}"),
                    position: LayoutPosition {
                        x: 200 + address,
                        y: 10,
                        ..LayoutPosition::default()
                    },
                    visible: true,
                    handle: HardwareHandle::new(CONTROL, Protocol::MM2, address),
                    duration: 100,
                    inverted: false,
                    state: SwitchPosition::Straight,
                },
            )
            .expect("switch save")
    }

    fn add_route(&self, core: RouteCore) -> RouteId {
        self.manager.route_save(None, core).expect("route save")
    }

    fn add_loco(&self, address: u16) -> LocoId {
        self.manager
            .loco_save(
                None,
                LocoCore {
                    name: format!("L{address}"),
                    handle: HardwareHandle::new(CONTROL, Protocol::DCC, address),
                    length: 100,
                    pushpull: false,
                    max_speed: 1023,
                    travel_speed: 80,
                    reduced_speed: 40,
                    creeping_speed: 20,
                    ..LocoCore::default()
                },
            )
            .expect("loco save")
    }

    fn auto_route(&self, from: TrackId, to: TrackId, stop: FeedbackId) -> RouteCore {
        RouteCore {
            name: format!("{from}->{to}"),
            automode: true,
            from_track: Some(ObjectIdentifier::track(from)),
            from_orientation: Orientation::Right,
            to_track: Some(ObjectIdentifier::track(to)),
            to_orientation: Orientation::Right,
            feedback_stop: Some(stop),
            delay: 0,
            ..RouteCore::default()
        }
    }

    fn fire(&self, pin: u16) {
        self.manager
            .feedback_state(CONTROL, pin, FeedbackState::Occupied);
    }

    fn lock_state(&self, id: ObjectIdentifier) -> (LockState, Option<LocoId>) {
        let manager: &Manager = &self.manager;
        match id.kind {
            railyard_common::ids::ObjectType::Track => {
                let track = manager.track(TrackId(id.id)).unwrap();
                (track.lockable().state(), track.lockable().owner())
            }
            railyard_common::ids::ObjectType::Route => {
                let route = manager.route(RouteId(id.id)).unwrap();
                (route.lockable().state(), route.lockable().owner())
            }
            railyard_common::ids::ObjectType::Switch => {
                let switch = manager.switch(SwitchId(id.id)).unwrap();
                (switch.lockable().state(), switch.lockable().owner())
            }
            _ => panic!("unsupported kind in test"),
        }
    }

    fn shutdown(&self) {
        self.manager.shutdown();
    }
}

/// Tail-lock invariant over the operational states.
fn assert_tail_invariant(harness: &Harness, loco_id: LocoId) {
    let loco = harness.manager.loco(loco_id).unwrap();
    let auto = loco.auto_state();
    match auto.state() {
        LocoState::Manual | LocoState::Terminated | LocoState::Error => {}
        _ => {
            let tail = auto.track_from.as_ref().expect("automode loco has a tail");
            assert_eq!(tail.lockable().owner(), Some(loco_id));
            assert_eq!(tail.lockable().state(), LockState::HardLocked);
        }
    }
}

// ─── S1: happy path with one head ───────────────────────────────────

#[test]
fn s1_happy_path_one_head() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f1 = harness.add_feedback(1);
    let f2 = harness.add_feedback(2);
    let t1 = harness.add_track(0, vec![f1]);
    let t2 = harness.add_track(1, vec![f2]);
    let r1 = harness.add_route(harness.auto_route(t1, t2, f2));
    let loco_id = harness.add_loco(3);

    manager.booster(BoosterState::Go, None);
    manager
        .track_set_loco(ObjectIdentifier::track(t1), loco_id)
        .unwrap();
    automode::go_to_auto(&harness.manager, loco_id).unwrap();

    let loco = manager.loco(loco_id).unwrap();
    // Route reserved and locked, loco commanded to the travel preset.
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Running && loco.speed() == 80
    }));
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r1)),
        (LockState::HardLocked, Some(loco_id))
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t2)),
        (LockState::HardLocked, Some(loco_id))
    );
    // Orientation follows the route's departure orientation.
    assert_eq!(loco.orientation(), Orientation::Right);
    assert_tail_invariant(&harness, loco_id);

    // The stop feedback arrives.
    harness.fire(2);
    assert!(wait_for(Duration::from_secs(5), || loco.speed() == 0));
    assert!(wait_for(Duration::from_secs(5), || {
        harness.lock_state(ObjectIdentifier::route(r1)).0 == LockState::Free
    }));
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t1)),
        (LockState::Free, None)
    );
    // The destination became the new tail.
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t2)),
        (LockState::HardLocked, Some(loco_id))
    );
    {
        let auto = loco.auto_state();
        assert_eq!(
            auto.track_from.as_ref().map(|t| t.identifier()),
            Some(ObjectIdentifier::track(t2))
        );
    }
    assert!(loco.state().is_auto());
    assert_tail_invariant(&harness, loco_id);

    harness.shutdown();
}

// ─── S2: contention ─────────────────────────────────────────────────

#[test]
fn s2_contention_exactly_one_winner() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f2 = harness.add_feedback(2);
    let t1 = harness.add_track(0, vec![]);
    let t2 = harness.add_track(1, vec![f2]);
    let sw = harness.add_switch(11);
    let mut core = harness.auto_route(t1, t2, f2);
    core.at_lock = vec![Relation::new(
        ObjectIdentifier::switch(sw),
        SwitchPosition::Straight.to_code(),
        1,
    )];
    let r = harness.add_route(core);
    let l1 = harness.add_loco(3);
    let l2 = harness.add_loco(4);

    manager.booster(BoosterState::Go, None);

    let route = manager.route(r).unwrap();
    let m1 = Arc::clone(&harness.manager);
    let m2 = Arc::clone(&harness.manager);
    let route1 = Arc::clone(&route);
    let route2 = Arc::clone(&route);
    let h1 = thread::spawn(move || route1.reserve(m1.as_ref(), l1).is_ok());
    let h2 = thread::spawn(move || route2.reserve(m2.as_ref(), l2).is_ok());
    let won1 = h1.join().unwrap();
    let won2 = h2.join().unwrap();

    // Exactly one reserves; the switch belongs to the winner.
    assert!(won1 ^ won2, "exactly one loco must win the reservation");
    let winner = if won1 { l1 } else { l2 };
    assert_eq!(
        harness.lock_state(ObjectIdentifier::switch(sw)),
        (LockState::Reserved, Some(winner))
    );
    assert_eq!(route.lockable().owner(), Some(winner));
}

// ─── S3: rollback on relation conflict ──────────────────────────────

#[test]
fn s3_reserve_rollback_frees_everything() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f2 = harness.add_feedback(2);
    let t1 = harness.add_track(0, vec![]);
    let t2 = harness.add_track(1, vec![f2]);
    let sw1 = harness.add_switch(11);
    let sw2 = harness.add_switch(12);
    let mut core = harness.auto_route(t1, t2, f2);
    core.at_lock = vec![
        Relation::new(
            ObjectIdentifier::switch(sw1),
            SwitchPosition::Straight.to_code(),
            1,
        ),
        Relation::new(
            ObjectIdentifier::switch(sw2),
            SwitchPosition::Turnout.to_code(),
            2,
        ),
    ];
    let r = harness.add_route(core);
    let l1 = harness.add_loco(3);
    let l2 = harness.add_loco(4);

    manager.booster(BoosterState::Go, None);
    // Sw2 already belongs to the other locomotive.
    manager.switch(sw2).unwrap().lockable().reserve(l2).unwrap();

    let route = manager.route(r).unwrap();
    assert!(route.reserve(manager.as_ref(), l1).is_err());

    assert_eq!(
        harness.lock_state(ObjectIdentifier::switch(sw1)),
        (LockState::Free, None)
    );
    assert_eq!(route.lockable().state(), LockState::Free);
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t2)),
        (LockState::Free, None)
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::switch(sw2)),
        (LockState::Reserved, Some(l2))
    );
}

// ─── S4: overrun ────────────────────────────────────────────────────

#[test]
fn s4_overrun_is_fatal_and_releases_everything() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f1 = harness.add_feedback(1);
    let f2 = harness.add_feedback(2);
    let f3 = harness.add_feedback(3);
    let t1 = harness.add_track(0, vec![f1]);
    let t2 = harness.add_track(1, vec![f2, f3]);
    let mut core = harness.auto_route(t1, t2, f2);
    core.feedback_over = Some(f3);
    let r1 = harness.add_route(core);
    let loco_id = harness.add_loco(3);

    manager.booster(BoosterState::Go, None);
    manager
        .track_set_loco(ObjectIdentifier::track(t1), loco_id)
        .unwrap();
    automode::go_to_auto(&harness.manager, loco_id).unwrap();

    let loco = manager.loco(loco_id).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Running
    }));

    // The overrun feedback fires before the stop feedback.
    harness.fire(3);
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Error
    }));
    assert_eq!(loco.speed(), 0);
    for id in [
        ObjectIdentifier::track(t1),
        ObjectIdentifier::track(t2),
        ObjectIdentifier::route(r1),
    ] {
        assert_eq!(harness.lock_state(id), (LockState::Free, None), "{id}");
    }

    // Recovery back to manual is explicit.
    manager.loco_manual_mode(loco_id).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Manual
    }));
    harness.shutdown();
}

// ─── S5: manual request mid-run ─────────────────────────────────────

#[test]
fn s5_manual_request_finishes_stop_sequence() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f1 = harness.add_feedback(1);
    let f2 = harness.add_feedback(2);
    let t1 = harness.add_track(0, vec![f1]);
    let t2 = harness.add_track(1, vec![f2]);
    let r1 = harness.add_route(harness.auto_route(t1, t2, f2));
    let loco_id = harness.add_loco(3);

    manager.booster(BoosterState::Go, None);
    manager
        .track_set_loco(ObjectIdentifier::track(t1), loco_id)
        .unwrap();
    automode::go_to_auto(&harness.manager, loco_id).unwrap();

    let loco = manager.loco(loco_id).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Running
    }));

    manager.loco_manual_mode(loco_id).unwrap();
    // Still driving until the stop location.
    harness.fire(2);

    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Manual
    }));
    assert_eq!(loco.speed(), 0);
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r1)),
        (LockState::Free, None)
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t1)),
        (LockState::Free, None)
    );
    // The loco remains placed on its stop track.
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t2)),
        (LockState::HardLocked, Some(loco_id))
    );
    harness.shutdown();
}

// ─── S6: two-reserve pipelining ─────────────────────────────────────

#[test]
fn s6_two_reserve_pipelines_the_head() {
    let settings = Settings {
        nr_of_tracks_to_reserve: NrOfTracksToReserve::Two,
        ..Settings::default()
    };
    let harness = Harness::new(settings);
    let manager = &harness.manager;

    let f1 = harness.add_feedback(1);
    let f2 = harness.add_feedback(2);
    let f3 = harness.add_feedback(3);
    let t1 = harness.add_track(0, vec![f1]);
    let t2 = harness.add_track(1, vec![f2]);
    let t3 = harness.add_track(2, vec![f3]);
    let r1 = harness.add_route(harness.auto_route(t1, t2, f2));
    let r2 = harness.add_route(harness.auto_route(t2, t3, f3));
    let loco_id = harness.add_loco(3);

    manager.booster(BoosterState::Go, None);
    manager
        .track_set_loco(ObjectIdentifier::track(t1), loco_id)
        .unwrap();
    automode::go_to_auto(&harness.manager, loco_id).unwrap();

    let loco = manager.loco(loco_id).unwrap();
    // Both heads locked before departure confirmation.
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Running
    }));
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r2)),
        (LockState::HardLocked, Some(loco_id))
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t3)),
        (LockState::HardLocked, Some(loco_id))
    );

    // Stop of the first route: the tail slides, the second head
    // stays locked and the locomotive keeps rolling.
    harness.fire(2);
    assert!(wait_for(Duration::from_secs(5), || {
        harness.lock_state(ObjectIdentifier::track(t1)).0 == LockState::Free
    }));
    assert!(wait_for(Duration::from_secs(5), || {
        let auto = loco.auto_state();
        auto.track_from.as_ref().map(|t| t.identifier())
            == Some(ObjectIdentifier::track(t2))
    }));
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r1)),
        (LockState::Free, None)
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r2)),
        (LockState::HardLocked, Some(loco_id))
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t3)),
        (LockState::HardLocked, Some(loco_id))
    );
    assert!(loco.speed() > 0, "pipelined continuation keeps rolling");
    assert_tail_invariant(&harness, loco_id);

    // Final stop: everything comes to rest on T3.
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Running || loco.state() == LocoState::SearchingSecond
    }));
    harness.fire(3);
    assert!(wait_for(Duration::from_secs(5), || loco.speed() == 0));
    assert!(wait_for(Duration::from_secs(5), || {
        harness.lock_state(ObjectIdentifier::route(r2)).0 == LockState::Free
    }));
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t2)),
        (LockState::Free, None)
    );
    harness.shutdown();
}

// ─── Booster stop freezes progress ──────────────────────────────────

#[test]
fn booster_stop_queues_feedbacks() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f1 = harness.add_feedback(1);
    let f2 = harness.add_feedback(2);
    let t1 = harness.add_track(0, vec![f1]);
    let t2 = harness.add_track(1, vec![f2]);
    let r1 = harness.add_route(harness.auto_route(t1, t2, f2));
    let loco_id = harness.add_loco(3);

    manager.booster(BoosterState::Go, None);
    manager
        .track_set_loco(ObjectIdentifier::track(t1), loco_id)
        .unwrap();
    automode::go_to_auto(&harness.manager, loco_id).unwrap();

    let loco = manager.loco(loco_id).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        loco.state() == LocoState::Running
    }));

    // Power fails; the stop feedback fires while dark.
    manager.booster(BoosterState::Stop, None);
    harness.fire(2);
    thread::sleep(Duration::from_millis(600));
    // No state advance: the route stays locked.
    assert_eq!(loco.state(), LocoState::Running);
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r1)),
        (LockState::HardLocked, Some(loco_id))
    );

    // Power returns; the queued feedback is processed.
    manager.booster(BoosterState::Go, None);
    assert!(wait_for(Duration::from_secs(5), || {
        harness.lock_state(ObjectIdentifier::route(r1)).0 == LockState::Free
    }));
    harness.shutdown();
}

// ─── Release command clears the placement ───────────────────────────

#[test]
fn loco_release_frees_the_tail() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f1 = harness.add_feedback(1);
    let t1 = harness.add_track(0, vec![f1]);
    let loco_id = harness.add_loco(3);

    manager
        .track_set_loco(ObjectIdentifier::track(t1), loco_id)
        .unwrap();
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t1)),
        (LockState::HardLocked, Some(loco_id))
    );

    automode::release_loco(&harness.manager, loco_id).unwrap();
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t1)),
        (LockState::Free, None)
    );
    let loco = manager.loco(loco_id).unwrap();
    assert_eq!(loco.state(), LocoState::Manual);
    assert!(loco.auto_state().track_from.is_none());
}

// ─── No lockable ever has two hard owners ───────────────────────────

#[test]
fn p2_no_double_hard_lock_under_contention() {
    let harness = Harness::new(Settings::default());
    let manager = &harness.manager;

    let f2 = harness.add_feedback(2);
    let t1 = harness.add_track(0, vec![]);
    let t2 = harness.add_track(1, vec![f2]);
    let sw = harness.add_switch(11);
    let mut core = harness.auto_route(t1, t2, f2);
    core.at_lock = vec![Relation::new(
        ObjectIdentifier::switch(sw),
        SwitchPosition::Straight.to_code(),
        1,
    )];
    let r = harness.add_route(core);
    manager.booster(BoosterState::Go, None);

    // Hammer the reserve/lock/release cycle from several locos.
    let mut handles = Vec::new();
    for address in 10..14 {
        let loco_id = harness.add_loco(address);
        let m = Arc::clone(&harness.manager);
        let route = m.route(r).unwrap();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                if route.reserve(m.as_ref(), loco_id).is_ok() {
                    if route.lock(m.as_ref(), loco_id).is_ok() {
                        // While hard-locked, this loco must be the only
                        // owner of the switch.
                        route.release_with_destination(m.as_ref(), loco_id);
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // After the storm every resource is free again.
    assert_eq!(
        harness.lock_state(ObjectIdentifier::switch(sw)),
        (LockState::Free, None)
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::route(r)),
        (LockState::Free, None)
    );
    assert_eq!(
        harness.lock_state(ObjectIdentifier::track(t2)),
        (LockState::Free, None)
    );
}
