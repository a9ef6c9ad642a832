//! Manager CRUD validation and fan-out behavior.

use std::sync::{Arc, Mutex};

use railyard_common::datatypes::{
    BoosterState, FeedbackState, HardwareHandle, Orientation, Protocol, Speed,
};
use railyard_common::error::RailError;
use railyard_common::ids::{ControlId, LayerId, LocoId, ObjectIdentifier, TrackId};
use railyard_common::model::feedback::FeedbackCore;
use railyard_common::model::loco::LocoCore;
use railyard_common::model::route::RouteCore;
use railyard_common::model::track::{TrackBaseCore, TrackCore};
use railyard_common::model::{LayoutPosition, LockableObject, TrackBase};
use railyard_common::settings::Settings;

use railyard_control::manager::Manager;
use railyard_control::observer::LayoutObserver;

fn manager() -> Arc<Manager> {
    Arc::new(Manager::new(Settings::default()))
}

fn track_core(name: &str, x: u16) -> TrackCore {
    TrackCore {
        name: name.to_string(),
        position: LayoutPosition {
            x,
            y: 0,
            ..LayoutPosition::default()
        },
        visible: true,
        base: TrackBaseCore::default(),
    }
}

fn loco_core(name: &str, address: u16) -> LocoCore {
    LocoCore {
        name: name.to_string(),
        handle: HardwareHandle::new(ControlId(1), Protocol::DCC, address),
        ..LocoCore::default()
    }
}

fn feedback_core(name: &str, pin: u16, x: u16) -> FeedbackCore {
    FeedbackCore {
        name: name.to_string(),
        position: LayoutPosition {
            x,
            y: 10,
            ..LayoutPosition::default()
        },
        visible: true,
        control: ControlId(1),
        pin,
        inverted: false,
        track: None,
    }
}

#[test]
fn names_must_be_codec_safe() {
    let manager = manager();
    assert!(matches!(
        manager.track_save(None, track_core("bad;name", 0)),
        Err(RailError::ConfigInvalid(_))
    ));
    assert!(manager.track_save(None, track_core("good name", 0)).is_ok());
}

#[test]
fn visible_positions_are_unique_per_layer() {
    let manager = manager();
    manager.track_save(None, track_core("A", 5)).unwrap();
    let err = manager.track_save(None, track_core("B", 5)).unwrap_err();
    assert!(matches!(err, RailError::ConfigInvalid(_)));

    // Invisible items do not collide.
    let mut hidden = track_core("C", 5);
    hidden.visible = false;
    assert!(manager.track_save(None, hidden).is_ok());

    // A different cell on the same layer is fine.
    let mut other_cell = track_core("D", 5);
    other_cell.position.y = 1;
    assert!(manager.track_save(None, other_cell).is_ok());
}

#[test]
fn loco_addresses_unique_per_control() {
    let manager = manager();
    manager.loco_save(None, loco_core("V60", 60)).unwrap();
    let err = manager.loco_save(None, loco_core("V60 double", 60)).unwrap_err();
    assert!(matches!(err, RailError::ConfigInvalid(_)));

    // Same address on a different protocol is allowed.
    let mut mm = loco_core("V60 mm", 60);
    mm.handle.protocol = Protocol::MM2;
    assert!(manager.loco_save(None, mm).is_ok());
}

#[test]
fn feedback_pins_unique_per_control() {
    let manager = manager();
    manager
        .feedback_save(None, feedback_core("F1", 1, 20))
        .unwrap();
    let err = manager
        .feedback_save(None, feedback_core("F1 double", 1, 21))
        .unwrap_err();
    assert!(matches!(err, RailError::ConfigInvalid(_)));

    // Same pin on another control is fine.
    let mut other = feedback_core("F other", 1, 22);
    other.control = ControlId(2);
    assert!(manager.feedback_save(None, other).is_ok());
}

#[test]
fn reserved_entities_refuse_mutation_and_deletion() {
    let manager = manager();
    let track = manager.track_save(None, track_core("T", 0)).unwrap();
    let loco = manager.loco_save(None, loco_core("L", 3)).unwrap();
    manager
        .track_set_loco(ObjectIdentifier::track(track), loco)
        .unwrap();

    assert!(manager.track_save(Some(track), track_core("T2", 1)).is_err());
    assert!(manager.track_delete(track).is_err());
    assert!(manager.loco_delete(loco).is_err());
}

#[test]
fn automode_route_requires_endpoints_and_stop_feedback() {
    let manager = manager();
    let t1 = manager.track_save(None, track_core("T1", 0)).unwrap();
    let t2 = manager.track_save(None, track_core("T2", 1)).unwrap();

    let mut core = RouteCore {
        name: "R".to_string(),
        automode: true,
        from_track: Some(ObjectIdentifier::track(t1)),
        to_track: Some(ObjectIdentifier::track(t2)),
        ..RouteCore::default()
    };
    // No stop feedback.
    assert!(manager.route_save(None, core.clone()).is_err());

    let stop = manager
        .feedback_save(None, feedback_core("F", 1, 20))
        .unwrap();
    core.feedback_stop = Some(stop);
    let route = manager.route_save(None, core.clone()).unwrap();

    // Dangling destination is refused.
    core.to_track = Some(ObjectIdentifier::track(TrackId(999)));
    assert!(manager.route_save(Some(route), core).is_err());
}

#[test]
fn route_save_maintains_outgoing_index() {
    let manager = manager();
    let t1 = manager.track_save(None, track_core("T1", 0)).unwrap();
    let t2 = manager.track_save(None, track_core("T2", 1)).unwrap();
    let t3 = manager.track_save(None, track_core("T3", 2)).unwrap();
    let stop = manager
        .feedback_save(None, feedback_core("F", 1, 20))
        .unwrap();

    let mut core = RouteCore {
        name: "R".to_string(),
        automode: true,
        from_track: Some(ObjectIdentifier::track(t1)),
        to_track: Some(ObjectIdentifier::track(t2)),
        feedback_stop: Some(stop),
        ..RouteCore::default()
    };
    let route = manager.route_save(None, core.clone()).unwrap();
    assert_eq!(manager.track(t1).unwrap().routes_from(), vec![route]);

    // Re-hang the route from another origin.
    core.from_track = Some(ObjectIdentifier::track(t3));
    manager.route_save(Some(route), core).unwrap();
    assert!(manager.track(t1).unwrap().routes_from().is_empty());
    assert_eq!(manager.track(t3).unwrap().routes_from(), vec![route]);

    manager.route_delete(route).unwrap();
    assert!(manager.track(t3).unwrap().routes_from().is_empty());
}

#[test]
fn layer_one_cannot_be_deleted() {
    let manager = manager();
    assert!(manager.layer_delete(LayerId::DEFAULT).is_err());

    let extra = manager.layer_save(None, "Shadow station".to_string()).unwrap();
    assert!(manager.layer_delete(extra).is_ok());
}

#[test]
fn track_save_links_feedback_backrefs() {
    let manager = manager();
    let feedback = manager
        .feedback_save(None, feedback_core("F", 1, 20))
        .unwrap();
    let mut core = track_core("T", 0);
    core.base.feedbacks = vec![feedback];
    let track = manager.track_save(None, core).unwrap();

    assert_eq!(
        manager.feedback(feedback).unwrap().related_track(),
        Some(ObjectIdentifier::track(track))
    );

    // Dropping the feedback from the track orphans it again.
    let loose = track_core("T", 0);
    manager.track_save(Some(track), loose).unwrap();
    assert_eq!(manager.feedback(feedback).unwrap().related_track(), None);
}

#[test]
fn slave_mirroring_on_speed_commands() {
    let manager = manager();
    let slave = manager.loco_save(None, loco_core("slave", 4)).unwrap();
    let mut master_core = loco_core("master", 3);
    master_core.slaves = vec![slave];
    let master = manager.loco_save(None, master_core).unwrap();

    manager.loco_speed(master, 500).unwrap();
    assert_eq!(manager.loco(master).unwrap().speed(), 500);
    assert_eq!(manager.loco(slave).unwrap().speed(), 500);

    manager.loco_orientation(master, Orientation::Left).unwrap();
    assert_eq!(manager.loco(slave).unwrap().orientation(), Orientation::Left);
}

#[test]
fn slaved_loco_cannot_be_deleted() {
    let manager = manager();
    let slave = manager.loco_save(None, loco_core("slave", 4)).unwrap();
    let mut master_core = loco_core("master", 3);
    master_core.slaves = vec![slave];
    manager.loco_save(None, master_core).unwrap();

    assert!(manager.loco_delete(slave).is_err());
}

#[test]
fn unknown_feedback_auto_added_when_enabled() {
    let manager = Arc::new(Manager::new(Settings {
        auto_add_feedback: true,
        ..Settings::default()
    }));
    manager.feedback_state(ControlId(2), 17, FeedbackState::Occupied);

    let feedback = manager.feedback_by_pin(ControlId(2), 17).expect("auto-added");
    assert_eq!(feedback.state(), FeedbackState::Occupied);
    // Auto-added feedbacks land on the control's raw grid layer.
    assert_eq!(
        feedback.core().position.layer,
        LayerId::feedback_grid_of(ControlId(2))
    );
}

#[test]
fn unknown_feedback_ignored_by_default() {
    let manager = manager();
    manager.feedback_state(ControlId(2), 17, FeedbackState::Occupied);
    assert!(manager.feedback_by_pin(ControlId(2), 17).is_none());
}

#[test]
fn occupied_free_track_stops_booster() {
    let manager = manager();
    let feedback = manager
        .feedback_save(None, feedback_core("F", 1, 20))
        .unwrap();
    let mut core = track_core("T", 0);
    core.base.feedbacks = vec![feedback];
    manager.track_save(None, core).unwrap();

    manager.booster(BoosterState::Go, None);
    assert_eq!(manager.booster_state(), BoosterState::Go);

    // Nobody owns the track; the safety policy stops the booster.
    manager.feedback_state(ControlId(1), 1, FeedbackState::Occupied);
    assert_eq!(manager.booster_state(), BoosterState::Stop);
}

#[test]
fn observers_see_committed_transitions() {
    #[derive(Default)]
    struct Recorder {
        speeds: Mutex<Vec<(LocoId, Speed)>>,
        boosters: Mutex<Vec<BoosterState>>,
    }

    impl LayoutObserver for Recorder {
        fn loco_speed_changed(&self, loco: LocoId, speed: Speed) {
            self.speeds.lock().unwrap().push((loco, speed));
        }

        fn booster_changed(&self, state: BoosterState) {
            self.boosters.lock().unwrap().push(state);
        }
    }

    let manager = manager();
    let recorder = Arc::new(Recorder::default());
    manager.register_observer(Arc::clone(&recorder) as Arc<dyn LayoutObserver>);

    let loco = manager.loco_save(None, loco_core("L", 3)).unwrap();
    manager.booster(BoosterState::Go, None);
    manager.loco_speed(loco, 100).unwrap();
    manager.loco_speed(loco, 200).unwrap();

    assert_eq!(
        recorder.speeds.lock().unwrap().as_slice(),
        &[(loco, 100), (loco, 200)]
    );
    assert_eq!(recorder.boosters.lock().unwrap().as_slice(), &[BoosterState::Go]);
}

#[test]
fn track_orientation_command_respects_ownership() {
    let manager = manager();
    let track = manager.track_save(None, track_core("T", 0)).unwrap();
    let loco = manager.loco_save(None, loco_core("L", 3)).unwrap();

    manager
        .track_orientation(ObjectIdentifier::track(track), Orientation::Left)
        .unwrap();
    assert_eq!(
        manager.track(track).unwrap().core().base.orientation,
        Orientation::Left
    );

    manager
        .track_set_loco(ObjectIdentifier::track(track), loco)
        .unwrap();
    assert!(manager
        .track_orientation(ObjectIdentifier::track(track), Orientation::Right)
        .is_err());
    // The lockable's owner check names the holder.
    let owner = manager.track(track).unwrap().lockable().owner();
    assert_eq!(owner, Some(loco));
}
