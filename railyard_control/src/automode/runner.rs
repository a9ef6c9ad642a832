//! The threaded per-locomotive runner.
//!
//! Blocks on the locomotive's feedback queue with a tick timeout, so
//! feedback events are processed in delivery order and the manual and
//! terminate flags are observed within the tick period. Under booster
//! stop no state advances; dequeued feedbacks are re-queued.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use railyard_common::datatypes::{BoosterState, NrOfTracksToReserve, SelectRouteApproach,
    SpeedClass, MIN_SPEED};
use railyard_common::error::RailError;
use railyard_common::ids::{FeedbackId, LocoId, ObjectIdentifier};
use railyard_common::model::loco::{AutoState, Loco, LocoState};
use railyard_common::model::route::{order_candidates, Route};
use railyard_common::model::{LayoutContext, LockableObject, TrackBase};

use crate::automode::machine::{transition, LocoEvent, TransitionResult};
use crate::manager::Manager;

/// Wake period of the runner; bounds the latency of flag observation.
const TICK: Duration = Duration::from_millis(250);

/// Send a locomotive into automode.
///
/// Guard: the locomotive is placed on a hard-locked track-base and is
/// currently in manual mode. Spawns (or re-spawns) the runner thread.
pub fn go_to_auto(manager: &Arc<Manager>, loco_id: LocoId) -> Result<(), RailError> {
    let loco = manager
        .loco(loco_id)
        .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(loco_id)))?;
    {
        let mut auto = loco.auto_state();
        match auto.state() {
            LocoState::Manual => {}
            LocoState::Error => {
                return Err(RailError::ConfigInvalid(format!(
                    "loco {} must be recovered to manual mode first",
                    loco.object_name()
                )))
            }
            LocoState::Terminated => {
                return Err(RailError::ConfigInvalid(format!(
                    "loco {} runner is terminated",
                    loco.object_name()
                )))
            }
            // Already in automode.
            _ => return Ok(()),
        }
        let track = auto.track_from.clone().ok_or_else(|| {
            RailError::ConfigInvalid(format!(
                "loco {} is not placed on a track",
                loco.object_name()
            ))
        })?;
        if track.lockable().owner() != Some(loco_id) {
            return Err(RailError::LockViolation { loco: loco_id });
        }
        loco.clear_manual_request();
        loco.clear_terminate();
        loco.feedbacks_reached().clear();
        if !apply(&mut auto, LocoEvent::GoAuto) {
            return Err(RailError::ConfigInvalid(
                "loco cannot enter automode".to_string(),
            ));
        }
    }

    // Reap a previous, already-exited runner before spawning anew.
    if let Some(handle) = manager
        .runners
        .lock()
        .expect("manager poisoned")
        .remove(&loco_id)
    {
        let _ = handle.join();
    }

    let thread_manager = Arc::clone(manager);
    let thread_loco = Arc::clone(&loco);
    let handle = thread::Builder::new()
        .name(format!("loco-{loco_id}"))
        .spawn(move || run_loop(thread_manager, thread_loco))
        .map_err(|e| RailError::ConfigInvalid(format!("unable to spawn runner: {e}")))?;
    manager
        .runners
        .lock()
        .expect("manager poisoned")
        .insert(loco_id, handle);
    Ok(())
}

/// Stop the runner, release every owned resource and return the
/// locomotive to manual mode without a placement.
pub fn release_loco(manager: &Arc<Manager>, loco_id: LocoId) -> Result<(), RailError> {
    let loco = manager
        .loco(loco_id)
        .ok_or(RailError::UnknownObject(ObjectIdentifier::loco(loco_id)))?;
    let _ = manager.loco_speed(loco_id, MIN_SPEED);
    loco.request_terminate();
    if let Some(handle) = manager
        .runners
        .lock()
        .expect("manager poisoned")
        .remove(&loco_id)
    {
        let _ = handle.join();
    }
    {
        let mut auto = loco.auto_state();
        release_heads(manager, &loco, &mut auto);
        if let Some(tail) = auto.track_from.take() {
            if let Err(err) = tail.lockable().release(loco_id) {
                debug!(track = %tail.object_name(), %err, "unable to release tail");
            }
            manager.notify_track_changed(tail.identifier());
        }
        loco.feedbacks_reached().clear();
        auto.wait_until = None;
        auto.set_state(LocoState::Manual);
    }
    loco.clear_terminate();
    loco.clear_manual_request();
    info!(loco = %loco.object_name(), "loco released");
    manager.notify_loco_released(loco_id);
    Ok(())
}

fn apply(auto: &mut AutoState, event: LocoEvent) -> bool {
    match transition(auto.state(), event) {
        TransitionResult::Ok(next) => {
            auto.set_state(next);
            true
        }
        TransitionResult::Rejected(reason) => {
            debug!(?event, %reason, "transition rejected");
            false
        }
    }
}

fn run_loop(manager: Arc<Manager>, loco: Arc<Loco>) {
    let span = info_span!("automode", loco = %loco.object_name());
    let _guard = span.enter();
    info!("runner started");

    loop {
        let event = loco.feedbacks_reached().pop_timeout(TICK);

        if loco.terminate_requested() {
            let mut auto = loco.auto_state();
            apply(&mut auto, LocoEvent::Terminate);
            break;
        }

        if manager.booster_state() == BoosterState::Stop {
            // Pending feedbacks queue up; nothing advances until Go.
            if let Some(feedback) = event {
                loco.feedbacks_reached().push_front(feedback);
            }
            continue;
        }

        let mut auto = loco.auto_state();
        match auto.state() {
            LocoState::Manual | LocoState::Terminated => break,
            LocoState::Error => {
                if loco.manual_mode_requested() {
                    loco.clear_manual_request();
                    apply(&mut auto, LocoEvent::Recover);
                    info!("recovered to manual mode");
                }
            }
            LocoState::Off => {
                if !enter_manual_if_requested(&manager, &loco, &mut auto) {
                    apply(&mut auto, LocoEvent::BoosterGo);
                }
            }
            LocoState::SearchingFirst => {
                if !enter_manual_if_requested(&manager, &loco, &mut auto) {
                    search_first(&manager, &loco, &mut auto);
                }
            }
            LocoState::SearchingSecond => {
                // Standstill only: a pipelined continuation keeps
                // rolling and honors the request at the next stop.
                if loco.speed() > MIN_SPEED
                    || !enter_manual_if_requested(&manager, &loco, &mut auto)
                {
                    search_second(&manager, &loco, &mut auto);
                }
            }
            LocoState::Running | LocoState::Stopping => {
                if auto.state() == LocoState::Running && loco.manual_mode_requested() {
                    apply(&mut auto, LocoEvent::ManualRequested);
                    info!("manual requested, stopping at the next stop location");
                }
                if let Some(feedback) = event {
                    location_reached(&manager, &loco, &mut auto, feedback);
                }
            }
        }
        if matches!(auto.state(), LocoState::Manual | LocoState::Terminated) {
            break;
        }
    }
    info!("runner terminated");
}

/// Between routes with the request flag set: release any held head and
/// drop to manual. The tail stays hard-locked; the locomotive remains
/// placed on the layout.
fn enter_manual_if_requested(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState) -> bool {
    if !loco.manual_mode_requested() {
        return false;
    }
    release_heads(manager, loco, auto);
    loco.clear_manual_request();
    apply(auto, LocoEvent::ManualRequested);
    info!("switched to manual mode");
    true
}

fn search_first(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState) {
    if let Some(wait_until) = auto.wait_until {
        if Instant::now() < wait_until {
            return;
        }
        auto.wait_until = None;
    }
    let Some(track_from) = auto.track_from.clone() else {
        internal_fault(manager, loco, auto, "no tail track in automode");
        return;
    };
    // A standing locomotive may turn if it is pushpull.
    if let Some((route, destination)) = search_destination(manager, loco, &track_from, true) {
        destination.set_orientation(route.to_orientation());
        manager.notify_track_changed(destination.identifier());
        auto.route_first = Some(route);
        auto.track_first = Some(destination);
        auto.head_executed = false;
        apply(auto, LocoEvent::FirstRouteLocked);
    }
}

fn search_second(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState) {
    let two_reserve =
        manager.settings().nr_of_tracks_to_reserve == NrOfTracksToReserve::Two;
    if two_reserve && auto.route_second.is_none() && !loco.manual_mode_requested() {
        if let Some(track_first) = auto.track_first.clone() {
            if let Some((route, destination)) = search_destination(manager, loco, &track_first, false)
            {
                destination.set_orientation(route.to_orientation());
                manager.notify_track_changed(destination.identifier());
                // Set the points of the second head ahead of the train.
                match route.execute(manager.as_ref()) {
                    Ok(()) => manager.notify_route_executed(route.id()),
                    Err(err) => debug!(route = %route.object_name(), %err,
                        "unable to execute second route"),
                }
                auto.route_second = Some(route);
                auto.track_second = Some(destination);
            }
        }
    }
    start_running(manager, loco, auto);
}

fn start_running(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState) {
    let Some(route) = auto.route_first.clone() else {
        internal_fault(manager, loco, auto, "no head route to drive");
        return;
    };
    if !auto.head_executed {
        if let Err(err) = route.execute(manager.as_ref()) {
            error!(route = %route.object_name(), %err, "unable to execute route");
            internal_fault(manager, loco, auto, "route execution failed");
            return;
        }
        manager.notify_route_executed(route.id());
        let _ = manager.loco_orientation(loco.id(), route.from_orientation());
        auto.head_executed = true;
    }
    let target = loco.speed_for(route.speed_class());
    let _ = manager.loco_speed(loco.id(), target);
    apply(auto, LocoEvent::HeadReady);
}

/// Candidate selection: admissible outgoing routes whose destination
/// is free (or already ours) and not blocked, ordered per the
/// resolved selection policy, tried until one reserves and locks.
fn search_destination(
    manager: &Arc<Manager>,
    loco: &Arc<Loco>,
    from: &Arc<dyn TrackBase>,
    allow_turn: bool,
) -> Option<(Arc<Route>, Arc<dyn TrackBase>)> {
    let origin = from.identifier();
    let origin_orientation = from.orientation();
    let mut candidates = Vec::new();
    for route_id in from.routes_from() {
        let Some(route) = manager.route(route_id) else {
            continue;
        };
        if !route.admits_from(
            origin,
            origin_orientation,
            loco.length(),
            loco.pushpull(),
            allow_turn,
        ) {
            continue;
        }
        let Some(destination) = route.to_track().and_then(|to| manager.track_base(to)) else {
            continue;
        };
        if destination.is_blocked() {
            debug!(route = %route.object_name(), "destination is blocked");
            continue;
        }
        if !destination.lockable().free_or_owned_by(loco.id()) {
            continue;
        }
        if !route.lockable().free_or_owned_by(loco.id()) {
            continue;
        }
        candidates.push(route);
    }

    let approach = resolve_approach(manager, loco, from);
    for route in order_candidates(candidates, approach, manager.as_ref()) {
        if let Err(err) = route.reserve(manager.as_ref(), loco.id()) {
            debug!(route = %route.object_name(), %err, "unable to reserve route");
            continue;
        }
        if let Err(err) = route.lock(manager.as_ref(), loco.id()) {
            debug!(route = %route.object_name(), %err, "unable to lock route");
            continue;
        }
        let destination = route.to_track().and_then(|to| manager.track_base(to))?;
        info!(route = %route.object_name(), destination = %destination.object_name(),
            "route locked");
        return Some((route, destination));
    }
    debug!(from = %from.object_name(), "no route found");
    None
}

/// Loco-level override, else track-base level, else the global
/// setting.
fn resolve_approach(
    manager: &Arc<Manager>,
    loco: &Arc<Loco>,
    from: &Arc<dyn TrackBase>,
) -> SelectRouteApproach {
    match loco.select_route_approach() {
        SelectRouteApproach::SystemDefault => match from.select_route_approach() {
            SelectRouteApproach::SystemDefault => manager.settings().default_select_route_approach,
            approach => approach,
        },
        approach => approach,
    }
}

fn location_reached(
    manager: &Arc<Manager>,
    loco: &Arc<Loco>,
    auto: &mut AutoState,
    feedback: FeedbackId,
) {
    let Some(route) = auto.route_first.clone() else {
        debug!(%feedback, "feedback without an active route");
        return;
    };
    if Some(feedback) == route.feedback_over() {
        if loco.speed() > MIN_SPEED {
            error!(route = %route.object_name(), "stop location overrun");
            let _ = manager.loco_speed(loco.id(), MIN_SPEED);
            release_everything(manager, loco, auto);
            apply(auto, LocoEvent::Overrun);
        }
        return;
    }
    if Some(feedback) == route.feedback_stop() {
        stop_reached(manager, loco, auto, &route);
        return;
    }
    if Some(feedback) == route.feedback_creep() {
        let creeping = loco.speed_for(SpeedClass::Creeping);
        if loco.speed() > creeping {
            let _ = manager.loco_speed(loco.id(), creeping);
        }
        return;
    }
    if Some(feedback) == route.feedback_reduced() {
        let reduced = loco.speed_for(SpeedClass::Reduced);
        if loco.speed() > reduced {
            let _ = manager.loco_speed(loco.id(), reduced);
        }
        return;
    }
    debug!(%feedback, "feedback not relevant for the current route");
}

/// The stop location of the head route was reached: run the unlock
/// relations, release the route and the old tail, slide the resource
/// window forward and decide how to continue.
fn stop_reached(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState, route: &Arc<Route>) {
    let stopping = auto.state() == LocoState::Stopping;
    let pipelined = auto.route_second.is_some() && !stopping;

    if !pipelined {
        let _ = manager.loco_speed(loco.id(), MIN_SPEED);
    }

    route.execute_at_unlock(manager.as_ref());
    route.release(manager.as_ref(), loco.id());
    manager.notify_route_released(route.id());

    if let Some(old_tail) = auto.track_from.take() {
        if let Err(err) = old_tail.lockable().release(loco.id()) {
            warn!(track = %old_tail.object_name(), %err, "unable to release old tail");
        }
        manager.notify_track_changed(old_tail.identifier());
    }
    auto.track_from = auto.track_first.take();
    auto.track_first = auto.track_second.take();
    auto.route_first = auto.route_second.take();
    if let Some(track) = &auto.track_from {
        manager.notify_track_changed(track.identifier());
    }

    let wait = route.wait_after_release();
    if wait > 0 {
        auto.wait_until = Some(Instant::now() + Duration::from_secs(u64::from(wait)));
    }

    if stopping {
        release_heads(manager, loco, auto);
        loco.clear_manual_request();
        apply(auto, LocoEvent::StopCompleted);
        info!("stopped, now in manual mode");
        return;
    }

    match auto.route_first.clone() {
        Some(next) => {
            // The promoted head was executed when it locked; keep
            // rolling at its speed class.
            auto.head_executed = true;
            let target = loco.speed_for(next.speed_class());
            let _ = manager.loco_speed(loco.id(), target);
            apply(auto, LocoEvent::StopWithNewHead);
        }
        None => {
            auto.head_executed = false;
            apply(auto, LocoEvent::StopWithoutHead);
        }
    }
}

/// Release the head resources (routes with their destinations and the
/// head track slots); the tail stays untouched.
fn release_heads(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState) {
    for route in [auto.route_first.take(), auto.route_second.take()]
        .into_iter()
        .flatten()
    {
        route.release_with_destination(manager.as_ref(), loco.id());
        manager.notify_route_released(route.id());
    }
    for track in [auto.track_first.take(), auto.track_second.take()]
        .into_iter()
        .flatten()
    {
        if let Err(err) = track.lockable().release(loco.id()) {
            debug!(track = %track.object_name(), %err, "head track already released");
        }
        manager.notify_track_changed(track.identifier());
    }
    auto.head_executed = false;
}

/// Full teardown used by overrun and internal faults: every owned
/// lockable is freed.
fn release_everything(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState) {
    release_heads(manager, loco, auto);
    if let Some(tail) = auto.track_from.take() {
        if let Err(err) = tail.lockable().release(loco.id()) {
            debug!(track = %tail.object_name(), %err, "tail already released");
        }
        manager.notify_track_changed(tail.identifier());
    }
    loco.feedbacks_reached().clear();
    auto.wait_until = None;
}

fn internal_fault(manager: &Arc<Manager>, loco: &Arc<Loco>, auto: &mut AutoState, reason: &str) {
    error!(%reason, "automode fault");
    let _ = manager.loco_speed(loco.id(), MIN_SPEED);
    release_everything(manager, loco, auto);
    apply(auto, LocoEvent::InternalFault);
}
