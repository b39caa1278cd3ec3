//! Instrumentation hooks.
//!
//! Observers registered with [`Engine::add_observer`](crate::Engine::add_observer) are notified
//! about actor and activity life cycles while the simulation runs. Notifications are
//! fire-and-forget: observers cannot influence the simulation, and at most one observer of each
//! type is registered.

use std::any::Any;

use crate::activity::{ActivityKind, ActivityState};
use crate::event::Event;
use crate::id::{ActivityId, ActorId, HostId};
use crate::time::SimTime;

/// Receives instrumentation callbacks. Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait Observer: Any {
    fn actor_created(&mut self, now: SimTime, actor: ActorId, host: HostId) {}

    fn actor_terminated(&mut self, now: SimTime, actor: ActorId, killed: bool) {}

    fn activity_created(&mut self, now: SimTime, activity: ActivityId, kind: ActivityKind) {}

    fn activity_state_changed(
        &mut self,
        now: SimTime,
        activity: ActivityId,
        from: ActivityState,
        to: ActivityState,
    ) {
    }

    fn activity_destroyed(&mut self, now: SimTime, activity: ActivityId) {}

    fn time_advanced(&mut self, now: SimTime) {}

    fn host_state_changed(&mut self, now: SimTime, host: HostId, on: bool) {}
}

pub(crate) fn dispatch(observer: &mut dyn Observer, now: SimTime, event: &Event) {
    match *event {
        Event::ActorSpawned { actor, host } => observer.actor_created(now, actor, host),
        Event::ActorTerminated { actor, killed } => observer.actor_terminated(now, actor, killed),
        Event::ActivityCreated { activity, kind } => {
            observer.activity_created(now, activity, kind)
        }
        Event::ActivityStateChanged { activity, from, to } => {
            observer.activity_state_changed(now, activity, from, to)
        }
        Event::ActivityDestroyed(activity) => observer.activity_destroyed(now, activity),
        Event::TimeAdvanced(_) => observer.time_advanced(now),
        Event::HostStateChanged { host, on } => observer.host_state_changed(now, host, on),
        Event::ActorResumed(_) | Event::SimcallHandled { .. } | Event::LinkStateChanged { .. } => {}
    }
}
