//! The resource model.
//!
//! Resources (host CPUs, network links, disk channels) have a capacity that is shared among the
//! resource actions using them. The [`ResourceEngine`] keeps every action's rate up to date
//! through a [`SharingPolicy`], projects when each action will reach its next significant point
//! (end of latency, completion or deadline) and stores those projections, together with kernel
//! timers, in the future event set. Advancing time consumes work at the current rates and
//! reports the actions that completed and the timers that fired.

pub(crate) mod fes;
pub mod sharing;

use std::collections::BTreeMap;

use tracing::trace;

use crate::id::{ActionId, ActivityId, IdCounter, TimerId};
use crate::time::SimTime;
use fes::FutureEventSet;
use sharing::{Flow, SharingPolicy};

/// Index of a resource inside the resource engine.
#[derive(Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Clone, Copy)]
pub struct ResourceId(pub(crate) usize);

impl ResourceId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct Resource {
    capacity: f64,
    on: bool,
}

/// How much work an action has to do.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Work {
    /// A fixed amount of flops or bytes.
    Amount(f64),
    /// No work at all: the action only ends at its deadline, or never.
    Unbounded,
}

/// Everything needed to start an action.
pub(crate) struct ActionSpec {
    pub(crate) owner: ActivityId,
    /// Resources whose capacity the action shares.
    pub(crate) consumes: Vec<ResourceId>,
    /// Resources that must stay on; the action fails when one of them goes off.
    pub(crate) requires: Vec<ResourceId>,
    pub(crate) work: Work,
    /// Delay before the action starts consuming capacity.
    pub(crate) latency: f64,
    /// The action completes after this many seconds, whatever its remaining work.
    pub(crate) max_duration: Option<f64>,
    pub(crate) weight: f64,
    pub(crate) bound: f64,
}

struct Action {
    owner: ActivityId,
    consumes: Vec<ResourceId>,
    requires: Vec<ResourceId>,
    cost: f64,
    remaining: Option<f64>,
    latency: f64,
    deadline: Option<SimTime>,
    weight: f64,
    bound: f64,
    rate: f64,
    suspended: bool,
    running: bool,
}

impl Action {
    fn consuming(&self) -> bool {
        !self.suspended && self.latency <= 0.0 && self.remaining.is_some()
    }

    fn next_event(&self, now: SimTime) -> Option<SimTime> {
        if self.suspended {
            return None;
        }
        let by_work = match self.remaining {
            None => None,
            Some(_) if self.latency > 0.0 => Some(now + self.latency),
            Some(remaining) if remaining <= 0.0 => Some(now),
            Some(remaining) if self.rate > 0.0 => Some(now + remaining / self.rate),
            Some(_) => None,
        };
        match (by_work, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
enum FesKey {
    Action(ActionId),
    Timer(TimerId),
}

/// What happened while advancing time.
#[derive(Debug, Default)]
pub(crate) struct Advance {
    /// Completed actions, in ascending order of their owning activity.
    pub(crate) finished: Vec<(ActionId, ActivityId)>,
    /// Fired timers in creation order.
    pub(crate) timers: Vec<TimerId>,
}

pub(crate) struct ResourceEngine {
    resources: Vec<Resource>,
    actions: BTreeMap<ActionId, Action>,
    action_ids: IdCounter<ActionId>,
    fes: FutureEventSet<FesKey>,
    policy: Box<dyn SharingPolicy>,
    now: SimTime,
    precision: f64,
    dirty: bool,
    started: Vec<ActivityId>,
}

impl ResourceEngine {
    pub(crate) fn new(policy: Box<dyn SharingPolicy>, precision: f64) -> Self {
        ResourceEngine {
            resources: Vec::new(),
            actions: BTreeMap::new(),
            action_ids: IdCounter::new(),
            fes: FutureEventSet::new(),
            policy,
            now: SimTime::ZERO,
            precision,
            dirty: false,
            started: Vec::new(),
        }
    }

    pub(crate) fn now(&self) -> SimTime {
        self.now
    }

    pub(crate) fn add_resource(&mut self, capacity: f64) -> ResourceId {
        self.resources.push(Resource { capacity, on: true });
        ResourceId(self.resources.len() - 1)
    }

    pub(crate) fn is_on(&self, resource: ResourceId) -> bool {
        self.resources[resource.0].on
    }

    /// Starts an action, or reports the first required resource that is off.
    pub(crate) fn start(&mut self, spec: ActionSpec) -> Result<ActionId, ResourceId> {
        if let Some(&off) = spec.requires.iter().find(|r| !self.is_on(**r)) {
            return Err(off);
        }
        let id = self.action_ids.next();
        let (cost, remaining) = match spec.work {
            Work::Amount(amount) => (amount, Some(amount)),
            Work::Unbounded => (0.0, None),
        };
        self.actions.insert(
            id,
            Action {
                owner: spec.owner,
                consumes: spec.consumes,
                requires: spec.requires,
                cost,
                remaining,
                latency: spec.latency,
                deadline: spec.max_duration.map(|d| self.now + d),
                weight: spec.weight,
                bound: spec.bound,
                rate: 0.0,
                suspended: false,
                running: false,
            },
        );
        self.dirty = true;
        trace!(%id, owner = %spec.owner, "action started");
        Ok(id)
    }

    /// Drops an action and its pending event. Returns false if it already finished.
    pub(crate) fn cancel(&mut self, id: ActionId) -> bool {
        self.fes.cancel(&FesKey::Action(id));
        let existed = self.actions.remove(&id).is_some();
        self.dirty |= existed;
        existed
    }

    pub(crate) fn suspend(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(&id) {
            action.suspended = true;
            self.dirty = true;
        }
    }

    pub(crate) fn resume(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(&id) {
            action.suspended = false;
            self.dirty = true;
        }
    }

    pub(crate) fn set_weight(&mut self, id: ActionId, weight: f64) {
        if let Some(action) = self.actions.get_mut(&id) {
            action.weight = weight;
            self.dirty = true;
        }
    }

    /// Work left to do, `None` for actions without a work amount.
    pub(crate) fn remaining(&self, id: ActionId) -> Option<f64> {
        self.actions.get(&id).and_then(|a| a.remaining)
    }

    /// Turns a resource on or off. Turning it off fails every action requiring it; those are
    /// removed and returned in creation order.
    pub(crate) fn set_state(&mut self, resource: ResourceId, on: bool) -> Vec<(ActionId, ActivityId)> {
        self.resources[resource.0].on = on;
        self.dirty = true;
        if on {
            return Vec::new();
        }
        let failed: Vec<(ActionId, ActivityId)> = self
            .actions
            .iter()
            .filter(|(_, a)| a.requires.contains(&resource))
            .map(|(id, a)| (*id, a.owner))
            .collect();
        for (id, _) in &failed {
            self.cancel(*id);
        }
        failed
    }

    pub(crate) fn schedule_timer(&mut self, timer: TimerId, at: SimTime) {
        self.fes.schedule(FesKey::Timer(timer), at);
    }

    pub(crate) fn cancel_timer(&mut self, timer: TimerId) {
        self.fes.cancel(&FesKey::Timer(timer));
    }

    /// Recomputes rates if anything changed since the last call and returns the owners of
    /// actions that started progressing since then.
    pub(crate) fn update(&mut self) -> Vec<ActivityId> {
        if self.dirty {
            self.dirty = false;
            self.share();
        }
        std::mem::take(&mut self.started)
    }

    fn share(&mut self) {
        let capacities: Vec<f64> = self
            .resources
            .iter()
            .map(|r| if r.on { r.capacity } else { 0.0 })
            .collect();
        let consuming: Vec<ActionId> = self
            .actions
            .iter()
            .filter(|(_, a)| a.consuming())
            .map(|(id, _)| *id)
            .collect();
        let rates = {
            let flows: Vec<Flow<'_>> = consuming
                .iter()
                .map(|id| {
                    let action = &self.actions[id];
                    Flow {
                        resources: &action.consumes,
                        weight: action.weight,
                        bound: action.bound,
                    }
                })
                .collect();
            self.policy.share(&capacities, &flows)
        };
        for action in self.actions.values_mut() {
            action.rate = 0.0;
        }
        for (id, rate) in consuming.iter().zip(rates) {
            if let Some(action) = self.actions.get_mut(id) {
                action.rate = rate;
            }
        }

        let now = self.now;
        for (id, action) in self.actions.iter_mut() {
            let key = FesKey::Action(*id);
            match action.next_event(now) {
                Some(at) => self.fes.schedule(key, at),
                None => {
                    self.fes.cancel(&key);
                }
            }
            let progressing = !action.suspended
                && (action.latency > 0.0 || action.rate > 0.0 || action.deadline.is_some());
            if progressing && !action.running {
                action.running = true;
                self.started.push(action.owner);
            }
        }
    }

    pub(crate) fn next_event_time(&mut self) -> Option<SimTime> {
        if self.dirty {
            self.dirty = false;
            self.share();
        }
        self.fes.next_time()
    }

    /// Moves the clock to `to`, consuming work at the current rates.
    pub(crate) fn advance_to(&mut self, to: SimTime) -> Advance {
        debug_assert!(to >= self.now, "time must not go backwards");
        let dt = to.since(self.now);
        for action in self.actions.values_mut().filter(|a| !a.suspended) {
            if action.latency > 0.0 {
                action.latency = (action.latency - dt).max(0.0);
            } else if let Some(remaining) = action.remaining.as_mut() {
                if action.rate.is_infinite() {
                    *remaining = 0.0;
                } else {
                    *remaining = (*remaining - action.rate * dt).max(0.0);
                }
            }
        }
        self.now = to;
        self.dirty = true;

        let mut advance = Advance::default();
        for key in self.fes.pop_until(to + self.precision) {
            match key {
                FesKey::Timer(timer) => advance.timers.push(timer),
                FesKey::Action(id) => {
                    let Some(action) = self.actions.get_mut(&id) else {
                        continue;
                    };
                    let expired = action
                        .deadline
                        .is_some_and(|d| d <= to + self.precision);
                    // a step too small to move the clock still counts as elapsed
                    if action.latency <= self.precision || to + action.latency <= to {
                        action.latency = 0.0;
                    }
                    let rate = action.rate;
                    let work_done = action.latency <= 0.0
                        && action.remaining.is_some_and(|r| {
                            r <= self.precision * action.cost.max(1.0)
                                || (rate > 0.0
                                    && (r / rate <= self.precision || to + r / rate <= to))
                        });
                    if expired || work_done {
                        if let Some(remaining) = action.remaining.as_mut() {
                            if work_done {
                                *remaining = 0.0;
                            }
                        }
                        let owner = action.owner;
                        self.actions.remove(&id);
                        advance.finished.push((id, owner));
                    }
                }
            }
        }
        advance.finished.sort_by_key(|(_, owner)| *owner);
        advance.timers.sort();
        advance
    }
}

#[cfg(test)]
mod tests {
    use super::sharing::MaxMinFairness;
    use super::*;
    use crate::id::KernelId;

    fn engine() -> ResourceEngine {
        ResourceEngine::new(Box::new(MaxMinFairness), 1e-9)
    }

    fn spec(owner: usize, consumes: Vec<ResourceId>, work: Work) -> ActionSpec {
        ActionSpec {
            owner: ActivityId::from_index(owner),
            requires: consumes.clone(),
            consumes,
            work,
            latency: 0.0,
            max_duration: None,
            weight: 1.0,
            bound: f64::INFINITY,
        }
    }

    fn advance(engine: &mut ResourceEngine) -> Advance {
        let next = engine.next_event_time().unwrap();
        engine.advance_to(next)
    }

    #[test]
    fn shared_cpu_slows_both_actions() {
        let mut engine = engine();
        let cpu = engine.add_resource(100.0);
        engine.start(spec(0, vec![cpu], Work::Amount(100.0))).unwrap();
        engine.start(spec(1, vec![cpu], Work::Amount(300.0))).unwrap();
        assert_eq!(engine.update().len(), 2);

        let first = advance(&mut engine);
        assert_eq!(engine.now(), SimTime::from_secs(2.0));
        assert_eq!(first.finished.len(), 1);
        assert_eq!(first.finished[0].1, ActivityId::from_index(0));

        // the survivor now has the whole cpu for its last 200 units
        let second = advance(&mut engine);
        assert_eq!(engine.now(), SimTime::from_secs(4.0));
        assert_eq!(second.finished[0].1, ActivityId::from_index(1));
        assert_eq!(engine.next_event_time(), None);
    }

    #[test]
    fn latency_is_paid_before_transfer() {
        let mut engine = engine();
        let link = engine.add_resource(10.0);
        let mut s = spec(0, vec![link], Work::Amount(10.0));
        s.latency = 0.5;
        engine.start(s).unwrap();
        let end_of_latency = advance(&mut engine);
        assert!(end_of_latency.finished.is_empty());
        assert_eq!(engine.now(), SimTime::from_secs(0.5));
        let done = advance(&mut engine);
        assert_eq!(done.finished.len(), 1);
        assert_eq!(engine.now(), SimTime::from_secs(1.5));
    }

    #[test]
    fn simultaneous_completions_are_reported_together_in_owner_order() {
        let mut engine = engine();
        let a = engine.add_resource(1.0);
        let b = engine.add_resource(1.0);
        engine.start(spec(7, vec![a], Work::Amount(5.0))).unwrap();
        engine.start(spec(3, vec![b], Work::Amount(5.0))).unwrap();
        let done = advance(&mut engine);
        let owners: Vec<usize> = done.finished.iter().map(|(_, o)| o.to_index()).collect();
        assert_eq!(owners, vec![3, 7]);
    }

    #[test]
    fn deadline_without_work() {
        let mut engine = engine();
        let cpu = engine.add_resource(1.0);
        let mut sleep = spec(0, vec![], Work::Unbounded);
        sleep.requires = vec![cpu];
        sleep.max_duration = Some(3.0);
        engine.start(sleep).unwrap();
        let mut forever = spec(1, vec![], Work::Unbounded);
        forever.requires = vec![cpu];
        engine.start(forever).unwrap();
        let done = advance(&mut engine);
        assert_eq!(engine.now(), SimTime::from_secs(3.0));
        assert_eq!(done.finished.len(), 1);
        assert_eq!(engine.next_event_time(), None);
    }

    #[test]
    fn turning_a_resource_off_fails_its_actions() {
        let mut engine = engine();
        let cpu = engine.add_resource(1.0);
        let other = engine.add_resource(1.0);
        engine.start(spec(0, vec![cpu], Work::Amount(5.0))).unwrap();
        engine.start(spec(1, vec![other], Work::Amount(5.0))).unwrap();
        let failed = engine.set_state(cpu, false);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].1, ActivityId::from_index(0));
        assert_eq!(
            engine.start(spec(2, vec![cpu], Work::Amount(1.0))),
            Err(cpu)
        );
    }

    #[test]
    fn tiny_work_completes_on_a_late_clock() {
        let mut engine = engine();
        let cpu = engine.add_resource(1e9);
        let timer = crate::id::TimerId::from_index(0);
        engine.schedule_timer(timer, SimTime::from_secs(1e9));
        assert_eq!(advance(&mut engine).timers, vec![timer]);
        // 50 flops take 5e-8 s, below the resolution of f64 at 1e9
        engine.start(spec(0, vec![cpu], Work::Amount(50.0))).unwrap();
        let done = advance(&mut engine);
        assert_eq!(done.finished.len(), 1);
        assert_eq!(engine.now(), SimTime::from_secs(1e9));
        assert_eq!(engine.next_event_time(), None);
    }

    #[test]
    fn suspended_actions_do_not_progress() {
        let mut engine = engine();
        let cpu = engine.add_resource(1.0);
        let id = engine.start(spec(0, vec![cpu], Work::Amount(2.0))).unwrap();
        let timer = crate::id::TimerId::from_index(0);
        engine.schedule_timer(timer, SimTime::from_secs(1.0));
        engine.update();
        engine.suspend(id);
        let fired = advance(&mut engine);
        assert_eq!(fired.timers, vec![timer]);
        assert_eq!(engine.remaining(id), Some(2.0));
        engine.resume(id);
        let done = advance(&mut engine);
        assert_eq!(done.finished.len(), 1);
        assert_eq!(engine.now(), SimTime::from_secs(3.0));
    }
}
