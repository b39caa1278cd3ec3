//! Mutexes, condition variables and semaphores.
//!
//! A blocked actor waits on a raw activity bound to its host. The raw activity ends in one of
//! three ways: the object is handed over to the actor (the activity is retired), its optional
//! deadline passes, or the host fails.

use tracing::{debug, warn};

use super::{Blocked, Handled, Kernel};
use crate::activity::{ActivityData, ActivityKind, ActivityState, Raw, SyncObject};
use crate::error::{KernelError, SimError};
use crate::id::{ActivityId, ActorId, CondId, KernelId, MutexId, SemId};
use crate::resource::{ActionSpec, Work};
use crate::simcall::SimcallValue;
use crate::synchro::{
    CondImpl, CondWaiter, MutexImpl, MutexWaiter, Resumption, SemImpl, SimCondvar, SimMutex,
    SimSemaphore,
};

impl Kernel {
    pub(crate) fn create_mutex(&mut self) -> SimMutex {
        self.mutexes.push(MutexImpl::default());
        SimMutex(MutexId::from_index(self.mutexes.len() - 1))
    }

    pub(crate) fn create_cond(&mut self) -> SimCondvar {
        self.conds.push(CondImpl::default());
        SimCondvar(CondId::from_index(self.conds.len() - 1))
    }

    pub(crate) fn create_sem(&mut self, capacity: u32) -> SimSemaphore {
        self.sems.push(SemImpl::new(capacity));
        SimSemaphore(SemId::from_index(self.sems.len() - 1))
    }

    pub(crate) fn mutex_owner(&self, mutex: MutexId) -> Option<ActorId> {
        self.mutexes.get(mutex.to_index())?.owner
    }

    pub(crate) fn sem_capacity(&self, sem: SemId) -> u32 {
        self.sems.get(sem.to_index()).map_or(0, |s| s.capacity)
    }

    pub(crate) fn sem_would_block(&self, sem: SemId) -> bool {
        self.sem_capacity(sem) == 0
    }

    fn checked_mutex(&self, actor: ActorId, mutex: MutexId) -> Result<&MutexImpl, KernelError> {
        self.mutexes.get(mutex.to_index()).ok_or_else(|| {
            KernelError::violation(format!("{mutex} does not exist")).with_actor(actor)
        })
    }

    pub(super) fn mutex_lock(&mut self, actor: ActorId, mutex: MutexId) -> Handled {
        self.checked_mutex(actor, mutex)?;
        self.lock_for(actor, mutex, Resumption::Locked);
        Ok(None)
    }

    pub(super) fn mutex_try_lock(&mut self, actor: ActorId, mutex: MutexId) -> Handled {
        self.checked_mutex(actor, mutex)?;
        let record = &mut self.mutexes[mutex.to_index()];
        if record.owner.is_some() {
            return Ok(Some(Ok(SimcallValue::Bool(false))));
        }
        record.owner = Some(actor);
        Ok(Some(Ok(SimcallValue::Bool(true))))
    }

    pub(super) fn mutex_unlock(&mut self, actor: ActorId, mutex: MutexId) -> Handled {
        let owner = self.checked_mutex(actor, mutex)?.owner;
        if owner != Some(actor) {
            return Err(KernelError::violation(format!(
                "{mutex} unlocked by an actor not owning it (owner: {owner:?})"
            ))
            .with_actor(actor));
        }
        self.release_mutex(mutex);
        Ok(Some(Ok(SimcallValue::Unit)))
    }

    /// Gives `mutex` to `actor`, or queues the actor until the mutex is handed over. The actor
    /// is answered with `then` once it owns the mutex.
    fn lock_for(&mut self, actor: ActorId, mutex: MutexId, then: Resumption) {
        let record = &mut self.mutexes[mutex.to_index()];
        match record.owner {
            None => {
                record.owner = Some(actor);
                self.answer(actor, then.result());
            }
            Some(owner) => {
                if owner == actor {
                    warn!(%actor, %mutex, "actor locks a mutex it already owns and will never wake up");
                }
                let raw = self.raw_wait(actor, SyncObject::Mutex(mutex), None);
                self.mutexes[mutex.to_index()]
                    .sleeping
                    .push_back(MutexWaiter { actor, raw, then });
            }
        }
    }

    fn release_mutex(&mut self, mutex: MutexId) {
        let record = &mut self.mutexes[mutex.to_index()];
        match record.sleeping.pop_front() {
            Some(next) => {
                record.owner = Some(next.actor);
                debug!(%mutex, actor = %next.actor, "mutex handed over");
                self.retire_raw(next.raw, ActivityState::Done);
                self.answer(next.actor, next.then.result());
            }
            None => record.owner = None,
        }
    }

    pub(super) fn cond_wait(
        &mut self,
        actor: ActorId,
        cond: CondId,
        mutex: MutexId,
        timeout: Option<f64>,
    ) -> Handled {
        if cond.to_index() >= self.conds.len() {
            return Err(KernelError::violation(format!("{cond} does not exist")).with_actor(actor));
        }
        if self.checked_mutex(actor, mutex)?.owner != Some(actor) {
            return Err(KernelError::violation(format!(
                "waiting on {cond} requires owning {mutex}"
            ))
            .with_actor(actor));
        }
        self.release_mutex(mutex);
        let raw = self.raw_wait(actor, SyncObject::Cond(cond), timeout);
        self.conds[cond.to_index()]
            .sleeping
            .push_back(CondWaiter { actor, raw, mutex });
        Ok(None)
    }

    /// Wakes the first waiter, or all of them. Woken actors re-acquire their mutex before
    /// their wait returns.
    pub(super) fn cond_signal(&mut self, cond: CondId, all: bool) -> Handled {
        let Some(record) = self.conds.get_mut(cond.to_index()) else {
            return Err(KernelError::violation(format!("{cond} does not exist")));
        };
        let woken: Vec<CondWaiter> = if all {
            record.sleeping.drain(..).collect()
        } else {
            record.sleeping.pop_front().into_iter().collect()
        };
        for waiter in woken {
            debug!(%cond, actor = %waiter.actor, "condition signaled");
            self.retire_raw(waiter.raw, ActivityState::Done);
            self.lock_for(waiter.actor, waiter.mutex, Resumption::Signaled);
        }
        Ok(Some(Ok(SimcallValue::Unit)))
    }

    pub(super) fn sem_acquire(&mut self, actor: ActorId, sem: SemId, timeout: Option<f64>) -> Handled {
        let Some(record) = self.sems.get_mut(sem.to_index()) else {
            return Err(KernelError::violation(format!("{sem} does not exist")).with_actor(actor));
        };
        if record.capacity > 0 {
            record.capacity -= 1;
            return Ok(Some(Ok(SimcallValue::Unit)));
        }
        if timeout.is_some_and(|t| t <= 0.0) {
            return Ok(Some(Err(SimError::Timeout)));
        }
        let raw = self.raw_wait(actor, SyncObject::Sem(sem), timeout);
        self.sems[sem.to_index()].sleeping.push_back((actor, raw));
        Ok(None)
    }

    pub(super) fn sem_release(&mut self, sem: SemId) -> Handled {
        let Some(record) = self.sems.get_mut(sem.to_index()) else {
            return Err(KernelError::violation(format!("{sem} does not exist")));
        };
        match record.sleeping.pop_front() {
            Some((actor, raw)) => {
                debug!(%sem, %actor, "semaphore handed over");
                self.retire_raw(raw, ActivityState::Done);
                self.answer(actor, Ok(SimcallValue::Unit));
            }
            None => record.capacity += 1,
        }
        Ok(Some(Ok(SimcallValue::Unit)))
    }

    /// Blocks `actor` on a new raw activity.
    fn raw_wait(&mut self, actor: ActorId, on: SyncObject, timeout: Option<f64>) -> ActivityId {
        let host = self.actors[&actor].host;
        let raw = self.create_activity(ActivityData::Raw(Raw { host, on }), 0);
        let cpu = self.hosts[host.to_index()].cpu;
        // the actor was killed before reaching here if its host is off
        if let Ok(action) = self.resources.start(ActionSpec {
            owner: raw,
            consumes: Vec::new(),
            requires: vec![cpu],
            work: Work::Unbounded,
            latency: 0.0,
            max_duration: timeout.map(|t| t.max(0.0)),
            weight: 1.0,
            bound: f64::INFINITY,
        }) {
            if let Some(activity) = self.activities.get_mut(&raw) {
                activity.action = Some(action);
            }
            self.set_activity_state(raw, ActivityState::Ready);
        }
        if let Some(activity) = self.activities.get_mut(&raw) {
            activity.waiters.push(actor);
        }
        if let Some(record) = self.actors.get_mut(&actor) {
            record.blocked = Some(Blocked::Activity(raw));
        }
        raw
    }

    /// Ends a raw activity without answering its waiter.
    fn retire_raw(&mut self, raw: ActivityId, state: ActivityState) {
        let Some(activity) = self.activities.get_mut(&raw) else {
            return;
        };
        activity.waiters.clear();
        if let Some(action) = activity.action.take() {
            self.resources.cancel(action);
        }
        self.set_activity_state(raw, state);
        self.maybe_release(raw);
    }

    fn raw_waiter(&self, raw: ActivityId) -> Option<(ActorId, SyncObject)> {
        let activity = self.activities.get(&raw)?;
        match &activity.data {
            ActivityData::Raw(r) => Some((*activity.waiters.first()?, r.on)),
            _ => None,
        }
    }

    /// The deadline of a raw activity passed.
    pub(super) fn raw_timed_out(&mut self, raw: ActivityId) {
        let Some((actor, on)) = self.raw_waiter(raw) else {
            self.retire_raw(raw, ActivityState::Done);
            return;
        };
        debug!(%actor, activity = %raw, "synchronization wait timed out");
        let waiter = self.forget_sync_waiter(on, actor);
        self.retire_raw(raw, ActivityState::Done);
        match (on, waiter) {
            // the mutex must be owned again before the timeout is reported
            (SyncObject::Cond(_), Some(mutex)) => self.lock_for(actor, mutex, Resumption::TimedOut),
            _ => self.answer(actor, Err(SimError::Timeout)),
        }
    }

    /// The host of a raw activity failed.
    pub(super) fn raw_failed(&mut self, raw: ActivityId) {
        let host = match self.activities.get(&raw).map(|a| &a.data) {
            Some(ActivityData::Raw(r)) => r.host,
            _ => return,
        };
        let waiter = self.raw_waiter(raw);
        self.retire_raw(raw, ActivityState::Failed);
        if let Some((actor, on)) = waiter {
            self.forget_sync_waiter(on, actor);
            self.answer(actor, Err(SimError::HostFailure(host)));
        }
    }

    /// Removes `actor` from the wait queue of a synchronization object. For a condition
    /// variable, returns the mutex the actor has to re-acquire.
    fn forget_sync_waiter(&mut self, on: SyncObject, actor: ActorId) -> Option<MutexId> {
        match on {
            SyncObject::Mutex(m) => {
                self.mutexes[m.to_index()]
                    .sleeping
                    .retain(|w| w.actor != actor);
                None
            }
            SyncObject::Cond(c) => {
                let sleeping = &mut self.conds[c.to_index()].sleeping;
                let position = sleeping.iter().position(|w| w.actor == actor)?;
                sleeping.remove(position).map(|w| w.mutex)
            }
            SyncObject::Sem(s) => {
                self.sems[s.to_index()]
                    .sleeping
                    .retain(|(a, _)| *a != actor);
                None
            }
        }
    }

    /// Stops an actor's wait on a raw activity when the actor goes away.
    pub(super) fn abandon_raw(&mut self, raw: ActivityId, actor: ActorId) {
        let on = match self.activities.get(&raw).map(|a| &a.data) {
            Some(ActivityData::Raw(r)) => r.on,
            _ => return,
        };
        self.forget_sync_waiter(on, actor);
        self.retire_raw(raw, ActivityState::Canceled);
    }

    pub(super) fn is_raw(&self, id: ActivityId) -> bool {
        self.activities
            .get(&id)
            .is_some_and(|a| a.data.kind() == ActivityKind::Raw)
    }
}
