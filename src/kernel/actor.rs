//! Actor life cycle: creation, termination, suspension and joins.

use std::collections::BTreeSet;

use tracing::debug;

use super::{ActorRecord, Blocked, Handled, Kernel, PendingSpawn, Timer};
use crate::activity::{ActivityData, ActivityState, FailureCause};
use crate::error::{KernelError, SimError};
use crate::event::Event;
use crate::id::{ActorId, HostId};
use crate::simcall::{SimcallResult, SimcallValue, SpawnBody, SpawnOptions};
use crate::time::SimTime;

impl Kernel {
    /// Registers a new actor on `host`. Its body is started by the engine at the end of the
    /// current round.
    pub(crate) fn create_actor(
        &mut self,
        name: String,
        host: HostId,
        options: SpawnOptions,
        body: SpawnBody,
    ) -> Result<ActorId, SimError> {
        let Some(record) = self.hosts.get_mut(host.to_index()) else {
            return Err(SimError::NoSuchHost(host));
        };
        if !record.on {
            return Err(SimError::HostFailure(host));
        }
        let id = self.actor_ids.next();
        record.actors.insert(id);
        debug!(actor = %id, %name, %host, "actor created");
        self.actors.insert(
            id,
            ActorRecord {
                name,
                host,
                pending: None,
                answer: None,
                last_simcall: None,
                blocked: None,
                suspended: false,
                daemon: options.daemon,
                doomed: false,
                timeout: None,
                kill_timer: None,
                joiners: Vec::new(),
                activities: BTreeSet::new(),
            },
        );
        if let Some(kill_time) = options.kill_time {
            let timer = self.add_timer(SimTime::from_secs(kill_time), Timer::Kill { actor: id });
            if let Some(record) = self.actors.get_mut(&id) {
                record.kill_timer = Some(timer);
            }
        }
        self.emit(Event::ActorSpawned { actor: id, host });
        self.spawned.push(PendingSpawn { actor: id, body });
        self.ready.push(id);
        Ok(id)
    }

    pub(crate) fn take_spawned(&mut self) -> Vec<PendingSpawn> {
        std::mem::take(&mut self.spawned)
    }

    pub(crate) fn take_dead(&mut self) -> Vec<ActorId> {
        std::mem::take(&mut self.dead)
    }

    /// Terminates an actor immediately. Its future is dropped by the engine.
    pub(crate) fn kill_actor(&mut self, actor: ActorId) {
        if !self.actors.contains_key(&actor) {
            return;
        }
        debug!(%actor, "killing actor");
        self.remove_actor(actor, true);
        self.dead.push(actor);
    }

    /// The body of an actor returned.
    pub(crate) fn actor_finished(&mut self, actor: ActorId) {
        debug!(%actor, "actor finished");
        self.remove_actor(actor, false);
    }

    fn remove_actor(&mut self, actor: ActorId, killed: bool) {
        let Some(record) = self.actors.remove(&actor) else {
            return;
        };
        self.parked.remove(&actor);
        for timer in [record.timeout, record.kill_timer].into_iter().flatten() {
            self.cancel_timer(timer);
        }
        match record.blocked {
            Some(Blocked::Activity(id)) => self.stop_waiting(id, actor),
            Some(Blocked::Any(ids)) => {
                for id in ids {
                    self.stop_waiting(id, actor);
                }
            }
            Some(Blocked::Join(target)) => {
                if let Some(target) = self.actors.get_mut(&target) {
                    target.joiners.retain(|j| *j != actor);
                }
            }
            Some(Blocked::Suspended) | None => {}
        }
        // an answer that was never picked up still holds its reference
        if let Some(Ok(SimcallValue::Activity(id))) = record.answer {
            self.unref_activity(id);
        }
        if killed {
            for id in record.activities {
                self.abort_activity(id);
            }
        }
        if let Some(host) = self.hosts.get_mut(record.host.to_index()) {
            host.actors.remove(&actor);
        }
        self.emit(Event::ActorTerminated { actor, killed });
        for joiner in record.joiners {
            self.answer(joiner, Ok(SimcallValue::Unit));
        }
    }

    fn stop_waiting(&mut self, id: crate::id::ActivityId, actor: ActorId) {
        if self.is_raw(id) {
            self.abandon_raw(id, actor);
        } else if let Some(activity) = self.activities.get_mut(&id) {
            activity.waiters.retain(|w| *w != actor);
            self.maybe_release(id);
        }
    }

    /// Ends an activity of a killed actor. A communication already matched with a peer fails
    /// on the peer's side; anything else is canceled.
    fn abort_activity(&mut self, id: crate::id::ActivityId) {
        let Some(activity) = self.activities.get(&id) else {
            return;
        };
        if activity.state.is_terminal() || activity.detached() {
            return;
        }
        match &activity.data {
            ActivityData::Comm(comm) if !comm.queued => self.finish_activity(
                id,
                ActivityState::Failed,
                Some(FailureCause::PeerTerminated),
            ),
            _ => self.finish_activity(id, ActivityState::Canceled, None),
        }
    }

    pub(super) fn kill(&mut self, issuer: ActorId, target: ActorId) -> Option<SimcallResult> {
        if !self.actors.contains_key(&target) {
            return Some(Err(SimError::NoSuchActor(target)));
        }
        self.kill_actor(target);
        // killing oneself never returns
        (issuer != target).then_some(Ok(SimcallValue::Unit))
    }

    /// Kills every actor except `spare`.
    pub(crate) fn kill_all(&mut self, spare: Option<ActorId>) {
        let victims: Vec<ActorId> = self
            .actors
            .keys()
            .copied()
            .filter(|a| Some(*a) != spare)
            .collect();
        for actor in victims {
            self.kill_actor(actor);
        }
    }

    pub(super) fn suspend(&mut self, issuer: ActorId, target: ActorId) -> Option<SimcallResult> {
        let Some(record) = self.actors.get_mut(&target) else {
            return Some(Err(SimError::NoSuchActor(target)));
        };
        if record.suspended {
            return (issuer != target).then_some(Ok(SimcallValue::Unit));
        }
        record.suspended = true;
        let waited = match &record.blocked {
            Some(Blocked::Activity(id)) => Some(*id),
            _ => None,
        };
        debug!(actor = %target, "actor suspended");
        if let Some(action) = waited.and_then(|id| self.activities.get(&id)?.action) {
            self.resources.suspend(action);
        }
        if issuer == target {
            if let Some(record) = self.actors.get_mut(&target) {
                record.blocked = Some(Blocked::Suspended);
            }
            None
        } else {
            Some(Ok(SimcallValue::Unit))
        }
    }

    pub(crate) fn resume(&mut self, target: ActorId) -> SimcallResult {
        let Some(record) = self.actors.get_mut(&target) else {
            return Err(SimError::NoSuchActor(target));
        };
        if !record.suspended {
            return Ok(SimcallValue::Unit);
        }
        record.suspended = false;
        let blocked = record.blocked.clone();
        debug!(actor = %target, "actor resumed");
        match blocked {
            Some(Blocked::Suspended) => self.answer(target, Ok(SimcallValue::Unit)),
            Some(Blocked::Activity(id)) => {
                if let Some(action) = self.activities.get(&id).and_then(|a| a.action) {
                    self.resources.resume(action);
                }
            }
            _ => {
                if self.parked.remove(&target) {
                    self.ready.push(target);
                }
            }
        }
        Ok(SimcallValue::Unit)
    }

    pub(super) fn join(&mut self, actor: ActorId, target: ActorId, timeout: Option<f64>) -> Handled {
        if actor == target {
            return Err(KernelError::violation("an actor cannot join itself").with_actor(actor));
        }
        let Some(record) = self.actors.get_mut(&target) else {
            return Ok(Some(Ok(SimcallValue::Unit)));
        };
        if timeout.is_some_and(|t| t <= 0.0) {
            return Ok(Some(Err(SimError::Timeout)));
        }
        record.joiners.push(actor);
        if let Some(record) = self.actors.get_mut(&actor) {
            record.blocked = Some(Blocked::Join(target));
        }
        if let Some(timeout) = timeout {
            let timer = self.add_timer(self.now() + timeout, Timer::JoinTimeout { actor });
            if let Some(record) = self.actors.get_mut(&actor) {
                record.timeout = Some(timer);
            }
        }
        Ok(None)
    }

    pub(super) fn join_timed_out(&mut self, actor: ActorId) {
        let Some(record) = self.actors.get_mut(&actor) else {
            return;
        };
        record.timeout = None;
        let Some(Blocked::Join(target)) = record.blocked else {
            return;
        };
        if let Some(target) = self.actors.get_mut(&target) {
            target.joiners.retain(|j| *j != actor);
        }
        self.answer(actor, Err(SimError::Timeout));
    }
}
