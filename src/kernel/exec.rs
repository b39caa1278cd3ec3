//! Executions, sleeps, I/O, and the generic wait/test/cancel operations on activities.

use tracing::debug;

use super::{Blocked, Handled, Kernel, Timer};
use crate::activity::{ActivityData, ActivityState, Exec, FailureCause, Io, IoOp};
use crate::error::{KernelError, SimError};
use crate::id::{ActivityId, ActorId, StorageId};
use crate::resource::{ActionSpec, Work};
use crate::simcall::{SimcallResult, SimcallValue};

impl Kernel {
    pub(super) fn start_exec(
        &mut self,
        actor: ActorId,
        flops: f64,
        priority: f64,
        bound: Option<f64>,
    ) -> SimcallResult {
        let host = self.actors[&actor].host;
        let id = self.create_activity(ActivityData::Exec(Exec { host, flops }), 1);
        self.own(actor, id);
        let cpu = self.hosts[host.to_index()].cpu;
        self.launch(
            id,
            ActionSpec {
                owner: id,
                consumes: vec![cpu],
                requires: vec![cpu],
                work: Work::Amount(flops.max(0.0)),
                latency: 0.0,
                max_duration: None,
                weight: priority,
                bound: bound.unwrap_or(f64::INFINITY),
            },
        );
        Ok(SimcallValue::Activity(id))
    }

    /// Blocks the actor for `duration` seconds. Returns the answer right away if its host is off.
    pub(super) fn sleep(&mut self, actor: ActorId, duration: f64) -> Option<SimcallResult> {
        let host = self.actors[&actor].host;
        if !self.host_is_on(host) {
            return Some(Err(SimError::HostFailure(host)));
        }
        let id = self.create_activity(ActivityData::Sleep { host, duration }, 0);
        self.own(actor, id);
        let cpu = self.hosts[host.to_index()].cpu;
        self.launch(
            id,
            ActionSpec {
                owner: id,
                consumes: Vec::new(),
                requires: vec![cpu],
                work: Work::Unbounded,
                latency: 0.0,
                max_duration: Some(duration.max(0.0)),
                weight: 1.0,
                bound: f64::INFINITY,
            },
        );
        self.block_on(actor, id)
    }

    pub(super) fn start_io(
        &mut self,
        actor: ActorId,
        storage: StorageId,
        op: IoOp,
        size: f64,
    ) -> Handled {
        let Some(record) = self.storages.get(storage.to_index()) else {
            return Err(KernelError::violation(format!("{storage} does not exist")).with_actor(actor));
        };
        let host = record.host;
        let disk = match op {
            IoOp::Read => record.read,
            IoOp::Write => record.write,
        };
        let id = self.create_activity(
            ActivityData::Io(Io {
                storage,
                host,
                op,
                size,
            }),
            1,
        );
        self.own(actor, id);
        let cpu = self.hosts[host.to_index()].cpu;
        self.launch(
            id,
            ActionSpec {
                owner: id,
                consumes: vec![disk],
                requires: vec![disk, cpu],
                work: Work::Amount(size.max(0.0)),
                latency: 0.0,
                max_duration: None,
                weight: 1.0,
                bound: f64::INFINITY,
            },
        );
        Ok(Some(Ok(SimcallValue::Activity(id))))
    }

    /// Registers `actor` as the single waiter of a kernel-internal activity, unless it already
    /// ended.
    fn block_on(&mut self, actor: ActorId, id: ActivityId) -> Option<SimcallResult> {
        let activity = self.activities.get_mut(&id)?;
        if activity.state.is_terminal() {
            return Some(self.activity_result(id, actor, true));
        }
        activity.waiters.push(actor);
        if let Some(record) = self.actors.get_mut(&actor) {
            record.blocked = Some(Blocked::Activity(id));
        }
        None
    }

    pub(super) fn wait(
        &mut self,
        actor: ActorId,
        id: ActivityId,
        timeout: Option<f64>,
    ) -> Handled {
        let Some(activity) = self.activities.get(&id) else {
            return Err(KernelError::violation("wait on an unknown activity")
                .with_actor(actor)
                .with_activity(id));
        };
        if activity.state.is_terminal() {
            return Ok(Some(self.activity_result(id, actor, true)));
        }
        if timeout.is_some_and(|t| t <= 0.0) {
            debug!(%actor, activity = %id, "wait with an expired timeout");
            return Ok(Some(self.expire_wait(actor, id)));
        }
        let answer = self.block_on(actor, id);
        debug_assert!(answer.is_none());
        self.arm_wait_timeout(actor, timeout);
        Ok(None)
    }

    pub(super) fn test(&mut self, actor: ActorId, id: ActivityId) -> Handled {
        let Some(activity) = self.activities.get(&id) else {
            return Err(KernelError::violation("test on an unknown activity")
                .with_actor(actor)
                .with_activity(id));
        };
        if !activity.state.is_terminal() {
            return Ok(Some(Ok(SimcallValue::Bool(false))));
        }
        Ok(Some(
            self.activity_result(id, actor, false)
                .map(|_| SimcallValue::Bool(true)),
        ))
    }

    pub(super) fn wait_any(
        &mut self,
        actor: ActorId,
        ids: Vec<ActivityId>,
        timeout: Option<f64>,
    ) -> Handled {
        if ids.is_empty() {
            return Err(
                KernelError::violation("wait on an empty set of activities").with_actor(actor)
            );
        }
        if let Some(found) = self.first_terminal(actor, &ids)? {
            return Ok(Some(Ok(SimcallValue::Index(found))));
        }
        if timeout.is_some_and(|t| t <= 0.0) {
            return Ok(Some(Err(SimError::Timeout)));
        }
        for id in &ids {
            if let Some(activity) = self.activities.get_mut(id) {
                activity.waiters.push(actor);
            }
        }
        if let Some(record) = self.actors.get_mut(&actor) {
            record.blocked = Some(Blocked::Any(ids));
        }
        self.arm_wait_timeout(actor, timeout);
        Ok(None)
    }

    pub(super) fn test_any(&mut self, ids: Vec<ActivityId>) -> Handled {
        let found = ids.iter().position(|id| {
            self.activities
                .get(id)
                .is_some_and(|a| a.state.is_terminal())
        });
        Ok(Some(Ok(found.map_or(SimcallValue::Pending, SimcallValue::Index))))
    }

    fn first_terminal(&self, actor: ActorId, ids: &[ActivityId]) -> Result<Option<usize>, KernelError> {
        for (index, id) in ids.iter().enumerate() {
            let Some(activity) = self.activities.get(id) else {
                return Err(KernelError::violation("wait on an unknown activity")
                    .with_actor(actor)
                    .with_activity(*id));
            };
            if activity.state.is_terminal() {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn arm_wait_timeout(&mut self, actor: ActorId, timeout: Option<f64>) {
        let Some(timeout) = timeout else {
            return;
        };
        let at = self.now() + timeout;
        let timer = self.add_timer(at, Timer::WaitTimeout { actor });
        if let Some(record) = self.actors.get_mut(&actor) {
            record.timeout = Some(timer);
        }
    }

    /// A wait on a communication that times out fails the communication itself; waits on
    /// anything else only give up on it.
    fn expire_wait(&mut self, actor: ActorId, id: ActivityId) -> SimcallResult {
        let is_comm = self
            .activities
            .get(&id)
            .is_some_and(|a| a.comm().is_some() && !a.state.is_terminal());
        if is_comm {
            self.finish_activity(id, ActivityState::Failed, Some(FailureCause::Timeout));
        } else if let Some(activity) = self.activities.get_mut(&id) {
            activity.waiters.retain(|w| *w != actor);
        }
        Err(SimError::Timeout)
    }

    pub(super) fn wait_timed_out(&mut self, actor: ActorId) {
        let Some(record) = self.actors.get_mut(&actor) else {
            return;
        };
        record.timeout = None;
        match record.blocked.clone() {
            Some(Blocked::Activity(id)) => {
                debug!(%actor, activity = %id, "wait timed out");
                if let Some(record) = self.actors.get_mut(&actor) {
                    // the waiter list is rewritten by expire_wait; detach the actor first so
                    // a failing comm does not answer it twice
                    record.blocked = None;
                }
                let result = self.expire_wait(actor, id);
                self.answer(actor, result);
            }
            Some(Blocked::Any(ids)) => {
                debug!(%actor, "wait on several activities timed out");
                for id in ids {
                    if let Some(activity) = self.activities.get_mut(&id) {
                        activity.waiters.retain(|w| *w != actor);
                    }
                }
                self.answer(actor, Err(SimError::Timeout));
            }
            _ => {}
        }
    }

    pub(super) fn cancel(&mut self, id: ActivityId) {
        let running = self
            .activities
            .get(&id)
            .is_some_and(|a| !a.state.is_terminal());
        if running {
            debug!(activity = %id, "activity canceled");
            self.finish_activity(id, ActivityState::Canceled, None);
        }
    }

    pub(super) fn set_priority(&mut self, id: ActivityId, priority: f64) {
        if let Some(action) = self.activities.get(&id).and_then(|a| a.action) {
            self.resources.set_weight(action, priority);
        }
    }
}
