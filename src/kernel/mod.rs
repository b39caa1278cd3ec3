//! The maestro's state.
//!
//! [`Kernel`] owns every object of a running simulation: hosts and their resources, actors,
//! activities, mailboxes, synchronization objects and timers. It is only mutated while the
//! engine handles a simcall or advances time, never concurrently with actor code.

mod actor;
mod comm;
mod exec;
mod host;
mod synchro;

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::activity::{
    Activity, ActivityData, ActivityKind, ActivityState, FailureCause, Orphans,
};
use crate::config::{SimConfig, Sharing};
use crate::engine::ReadyQueue;
use crate::error::{BlockedActor, KernelError, NetworkFailure, SimError};
use crate::event::{Event, EventHandler};
use crate::id::{
    ActivityId, ActorId, HostId, IdCounter, KernelId, LinkId, MailboxId, TimerId,
};
use crate::mailbox::Mailbox;
use crate::observer::{self, Observer};
use crate::platform::{Component, Platform};
use crate::resource::sharing::{FairShare, MaxMinFairness, SharingPolicy};
use crate::resource::{ActionSpec, ResourceEngine, ResourceId};
use crate::scheduling::PendingSimcall;
use crate::simcall::{Simcall, SimcallKind, SimcallResult, SimcallValue, SpawnBody};
use crate::synchro::{CondImpl, MutexImpl, SemImpl};
use crate::time::SimTime;

/// Result of a simcall handler: an immediate answer, or `None` if the issuer stays blocked.
type Handled = Result<Option<SimcallResult>, KernelError>;

pub(crate) struct HostRecord {
    pub(crate) name: String,
    cpu: ResourceId,
    on: bool,
    actors: BTreeSet<ActorId>,
}

struct LinkRecord {
    resource: ResourceId,
    latency: f64,
    on: bool,
}

struct StorageRecord {
    host: HostId,
    read: ResourceId,
    write: ResourceId,
}

/// What a blocked actor waits for.
#[derive(Debug, Clone)]
enum Blocked {
    Activity(ActivityId),
    Any(Vec<ActivityId>),
    Join(ActorId),
    Suspended,
}

struct ActorRecord {
    name: String,
    host: HostId,
    pending: Option<Simcall>,
    answer: Option<SimcallResult>,
    last_simcall: Option<SimcallKind>,
    blocked: Option<Blocked>,
    suspended: bool,
    daemon: bool,
    /// Set when the actor's host failed; the actor dies at its next simcall.
    doomed: bool,
    timeout: Option<TimerId>,
    kill_timer: Option<TimerId>,
    joiners: Vec<ActorId>,
    activities: BTreeSet<ActivityId>,
}

enum Timer {
    WaitTimeout { actor: ActorId },
    JoinTimeout { actor: ActorId },
    Kill { actor: ActorId },
    State { component: Component, on: bool },
}

/// An actor created by the kernel whose body the engine still has to start.
pub(crate) struct PendingSpawn {
    pub(crate) actor: ActorId,
    pub(crate) body: SpawnBody,
}

pub(crate) struct Kernel {
    hosts: Vec<HostRecord>,
    links: Vec<LinkRecord>,
    storages: Vec<StorageRecord>,
    routes: BTreeMap<(HostId, HostId), Vec<LinkId>>,
    /// What fails when a resource goes off, indexed by resource.
    resource_owners: Vec<FailureCause>,
    resources: ResourceEngine,
    actors: BTreeMap<ActorId, ActorRecord>,
    actor_ids: IdCounter<ActorId>,
    activities: BTreeMap<ActivityId, Activity>,
    activity_ids: IdCounter<ActivityId>,
    mailboxes: Vec<Mailbox>,
    mailbox_names: HashMap<String, MailboxId>,
    mutexes: Vec<MutexImpl>,
    conds: Vec<CondImpl>,
    sems: Vec<SemImpl>,
    timers: BTreeMap<TimerId, Timer>,
    timer_ids: IdCounter<TimerId>,
    ready: Arc<ReadyQueue>,
    /// Suspended actors whose simcall was answered.
    parked: BTreeSet<ActorId>,
    /// The actor whose code is currently executing, if any.
    pub(crate) running: Option<ActorId>,
    pub(crate) spawned: Vec<PendingSpawn>,
    pub(crate) dead: Vec<ActorId>,
    fatal: Option<KernelError>,
    orphans: Orphans,
    event_handler: Box<dyn EventHandler>,
    pub(crate) observers: Vec<(TypeId, Box<dyn Observer>)>,
}

impl Kernel {
    pub(crate) fn new(
        platform: &Platform,
        config: &SimConfig,
        ready: Arc<ReadyQueue>,
        event_handler: Box<dyn EventHandler>,
    ) -> Self {
        let policy: Box<dyn SharingPolicy> = match config.sharing {
            Sharing::FairShare => Box::new(FairShare),
            Sharing::MaxMin => Box::new(MaxMinFairness),
        };
        let mut resources = ResourceEngine::new(policy, config.precision);
        let mut resource_owners = Vec::new();

        let hosts = platform
            .hosts
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                resource_owners.push(FailureCause::Host(HostId::from_index(index)));
                HostRecord {
                    name: spec.name.clone(),
                    cpu: resources.add_resource(spec.speed),
                    on: true,
                    actors: BTreeSet::new(),
                }
            })
            .collect();
        let links = platform
            .links
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                resource_owners.push(FailureCause::Link(Some(LinkId::from_index(index))));
                LinkRecord {
                    resource: resources.add_resource(spec.bandwidth),
                    latency: spec.latency,
                    on: true,
                }
            })
            .collect();
        let storages = platform
            .storages
            .iter()
            .map(|spec| {
                resource_owners.push(FailureCause::Host(spec.host));
                resource_owners.push(FailureCause::Host(spec.host));
                StorageRecord {
                    host: spec.host,
                    read: resources.add_resource(spec.read_bandwidth),
                    write: resources.add_resource(spec.write_bandwidth),
                }
            })
            .collect();

        let mut kernel = Kernel {
            hosts,
            links,
            storages,
            routes: platform.routes.clone(),
            resource_owners,
            resources,
            actors: BTreeMap::new(),
            actor_ids: IdCounter::new(),
            activities: BTreeMap::new(),
            activity_ids: IdCounter::new(),
            mailboxes: Vec::new(),
            mailbox_names: HashMap::new(),
            mutexes: Vec::new(),
            conds: Vec::new(),
            sems: Vec::new(),
            timers: BTreeMap::new(),
            timer_ids: IdCounter::new(),
            ready,
            parked: BTreeSet::new(),
            running: None,
            spawned: Vec::new(),
            dead: Vec::new(),
            fatal: None,
            event_handler,
            orphans: Rc::default(),
            observers: Vec::new(),
        };
        for change in &platform.state_changes {
            kernel.add_timer(
                change.at,
                Timer::State {
                    component: change.component,
                    on: change.on,
                },
            );
        }
        kernel
    }

    pub(crate) fn now(&self) -> SimTime {
        self.resources.now()
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.event_handler.handle_event(&event);
        let now = self.now();
        for (_, observer) in &mut self.observers {
            observer::dispatch(observer.as_mut(), now, &event);
        }
    }

    pub(crate) fn finish_events(&mut self) -> Box<dyn Any> {
        let handler = std::mem::replace(
            &mut self.event_handler,
            Box::new(crate::event::NoopEventHandler),
        );
        handler.finalize()
    }

    /// Records the first fatal error; the engine stops at its next check.
    pub(crate) fn fail(&mut self, err: KernelError) {
        error!("{err}");
        self.fatal.get_or_insert(err);
    }

    pub(crate) fn take_fatal(&mut self) -> Option<KernelError> {
        self.fatal.take()
    }

    // ---- simcall protocol ----

    pub(crate) fn issue(&mut self, actor: ActorId, call: Simcall) {
        if self.running.is_some_and(|running| running != actor) {
            self.fail(
                KernelError::violation("simcall issued through the handle of another actor")
                    .with_actor(actor),
            );
            return;
        }
        let Some(record) = self.actors.get_mut(&actor) else {
            self.fail(KernelError::violation("simcall issued by a dead actor").with_actor(actor));
            return;
        };
        if record.pending.is_some() || record.blocked.is_some() || record.answer.is_some() {
            self.fail(
                KernelError::violation("actor issued a simcall while another one is in flight")
                    .with_actor(actor),
            );
            return;
        }
        trace!(%actor, simcall = ?call.kind(), "simcall issued");
        record.pending = Some(call);
    }

    pub(crate) fn take_answer(&mut self, actor: ActorId) -> Option<SimcallResult> {
        self.actors.get_mut(&actor)?.answer.take()
    }

    pub(crate) fn pending_simcalls(&self) -> Vec<PendingSimcall> {
        self.actors
            .iter()
            .filter_map(|(id, record)| {
                record.pending.as_ref().map(|call| PendingSimcall {
                    actor: *id,
                    kind: call.kind(),
                })
            })
            .collect()
    }

    /// Handles the pending simcall of `actor`. A dead actor is skipped.
    pub(crate) fn handle(&mut self, actor: ActorId) -> Result<(), KernelError> {
        let Some(record) = self.actors.get_mut(&actor) else {
            return Ok(());
        };
        let Some(call) = record.pending.take() else {
            return Err(KernelError::violation("no simcall to handle").with_actor(actor));
        };
        let kind = call.kind();
        record.last_simcall = Some(kind);
        if record.doomed {
            debug!(%actor, "terminating actor of a failed host");
            self.kill_actor(actor);
            return Ok(());
        }
        self.emit(Event::SimcallHandled {
            actor,
            simcall: kind,
        });
        debug!(%actor, simcall = ?kind, "handling simcall");
        let answer = self.dispatch(actor, call).inspect_err(|err| {
            error!(%actor, simcall = ?kind, "{err}");
        })?;
        if let Some(result) = answer {
            self.answer(actor, result);
        }
        Ok(())
    }

    fn dispatch(&mut self, actor: ActorId, call: Simcall) -> Handled {
        match call {
            Simcall::Exec {
                flops,
                priority,
                bound,
            } => Ok(Some(self.start_exec(actor, flops, priority, bound))),
            Simcall::Sleep { duration } => Ok(self.sleep(actor, duration)),
            Simcall::Io { storage, op, size } => self.start_io(actor, storage, op, size),
            Simcall::Send {
                mailbox,
                payload,
                size,
                rate,
                detached,
            } => self.post_send(actor, mailbox, payload, size, rate, detached),
            Simcall::Recv {
                mailbox,
                matcher,
                rate,
            } => self.post_recv(actor, mailbox, matcher, rate),
            Simcall::Wait { activity, timeout } => self.wait(actor, activity, timeout),
            Simcall::Test { activity } => self.test(actor, activity),
            Simcall::WaitAny {
                activities,
                timeout,
            } => self.wait_any(actor, activities, timeout),
            Simcall::TestAny { activities } => self.test_any(activities),
            Simcall::Cancel { activity } => {
                self.cancel(activity);
                Ok(Some(Ok(SimcallValue::Unit)))
            }
            Simcall::SetPriority { activity, priority } => {
                self.set_priority(activity, priority);
                Ok(Some(Ok(SimcallValue::Unit)))
            }
            Simcall::MutexLock { mutex } => self.mutex_lock(actor, mutex),
            Simcall::MutexTryLock { mutex } => self.mutex_try_lock(actor, mutex),
            Simcall::MutexUnlock { mutex } => self.mutex_unlock(actor, mutex),
            Simcall::CondWait {
                cond,
                mutex,
                timeout,
            } => self.cond_wait(actor, cond, mutex, timeout),
            Simcall::CondSignal { cond } => self.cond_signal(cond, false),
            Simcall::CondBroadcast { cond } => self.cond_signal(cond, true),
            Simcall::SemAcquire { sem, timeout } => self.sem_acquire(actor, sem, timeout),
            Simcall::SemRelease { sem } => self.sem_release(sem),
            Simcall::Spawn {
                name,
                host,
                options,
                body,
            } => Ok(Some(
                self.create_actor(name, host, options, body)
                    .map(SimcallValue::Actor),
            )),
            Simcall::Kill { actor: target } => Ok(self.kill(actor, target)),
            Simcall::KillAll => {
                self.kill_all(Some(actor));
                Ok(Some(Ok(SimcallValue::Unit)))
            }
            Simcall::Suspend { actor: target } => Ok(self.suspend(actor, target)),
            Simcall::Resume { actor: target } => Ok(Some(self.resume(target))),
            Simcall::Join {
                actor: target,
                timeout,
            } => self.join(actor, target, timeout),
            Simcall::Daemonize => {
                if let Some(record) = self.actors.get_mut(&actor) {
                    record.daemon = true;
                }
                Ok(Some(Ok(SimcallValue::Unit)))
            }
            Simcall::Yield => Ok(Some(Ok(SimcallValue::Unit))),
            Simcall::SetHostState { host, on } => {
                if host.to_index() >= self.hosts.len() {
                    return Ok(Some(Err(SimError::NoSuchHost(host))));
                }
                self.set_host_state(host, on);
                Ok(Some(Ok(SimcallValue::Unit)))
            }
            Simcall::SetLinkState { link, on } => {
                if !self.link_exists(link) {
                    return Err(KernelError::UnknownLink(link));
                }
                self.set_link_state(link, on);
                Ok(Some(Ok(SimcallValue::Unit)))
            }
        }
    }

    /// Delivers the result of an actor's simcall and makes the actor runnable.
    fn answer(&mut self, actor: ActorId, result: SimcallResult) {
        let Some(record) = self.actors.get_mut(&actor) else {
            return;
        };
        record.blocked = None;
        record.answer = Some(result);
        let timeout = record.timeout.take();
        let suspended = record.suspended;
        if let Some(timer) = timeout {
            self.cancel_timer(timer);
        }
        if suspended {
            self.parked.insert(actor);
        } else {
            self.ready.push(actor);
        }
    }

    /// Moves a ready but suspended actor aside until it is resumed.
    pub(crate) fn park_if_suspended(&mut self, actor: ActorId) -> bool {
        let suspended = self.actors.get(&actor).is_some_and(|r| r.suspended);
        if suspended {
            self.parked.insert(actor);
        }
        suspended
    }

    // ---- activities ----

    fn create_activity(&mut self, data: ActivityData, refs: usize) -> ActivityId {
        let id = self.activity_ids.next();
        let kind = data.kind();
        self.activities.insert(id, Activity::new(id, data, refs));
        debug!(activity = %id, ?kind, "activity created");
        self.emit(Event::ActivityCreated { activity: id, kind });
        id
    }

    fn set_activity_state(&mut self, id: ActivityId, to: ActivityState) {
        let Some(activity) = self.activities.get_mut(&id) else {
            return;
        };
        let from = activity.state;
        if from == to {
            return;
        }
        activity.state = to;
        trace!(activity = %id, ?from, ?to, "activity state changed");
        self.emit(Event::ActivityStateChanged {
            activity: id,
            from,
            to,
        });
    }

    /// Remembers that `actor` takes part in `activity`, for cleanup when it is killed.
    fn own(&mut self, actor: ActorId, activity: ActivityId) {
        if let Some(record) = self.actors.get_mut(&actor) {
            record.activities.insert(activity);
        }
    }

    /// Allocates the resource action of an activity and makes it READY, or fails the
    /// activity if a resource it needs is off.
    fn launch(&mut self, id: ActivityId, spec: ActionSpec) {
        match self.resources.start(spec) {
            Ok(action) => {
                if let Some(activity) = self.activities.get_mut(&id) {
                    activity.action = Some(action);
                }
                self.set_activity_state(id, ActivityState::Ready);
            }
            Err(resource) => {
                let cause = self.resource_owners[resource.index()];
                debug!(activity = %id, ?cause, "resource unavailable at start");
                self.finish_activity(id, ActivityState::Failed, Some(cause));
            }
        }
    }

    /// Moves an activity to a terminal state and notifies each waiter exactly once.
    fn finish_activity(&mut self, id: ActivityId, to: ActivityState, cause: Option<FailureCause>) {
        debug_assert!(to.is_terminal());
        let Some(activity) = self.activities.get_mut(&id) else {
            return;
        };
        if activity.state.is_terminal() {
            return;
        }
        activity.failure = cause;
        let action = activity.action.take();
        // a completed eager comm stays in its mailbox until the receiver claims it
        let mailbox = match activity.comm_mut() {
            Some(comm) if comm.queued && to != ActivityState::Done => {
                comm.queued = false;
                Some(comm.mailbox)
            }
            _ => None,
        };
        let waiters = std::mem::take(&mut activity.waiters);
        // resources are released before anyone is woken up
        if let Some(action) = action {
            self.resources.cancel(action);
        }
        if let Some(mailbox) = mailbox {
            let queue = &mut self.mailboxes[mailbox.to_index()];
            if !queue.remove(id) {
                let err = KernelError::violation("comm missing from its mailbox")
                    .with_activity(id)
                    .with_mailbox(&queue.name);
                self.fail(err);
            }
        }
        self.set_activity_state(id, to);
        for waiter in waiters {
            self.wake_waiter(waiter, id);
        }
        self.maybe_release(id);
    }

    fn wake_waiter(&mut self, actor: ActorId, activity: ActivityId) {
        let Some(record) = self.actors.get(&actor) else {
            return;
        };
        match &record.blocked {
            Some(Blocked::Activity(waited)) if *waited == activity => {
                let result = self.activity_result(activity, actor, true);
                self.answer(actor, result);
            }
            Some(Blocked::Any(list)) => {
                let list = list.clone();
                let index = list.iter().position(|a| *a == activity);
                for other in list.iter().filter(|a| **a != activity) {
                    if let Some(other) = self.activities.get_mut(other) {
                        other.waiters.retain(|w| *w != actor);
                    }
                }
                if let Some(index) = index {
                    self.answer(actor, Ok(SimcallValue::Index(index)));
                }
            }
            _ => {}
        }
    }

    /// The result a waiter gets from a finished activity. A receiver waiting on a completed
    /// communication takes the payload if `consume` is set.
    fn activity_result(&mut self, id: ActivityId, waiter: ActorId, consume: bool) -> SimcallResult {
        let waiter_host = self.actors.get(&waiter).map(|r| r.host);
        let Some(activity) = self.activities.get_mut(&id) else {
            return Err(SimError::Canceled);
        };
        match activity.state {
            ActivityState::Done => match activity.comm_mut() {
                Some(comm) if consume && comm.receiver == Some(waiter) => comm
                    .payload
                    .take()
                    .map(SimcallValue::Payload)
                    .ok_or(SimError::PayloadConsumed),
                _ => Ok(SimcallValue::Unit),
            },
            ActivityState::Failed => {
                let is_comm = activity.comm().is_some();
                Err(match activity.failure {
                    None | Some(FailureCause::Timeout) => SimError::Timeout,
                    Some(FailureCause::Host(host)) if !is_comm || waiter_host == Some(host) => {
                        SimError::HostFailure(host)
                    }
                    Some(FailureCause::Host(_)) | Some(FailureCause::PeerTerminated) => {
                        SimError::NetworkFailure(NetworkFailure::RemotePeerFailure)
                    }
                    Some(FailureCause::Link(link)) => {
                        SimError::NetworkFailure(NetworkFailure::LinkFailure(link))
                    }
                })
            }
            ActivityState::Canceled => Err(SimError::Canceled),
            ActivityState::Init | ActivityState::Ready | ActivityState::Running => {
                Ok(SimcallValue::Pending)
            }
        }
    }

    fn maybe_release(&mut self, id: ActivityId) {
        let releasable = self.activities.get(&id).is_some_and(|a| {
            a.state.is_terminal()
                && a.refs == 0
                && a.waiters.is_empty()
                && !a.comm().is_some_and(|c| c.queued)
        });
        if releasable {
            self.activities.remove(&id);
            trace!(activity = %id, "activity destroyed");
            self.emit(Event::ActivityDestroyed(id));
        }
    }

    pub(crate) fn ref_activity(&mut self, id: ActivityId) {
        if let Some(activity) = self.activities.get_mut(&id) {
            activity.refs += 1;
        }
    }

    pub(crate) fn unref_activity(&mut self, id: ActivityId) {
        let Some(activity) = self.activities.get_mut(&id) else {
            return;
        };
        activity.refs = activity.refs.saturating_sub(1);
        let abandoned = activity.refs == 0
            && !activity.state.is_terminal()
            && !activity.detached()
            && activity.waiters.is_empty();
        if abandoned {
            debug!(activity = %id, "last handle dropped, canceling activity");
            self.finish_activity(id, ActivityState::Canceled, None);
        }
        self.maybe_release(id);
    }

    pub(crate) fn orphans(&self) -> Orphans {
        self.orphans.clone()
    }

    /// Drops the references of handles that went away while the kernel was busy.
    fn release_orphans(&mut self) {
        loop {
            let orphans = std::mem::take(&mut *self.orphans.borrow_mut());
            if orphans.is_empty() {
                return;
            }
            for id in orphans {
                self.unref_activity(id);
            }
        }
    }

    pub(crate) fn detach_activity(&mut self, id: ActivityId) {
        if let Some(comm) = self.activities.get_mut(&id).and_then(Activity::comm_mut) {
            comm.detached = true;
        }
    }

    pub(crate) fn activity_state(&self, id: ActivityId) -> ActivityState {
        // only terminal activities are ever released
        self.activities
            .get(&id)
            .map_or(ActivityState::Done, |a| a.state)
    }

    pub(crate) fn activity_kind(&self, id: ActivityId) -> Option<ActivityKind> {
        self.activities.get(&id).map(|a| a.data.kind())
    }

    pub(crate) fn activity_remaining(&self, id: ActivityId) -> Option<f64> {
        let activity = self.activities.get(&id)?;
        match activity.action {
            Some(action) => self.resources.remaining(action),
            None if activity.state == ActivityState::Done => Some(0.0),
            None => None,
        }
    }

    // ---- time ----

    fn add_timer(&mut self, at: SimTime, timer: Timer) -> TimerId {
        let id = self.timer_ids.next();
        self.timers.insert(id, timer);
        self.resources.schedule_timer(id, at.max(self.now()));
        id
    }

    fn cancel_timer(&mut self, id: TimerId) {
        if self.timers.remove(&id).is_some() {
            self.resources.cancel_timer(id);
        }
    }

    /// Lets the resource model recompute rates and marks activities that started
    /// progressing as RUNNING.
    pub(crate) fn sync_resources(&mut self) {
        self.release_orphans();
        for id in self.resources.update() {
            if self
                .activities
                .get(&id)
                .is_some_and(|a| a.state == ActivityState::Ready)
            {
                self.set_activity_state(id, ActivityState::Running);
            }
        }
    }

    pub(crate) fn next_event_time(&mut self) -> Option<SimTime> {
        self.sync_resources();
        self.resources.next_event_time()
    }

    /// Advances the clock to `to` and processes every event due by then: completed actions in
    /// activity creation order, then fired timers in creation order.
    pub(crate) fn advance_to(&mut self, to: SimTime) -> Result<(), KernelError> {
        let now = self.now();
        if to < now {
            return Err(KernelError::violation(format!(
                "time would move backwards from {now} to {to}"
            )));
        }
        let advance = self.resources.advance_to(to);
        debug!(now = %to, finished = advance.finished.len(), timers = advance.timers.len(), "time advanced");
        self.emit(Event::TimeAdvanced(to));
        for (_, activity) in advance.finished {
            self.action_finished(activity);
        }
        for timer in advance.timers {
            self.fire_timer(timer);
        }
        self.sync_resources();
        Ok(())
    }

    fn action_finished(&mut self, id: ActivityId) {
        let Some(activity) = self.activities.get_mut(&id) else {
            return;
        };
        activity.action = None;
        if activity.data.kind() == ActivityKind::Raw {
            self.raw_timed_out(id);
        } else {
            self.finish_activity(id, ActivityState::Done, None);
        }
    }

    fn fire_timer(&mut self, id: TimerId) {
        let Some(timer) = self.timers.remove(&id) else {
            return;
        };
        trace!(timer = %id, "timer fired");
        match timer {
            Timer::WaitTimeout { actor } => self.wait_timed_out(actor),
            Timer::JoinTimeout { actor } => self.join_timed_out(actor),
            Timer::Kill { actor } => {
                debug!(%actor, "kill time reached");
                if let Some(record) = self.actors.get_mut(&actor) {
                    record.kill_timer = None;
                }
                self.kill_actor(actor);
            }
            Timer::State { component, on } => match component {
                Component::Host(host) => self.set_host_state(host, on),
                Component::Link(link) => self.set_link_state(link, on),
            },
        }
    }

    // ---- queries ----

    pub(crate) fn actor_name(&self, actor: ActorId) -> Option<&str> {
        self.actors.get(&actor).map(|r| r.name.as_str())
    }

    pub(crate) fn actor_host(&self, actor: ActorId) -> Option<HostId> {
        self.actors.get(&actor).map(|r| r.host)
    }

    pub(crate) fn is_alive(&self, actor: ActorId) -> bool {
        self.actors.contains_key(&actor)
    }

    pub(crate) fn host(&self, host: HostId) -> Option<&HostRecord> {
        self.hosts.get(host.to_index())
    }

    pub(crate) fn link_exists(&self, link: LinkId) -> bool {
        link.to_index() < self.links.len()
    }

    pub(crate) fn host_is_on(&self, host: HostId) -> bool {
        self.host(host).is_some_and(|h| h.on)
    }

    /// Whether an actor other than a daemon is still alive.
    pub(crate) fn has_regular_actors(&self) -> bool {
        self.actors.values().any(|r| !r.daemon)
    }

    pub(crate) fn daemons(&self) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|(_, r)| r.daemon)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn blocked_actors(&self) -> Vec<BlockedActor> {
        self.actors
            .iter()
            .map(|(id, record)| BlockedActor {
                actor: *id,
                name: record.name.clone(),
                host: record.host,
                simcall: record.last_simcall,
                waiting_for: self.describe_blocked(record),
            })
            .collect()
    }

    fn describe_blocked(&self, record: &ActorRecord) -> String {
        let describe = |id: &ActivityId| match self.activities.get(id) {
            Some(activity) => activity.to_string(),
            None => id.to_string(),
        };
        match &record.blocked {
            Some(Blocked::Activity(id)) => describe(id),
            Some(Blocked::Any(ids)) => {
                let ids: Vec<String> = ids.iter().map(describe).collect();
                format!("any of [{}]", ids.join(", "))
            }
            Some(Blocked::Join(actor)) => format!("termination of {actor}"),
            Some(Blocked::Suspended) => "resumption".to_owned(),
            None if record.suspended => "resumption".to_owned(),
            None => "nothing".to_owned(),
        }
    }
}
