//! The maestro's scheduling loop.
//!
//! Actors are futures owned by the [`Engine`]. A round polls every ready actor once, each one
//! running until its next simcall, then lets the kernel handle the simcalls gathered during the
//! round. When a round makes no progress, time advances to the next event of the resource
//! model.
use crate::actor::Actor;
use crate::config::SimConfig;
use crate::error::{KernelError, SimError};
use crate::event::{Event, EventHandler, NoopEventHandler};
use crate::id::{ActorId, HostId, LinkId, MailboxId};
use crate::kernel::{Kernel, PendingSpawn};
use crate::observer::Observer;
use crate::platform::Platform;
use crate::scheduling::{AscendingId, PendingSimcall, SchedulingPolicy, SeededRandom};
use crate::simcall::SpawnOptions;
use crate::time::SimTime;
use cooked_waker::{IntoWaker, WakeRef};
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tracing::{debug, error, info, trace};

/// Actors whose simcall was answered, or that were woken, since the last round.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    ready: Mutex<BTreeSet<ActorId>>,
}

impl ReadyQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<ActorId>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, actor: ActorId) {
        self.lock().insert(actor);
    }

    fn take(&self) -> BTreeSet<ActorId> {
        std::mem::take(&mut *self.lock())
    }

    fn snapshot(&self) -> Vec<ActorId> {
        self.lock().iter().copied().collect()
    }

    fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

struct ActorWaker {
    actor: ActorId,
    ready: Arc<ReadyQueue>,
}

impl WakeRef for ActorWaker {
    fn wake_by_ref(&self) {
        self.ready.push(self.actor);
    }
}

pin_project_lite::pin_project! {
    struct ActorTask<F> {
        waker: Arc<ActorWaker>,
        #[pin]
        body: F,
    }
}

trait ActorTaskDyn {
    /// Polls the actor body once. Returns false once the body completed.
    fn run(self: Pin<&mut Self>) -> bool;
}

impl<F: Future<Output = ()>> ActorTaskDyn for ActorTask<F> {
    fn run(self: Pin<&mut Self>) -> bool {
        let this = self.project();
        let waker = this.waker.clone().into_waker();
        match this.body.poll(&mut Context::from_waker(&waker)) {
            Poll::Ready(()) => false,
            Poll::Pending => true,
        }
    }
}

/// Why [`Engine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every non-daemon actor terminated.
    Completed,
    /// The next event lies beyond the configured maximum time.
    TimeLimit,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    pub end_time: SimTime,
    pub rounds: u64,
    pub reason: StopReason,
}

/// A simulation: the kernel plus the actors running on it.
///
/// The engine is neither `Send` nor `Sync`. After a fatal [`KernelError`] it is poisoned and
/// every further operation fails with [`KernelError::Terminated`].
pub struct Engine {
    kernel: Rc<RefCell<Kernel>>,
    ready: Arc<ReadyQueue>,
    actors: BTreeMap<ActorId, Pin<Box<dyn ActorTaskDyn>>>,
    policy: Box<dyn SchedulingPolicy>,
    config: SimConfig,
    rounds: u64,
    poisoned: bool,
}

impl Engine {
    pub fn new(platform: &Platform, config: SimConfig) -> Self {
        Self::with_event_handler(platform, config, Box::new(NoopEventHandler))
    }

    pub(crate) fn with_event_handler(
        platform: &Platform,
        config: SimConfig,
        event_handler: Box<dyn EventHandler>,
    ) -> Self {
        let ready = Arc::new(ReadyQueue::default());
        let kernel = Kernel::new(platform, &config, ready.clone(), event_handler);
        let policy: Box<dyn SchedulingPolicy> = match config.seed {
            Some(seed) => Box::new(SeededRandom::new(seed)),
            None => Box::new(AscendingId),
        };
        Engine {
            kernel: Rc::new(RefCell::new(kernel)),
            ready,
            actors: BTreeMap::new(),
            policy,
            config,
            rounds: 0,
            poisoned: false,
        }
    }

    pub fn now(&self) -> SimTime {
        self.kernel.borrow().now()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Creates an actor running `body` on `host`. It first runs in the next round.
    pub fn spawn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        host: HostId,
        body: F,
    ) -> Result<ActorId, SimError>
    where
        F: FnOnce(Actor) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.spawn_with(name, host, SpawnOptions::default(), body)
    }

    pub fn spawn_with<F, Fut>(
        &mut self,
        name: impl Into<String>,
        host: HostId,
        options: SpawnOptions,
        body: F,
    ) -> Result<ActorId, SimError>
    where
        F: FnOnce(Actor) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let actor = self.kernel.borrow_mut().create_actor(
            name.into(),
            host,
            options,
            Box::new(move |actor| body(actor).boxed_local()),
        )?;
        self.reap();
        Ok(actor)
    }

    /// Kills an actor from outside the simulation.
    pub fn kill(&mut self, actor: ActorId) -> Result<(), SimError> {
        let mut kernel = self.kernel.borrow_mut();
        if !kernel.is_alive(actor) {
            return Err(SimError::NoSuchActor(actor));
        }
        kernel.kill_actor(actor);
        drop(kernel);
        self.reap();
        Ok(())
    }

    pub fn kill_all(&mut self) {
        self.kernel.borrow_mut().kill_all(None);
        self.reap();
    }

    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.kernel.borrow().is_alive(actor)
    }

    /// Looks up a mailbox by name, creating it on first use.
    pub fn mailbox(&mut self, name: &str) -> MailboxId {
        self.kernel.borrow_mut().mailbox_by_name(name)
    }

    /// Sets or clears the permanent receiver of a mailbox.
    pub fn set_receiver(&mut self, mailbox: MailboxId, receiver: Option<ActorId>) {
        self.kernel.borrow_mut().set_receiver(mailbox, receiver);
    }

    pub fn set_host_state(&mut self, host: HostId, on: bool) -> Result<(), KernelError> {
        self.check_poisoned()?;
        let mut kernel = self.kernel.borrow_mut();
        if kernel.host(host).is_none() {
            return Err(KernelError::UnknownHost(host));
        }
        kernel.set_host_state(host, on);
        drop(kernel);
        self.reap();
        Ok(())
    }

    pub fn host_is_on(&self, host: HostId) -> bool {
        self.kernel.borrow().host_is_on(host)
    }

    pub fn set_link_state(&mut self, link: LinkId, on: bool) -> Result<(), KernelError> {
        self.check_poisoned()?;
        let mut kernel = self.kernel.borrow_mut();
        if !kernel.link_exists(link) {
            return Err(KernelError::UnknownLink(link));
        }
        kernel.set_link_state(link, on);
        drop(kernel);
        self.reap();
        Ok(())
    }

    /// Registers an observer.
    ///
    /// Panics if an observer of the same type is already registered.
    pub fn add_observer<O: Observer>(&mut self, observer: O) {
        let mut kernel = self.kernel.borrow_mut();
        assert!(
            kernel
                .observers
                .iter()
                .all(|(id, _)| *id != TypeId::of::<O>()),
            "observer already registered: {}",
            std::any::type_name::<O>()
        );
        kernel.observers.push((TypeId::of::<O>(), Box::new(observer)));
    }

    /// Calls `f` with the observer of type `O`, if one is registered.
    pub fn with_observer<O: Observer, R>(&mut self, f: impl FnOnce(&mut O) -> R) -> Option<R> {
        let mut kernel = self.kernel.borrow_mut();
        let (_, observer) = kernel
            .observers
            .iter_mut()
            .find(|(id, _)| *id == TypeId::of::<O>())?;
        <dyn Any>::downcast_mut(&mut **observer).map(f)
    }

    /// Replaces the order in which the simcalls of a round are handled.
    pub fn set_policy(&mut self, policy: impl SchedulingPolicy + 'static) {
        self.policy = Box::new(policy);
    }

    /// Actors that will run in the next round.
    pub fn runnable(&self) -> Vec<ActorId> {
        self.ready.snapshot()
    }

    /// Simcalls issued but not handled yet.
    pub fn pending_simcalls(&self) -> Vec<PendingSimcall> {
        self.kernel.borrow().pending_simcalls()
    }

    /// Handles the pending simcall of `actor` now, ahead of the others.
    pub fn handle_simcall(&mut self, actor: ActorId) -> Result<(), KernelError> {
        self.check_poisoned()?;
        let result = self.kernel.borrow_mut().handle(actor);
        if let Err(err) = result {
            return Err(self.poison(err));
        }
        self.reap();
        self.check_fatal()
    }

    /// Polls every ready actor once, then handles the simcalls they issued. Returns how many
    /// actors ran.
    pub fn run_round(&mut self) -> Result<usize, KernelError> {
        let progressed = self.poll_ready()?;
        let pending = self.kernel.borrow().pending_simcalls();
        if !pending.is_empty() {
            let order = self.policy.order(&pending);
            let mut handled = BTreeSet::new();
            let known: BTreeSet<ActorId> = pending.iter().map(|p| p.actor).collect();
            for actor in order
                .into_iter()
                .filter(|a| known.contains(a))
                .chain(known.iter().copied())
            {
                if handled.insert(actor) {
                    self.handle_simcall(actor)?;
                }
            }
        }
        self.kernel.borrow_mut().sync_resources();
        self.reap();
        trace!(round = self.rounds, progressed, "round done");
        Ok(progressed)
    }

    /// Runs every ready actor until its next simcall without handling the simcalls, leaving a
    /// decision point where [`pending_simcalls`](Self::pending_simcalls) lists the choices.
    pub fn poll_ready(&mut self) -> Result<usize, KernelError> {
        self.check_poisoned()?;
        self.rounds += 1;
        let mut progressed = 0;
        for actor in self.ready.take() {
            if self.kernel.borrow_mut().park_if_suspended(actor) {
                trace!(%actor, "actor is suspended");
                continue;
            }
            let Some(task) = self.actors.get_mut(&actor) else {
                continue;
            };
            {
                let mut kernel = self.kernel.borrow_mut();
                kernel.running = Some(actor);
                kernel.emit(Event::ActorResumed(actor));
            }
            let kernel = self.kernel.clone();
            let guard = scopeguard::guard((), move |()| kernel.borrow_mut().running = None);
            trace!(%actor, "running actor");
            let alive = task.as_mut().run();
            drop(guard);
            progressed += 1;
            if !alive {
                self.kernel.borrow_mut().actor_finished(actor);
                self.actors.remove(&actor);
            }
            self.check_fatal()?;
        }
        self.reap();
        Ok(progressed)
    }

    /// Advances the clock to the next event and processes everything due at that instant.
    /// Returns the actors that became ready; empty if no event is scheduled.
    pub fn advance_time(&mut self) -> Result<Vec<ActorId>, KernelError> {
        self.check_poisoned()?;
        let result = {
            let mut kernel = self.kernel.borrow_mut();
            match kernel.next_event_time() {
                Some(next) => kernel.advance_to(next),
                None => return Ok(Vec::new()),
            }
        };
        if let Err(err) = result {
            return Err(self.poison(err));
        }
        self.reap();
        self.check_fatal()?;
        Ok(self.ready.snapshot())
    }

    /// Runs until every non-daemon actor terminated, the maximum time is reached, or no actor
    /// can make progress anymore.
    pub fn run(&mut self) -> Result<RunReport, KernelError> {
        self.check_poisoned()?;
        info!(actors = self.actors.len(), "simulation started");
        loop {
            self.run_round()?;
            if !self.ready.is_empty() {
                continue;
            }
            if !self.kernel.borrow().has_regular_actors() {
                return Ok(self.finish(StopReason::Completed));
            }
            let next = self.kernel.borrow_mut().next_event_time();
            match next {
                None => {
                    let kernel = self.kernel.borrow();
                    let err = KernelError::Deadlock {
                        time: kernel.now(),
                        blocked: kernel.blocked_actors(),
                    };
                    drop(kernel);
                    if let KernelError::Deadlock { blocked, .. } = &err {
                        for actor in blocked {
                            error!("blocked: {actor}");
                        }
                    }
                    return Err(self.poison(err));
                }
                Some(next) => {
                    if let Some(max) = self.config.max_time.filter(|max| next > *max) {
                        // nothing is due before the limit; the clock still reaches it
                        let to = max.max(self.now());
                        let result = self.kernel.borrow_mut().advance_to(to);
                        if let Err(err) = result {
                            return Err(self.poison(err));
                        }
                        return Ok(self.finish(StopReason::TimeLimit));
                    }
                    self.advance_time()?;
                }
            }
        }
    }

    fn finish(&mut self, reason: StopReason) -> RunReport {
        let daemons = self.kernel.borrow().daemons();
        if !daemons.is_empty() {
            debug!(count = daemons.len(), "killing remaining daemons");
            let mut kernel = self.kernel.borrow_mut();
            for daemon in daemons {
                kernel.kill_actor(daemon);
            }
        }
        self.reap();
        let report = RunReport {
            end_time: self.now(),
            rounds: self.rounds,
            reason,
        };
        info!(end_time = %report.end_time, rounds = report.rounds, ?reason, "simulation finished");
        report
    }

    pub(crate) fn finish_events(&mut self) -> Box<dyn Any> {
        // dropping the remaining actors may still release activities
        let actors = std::mem::take(&mut self.actors);
        drop(actors);
        self.kernel.borrow_mut().finish_events()
    }

    /// Starts the bodies of newly spawned actors and drops those of killed ones, outside any
    /// kernel borrow.
    fn reap(&mut self) {
        let spawned = self.kernel.borrow_mut().take_spawned();
        for PendingSpawn { actor, body } in spawned {
            let future = body(Actor::new(actor, self.kernel.clone()));
            self.actors.insert(
                actor,
                Box::pin(ActorTask {
                    waker: Arc::new(ActorWaker {
                        actor,
                        ready: self.ready.clone(),
                    }),
                    body: future,
                }),
            );
        }
        let dead = self.kernel.borrow_mut().take_dead();
        for actor in dead {
            self.actors.remove(&actor);
        }
    }

    fn check_poisoned(&self) -> Result<(), KernelError> {
        if self.poisoned {
            return Err(KernelError::Terminated);
        }
        Ok(())
    }

    fn check_fatal(&mut self) -> Result<(), KernelError> {
        let fatal = self.kernel.borrow_mut().take_fatal();
        match fatal {
            Some(err) => Err(self.poison(err)),
            None => Ok(()),
        }
    }

    fn poison(&mut self, err: KernelError) -> KernelError {
        error!("simulation aborted: {err}");
        self.poisoned = true;
        err
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // actor bodies hold handles into the kernel; drop them first
        self.actors.clear();
    }
}
