//! The handle actor code uses to talk to the maestro.
//!
//! Every operation that can block or that changes what other actors observe is a simcall:
//! the async methods of [`Actor`] build a [`Simcall`], await its answer and unpack the result.
//! Queries with no scheduling effect (the clock, names, mailbox lengths) read kernel state
//! directly.
//!
//! ```ignore
//! engine.spawn("pinger", host, |actor| async move {
//!     let mailbox = actor.mailbox("pong");
//!     actor.send(mailbox, 42u32, 1e6).await.unwrap();
//! })?;
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use futures::FutureExt;

use crate::activity::{ActivityHandle, ActivityState, IoOp, MatchFn};
use crate::error::SimError;
use crate::id::{ActorId, HostId, LinkId, MailboxId, StorageId};
use crate::kernel::Kernel;
use crate::simcall::{Simcall, SimcallFuture, SimcallResult, SimcallValue, SpawnOptions};
use crate::synchro::{SimCondvar, SimMutex, SimSemaphore};
use crate::time::SimTime;

/// A simulated process, as seen from its own code.
///
/// Handles are cheap to clone. A handle must only be used from the actor it designates; issuing
/// a simcall on behalf of another actor stops the simulation with a consistency violation.
#[derive(Clone)]
pub struct Actor {
    id: ActorId,
    kernel: Rc<RefCell<Kernel>>,
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Actor").field(&self.id).finish()
    }
}

fn unit(result: SimcallResult) -> Result<(), SimError> {
    result.map(|_| ())
}

fn unexpected(call: &str, value: SimcallValue) -> ! {
    unreachable!("kernel answered {call} with {value:?}")
}

impl Actor {
    pub(crate) fn new(id: ActorId, kernel: Rc<RefCell<Kernel>>) -> Self {
        Actor { id, kernel }
    }

    pub(crate) fn kernel(&self) -> &Rc<RefCell<Kernel>> {
        &self.kernel
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> String {
        self.kernel
            .borrow()
            .actor_name(self.id)
            .unwrap_or_default()
            .to_owned()
    }

    /// The host the actor runs on.
    pub fn host(&self) -> HostId {
        self.kernel
            .borrow()
            .actor_host(self.id)
            .unwrap_or_else(|| unreachable!("{} used after its termination", self.id))
    }

    pub fn now(&self) -> SimTime {
        self.kernel.borrow().now()
    }

    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.kernel.borrow().is_alive(actor)
    }

    pub fn host_is_on(&self, host: HostId) -> bool {
        self.kernel.borrow().host_is_on(host)
    }

    pub fn host_name(&self, host: HostId) -> Option<String> {
        self.kernel.borrow().host(host).map(|h| h.name.clone())
    }

    /// Submits a raw simcall. Every typed helper below goes through this.
    pub fn simcall(&self, call: Simcall) -> SimcallFuture {
        SimcallFuture::new(self.clone(), call)
    }

    fn activity(&self, call: &str, result: SimcallResult) -> Result<ActivityHandle, SimError> {
        match result? {
            SimcallValue::Activity(id) => Ok(ActivityHandle::adopt(id, self.kernel.clone())),
            other => unexpected(call, other),
        }
    }

    // ---- mailboxes ----

    /// Looks up a mailbox by name, creating it on first use.
    pub fn mailbox(&self, name: &str) -> MailboxId {
        self.kernel.borrow_mut().mailbox_by_name(name)
    }

    pub fn mailbox_name(&self, mailbox: MailboxId) -> Option<String> {
        self.kernel.borrow().mailbox_name(mailbox).map(str::to_owned)
    }

    /// Makes this actor the permanent receiver of `mailbox`: sends posted there start
    /// transferring right away, without waiting for a matching receive.
    pub fn set_receiver(&self, mailbox: MailboxId) {
        self.kernel.borrow_mut().set_receiver(mailbox, Some(self.id));
    }

    pub fn clear_receiver(&self, mailbox: MailboxId) {
        self.kernel.borrow_mut().set_receiver(mailbox, None);
    }

    pub fn receiver(&self, mailbox: MailboxId) -> Option<ActorId> {
        self.kernel.borrow().receiver(mailbox)
    }

    /// Number of communications waiting in the mailbox.
    pub fn mailbox_len(&self, mailbox: MailboxId) -> usize {
        self.kernel.borrow().mailbox_len(mailbox)
    }

    pub fn mailbox_is_empty(&self, mailbox: MailboxId) -> bool {
        self.mailbox_len(mailbox) == 0
    }

    /// Number of communications waiting in the mailbox that were sent from `host`.
    pub fn mailbox_comms_from(&self, mailbox: MailboxId, host: HostId) -> usize {
        self.kernel.borrow().mailbox_comms_from(mailbox, host)
    }

    // ---- computation, sleep and I/O ----

    pub async fn sleep(&self, duration: f64) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Sleep { duration }).await)
    }

    /// Executes `flops` on the actor's host and waits for completion.
    pub async fn execute(&self, flops: f64) -> Result<(), SimError> {
        self.exec_async(flops).await?.wait().await
    }

    pub async fn exec_async(&self, flops: f64) -> Result<ExecHandle, SimError> {
        self.exec_async_with(flops, 1.0, None).await
    }

    /// Starts an execution with a sharing weight and an optional rate bound.
    pub async fn exec_async_with(
        &self,
        flops: f64,
        priority: f64,
        bound: Option<f64>,
    ) -> Result<ExecHandle, SimError> {
        let result = self
            .simcall(Simcall::Exec {
                flops,
                priority,
                bound,
            })
            .await;
        Ok(ExecHandle {
            inner: self.activity("exec", result)?,
            actor: self.clone(),
        })
    }

    pub async fn io_async(
        &self,
        storage: StorageId,
        op: IoOp,
        size: f64,
    ) -> Result<ActivityHandle, SimError> {
        let result = self.simcall(Simcall::Io { storage, op, size }).await;
        self.activity("io", result)
    }

    pub async fn read(&self, storage: StorageId, size: f64) -> Result<(), SimError> {
        let io = self.io_async(storage, IoOp::Read, size).await?;
        self.wait(&io).await
    }

    pub async fn write(&self, storage: StorageId, size: f64) -> Result<(), SimError> {
        let io = self.io_async(storage, IoOp::Write, size).await?;
        self.wait(&io).await
    }

    // ---- communications ----

    /// Sends `payload` as `size` bytes and waits until the receiver got it.
    pub async fn send<T: Any>(&self, mailbox: MailboxId, payload: T, size: f64) -> Result<(), SimError> {
        self.isend(mailbox, payload, size).await?.wait().await
    }

    pub async fn send_timeout<T: Any>(
        &self,
        mailbox: MailboxId,
        payload: T,
        size: f64,
        timeout: f64,
    ) -> Result<(), SimError> {
        self.isend(mailbox, payload, size)
            .await?
            .wait_for(timeout)
            .await
    }

    pub async fn isend<T: Any>(&self, mailbox: MailboxId, payload: T, size: f64) -> Result<CommHandle, SimError> {
        self.isend_with(mailbox, payload, size, None).await
    }

    /// Posts a send whose transfer rate is capped at `rate` bytes per second.
    pub async fn isend_with<T: Any>(
        &self,
        mailbox: MailboxId,
        payload: T,
        size: f64,
        rate: Option<f64>,
    ) -> Result<CommHandle, SimError> {
        let result = self
            .simcall(Simcall::Send {
                mailbox,
                payload: Box::new(payload),
                size,
                rate,
                detached: false,
            })
            .await;
        Ok(CommHandle {
            inner: self.activity("send", result)?,
            actor: self.clone(),
        })
    }

    /// Sends without waiting for the transfer nor keeping a handle to it.
    pub async fn dsend<T: Any>(&self, mailbox: MailboxId, payload: T, size: f64) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::Send {
                mailbox,
                payload: Box::new(payload),
                size,
                rate: None,
                detached: true,
            })
            .await,
        )
    }

    pub async fn recv<T: Any>(&self, mailbox: MailboxId) -> Result<T, SimError> {
        self.irecv(mailbox).await?.wait().await
    }

    pub async fn recv_timeout<T: Any>(&self, mailbox: MailboxId, timeout: f64) -> Result<T, SimError> {
        self.irecv(mailbox).await?.wait_for(timeout).await
    }

    pub async fn irecv<T: Any>(&self, mailbox: MailboxId) -> Result<RecvHandle<T>, SimError> {
        self.post_recv(mailbox, None).await
    }

    /// Posts a receive that only matches payloads of type `T` accepted by `filter`.
    pub async fn irecv_matching<T: Any>(
        &self,
        mailbox: MailboxId,
        filter: impl Fn(&T) -> bool + 'static,
    ) -> Result<RecvHandle<T>, SimError> {
        let matcher: MatchFn = Rc::new(move |payload: &dyn Any| {
            payload.downcast_ref::<T>().is_some_and(&filter)
        });
        self.post_recv(mailbox, Some(matcher)).await
    }

    async fn post_recv<T: Any>(
        &self,
        mailbox: MailboxId,
        matcher: Option<MatchFn>,
    ) -> Result<RecvHandle<T>, SimError> {
        let result = self
            .simcall(Simcall::Recv {
                mailbox,
                matcher,
                rate: None,
            })
            .await;
        Ok(RecvHandle {
            inner: self.activity("recv", result)?,
            actor: self.clone(),
            _payload: PhantomData,
        })
    }

    // ---- generic activity operations ----

    /// Waits for an activity to end. A receiver waiting this way discards the payload.
    pub async fn wait(&self, activity: &ActivityHandle) -> Result<(), SimError> {
        self.wait_inner(activity, None).await.map(|_| ())
    }

    pub async fn wait_for(&self, activity: &ActivityHandle, timeout: f64) -> Result<(), SimError> {
        self.wait_inner(activity, Some(timeout)).await.map(|_| ())
    }

    async fn wait_inner(&self, activity: &ActivityHandle, timeout: Option<f64>) -> SimcallResult {
        self.simcall(Simcall::Wait {
            activity: activity.id(),
            timeout,
        })
        .await
    }

    /// Whether the activity ended. Reports the failure if it ended badly.
    pub async fn test(&self, activity: &ActivityHandle) -> Result<bool, SimError> {
        match self
            .simcall(Simcall::Test {
                activity: activity.id(),
            })
            .await?
        {
            SimcallValue::Bool(done) => Ok(done),
            other => unexpected("test", other),
        }
    }

    pub async fn cancel(&self, activity: &ActivityHandle) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::Cancel {
                activity: activity.id(),
            })
            .await,
        )
    }

    pub async fn set_priority(&self, activity: &ActivityHandle, priority: f64) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::SetPriority {
                activity: activity.id(),
                priority,
            })
            .await,
        )
    }

    /// Waits until one of `activities` ends and returns its index.
    pub async fn wait_any(&self, activities: &[&ActivityHandle]) -> Result<usize, SimError> {
        self.wait_any_inner(activities, None).await
    }

    pub async fn wait_any_for(&self, activities: &[&ActivityHandle], timeout: f64) -> Result<usize, SimError> {
        self.wait_any_inner(activities, Some(timeout)).await
    }

    async fn wait_any_inner(
        &self,
        activities: &[&ActivityHandle],
        timeout: Option<f64>,
    ) -> Result<usize, SimError> {
        let activities = activities.iter().map(|a| a.id()).collect();
        match self
            .simcall(Simcall::WaitAny {
                activities,
                timeout,
            })
            .await?
        {
            SimcallValue::Index(index) => Ok(index),
            other => unexpected("wait_any", other),
        }
    }

    /// Returns the index of an activity that ended, if any.
    pub async fn test_any(&self, activities: &[&ActivityHandle]) -> Result<Option<usize>, SimError> {
        let activities = activities.iter().map(|a| a.id()).collect();
        match self.simcall(Simcall::TestAny { activities }).await? {
            SimcallValue::Index(index) => Ok(Some(index)),
            SimcallValue::Pending => Ok(None),
            other => unexpected("test_any", other),
        }
    }

    // ---- synchronization ----

    pub fn new_mutex(&self) -> SimMutex {
        self.kernel.borrow_mut().create_mutex()
    }

    pub fn new_condvar(&self) -> SimCondvar {
        self.kernel.borrow_mut().create_cond()
    }

    pub fn new_semaphore(&self, capacity: u32) -> SimSemaphore {
        self.kernel.borrow_mut().create_sem(capacity)
    }

    pub async fn lock(&self, mutex: SimMutex) -> Result<(), SimError> {
        unit(self.simcall(Simcall::MutexLock { mutex: mutex.id() }).await)
    }

    pub async fn try_lock(&self, mutex: SimMutex) -> Result<bool, SimError> {
        match self
            .simcall(Simcall::MutexTryLock { mutex: mutex.id() })
            .await?
        {
            SimcallValue::Bool(locked) => Ok(locked),
            other => unexpected("try_lock", other),
        }
    }

    pub async fn unlock(&self, mutex: SimMutex) -> Result<(), SimError> {
        unit(self.simcall(Simcall::MutexUnlock { mutex: mutex.id() }).await)
    }

    pub fn mutex_owner(&self, mutex: SimMutex) -> Option<ActorId> {
        self.kernel.borrow().mutex_owner(mutex.id())
    }

    /// Releases `mutex`, waits for a notification and locks `mutex` again.
    pub async fn wait_cond(&self, cond: SimCondvar, mutex: SimMutex) -> Result<(), SimError> {
        self.cond_wait_inner(cond, mutex, None).await
    }

    /// Like [`wait_cond`](Self::wait_cond), but gives up after `timeout` seconds. The mutex is
    /// owned again when the timeout is reported.
    pub async fn wait_cond_for(&self, cond: SimCondvar, mutex: SimMutex, timeout: f64) -> Result<(), SimError> {
        self.cond_wait_inner(cond, mutex, Some(timeout)).await
    }

    async fn cond_wait_inner(
        &self,
        cond: SimCondvar,
        mutex: SimMutex,
        timeout: Option<f64>,
    ) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::CondWait {
                cond: cond.id(),
                mutex: mutex.id(),
                timeout,
            })
            .await,
        )
    }

    pub async fn notify_one(&self, cond: SimCondvar) -> Result<(), SimError> {
        unit(self.simcall(Simcall::CondSignal { cond: cond.id() }).await)
    }

    pub async fn notify_all(&self, cond: SimCondvar) -> Result<(), SimError> {
        unit(self.simcall(Simcall::CondBroadcast { cond: cond.id() }).await)
    }

    pub async fn acquire(&self, sem: SimSemaphore) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::SemAcquire {
                sem: sem.id(),
                timeout: None,
            })
            .await,
        )
    }

    pub async fn acquire_for(&self, sem: SimSemaphore, timeout: f64) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::SemAcquire {
                sem: sem.id(),
                timeout: Some(timeout),
            })
            .await,
        )
    }

    pub async fn release(&self, sem: SimSemaphore) -> Result<(), SimError> {
        unit(self.simcall(Simcall::SemRelease { sem: sem.id() }).await)
    }

    pub fn capacity(&self, sem: SimSemaphore) -> u32 {
        self.kernel.borrow().sem_capacity(sem.id())
    }

    pub fn would_block(&self, sem: SimSemaphore) -> bool {
        self.kernel.borrow().sem_would_block(sem.id())
    }

    // ---- actors ----

    pub async fn spawn<F, Fut>(
        &self,
        name: impl Into<String>,
        host: HostId,
        body: F,
    ) -> Result<ActorId, SimError>
    where
        F: FnOnce(Actor) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.spawn_with(name, host, SpawnOptions::default(), body)
            .await
    }

    pub async fn spawn_with<F, Fut>(
        &self,
        name: impl Into<String>,
        host: HostId,
        options: SpawnOptions,
        body: F,
    ) -> Result<ActorId, SimError>
    where
        F: FnOnce(Actor) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let call = Simcall::Spawn {
            name: name.into(),
            host,
            options,
            body: Box::new(move |actor| body(actor).boxed_local()),
        };
        match self.simcall(call).await? {
            SimcallValue::Actor(id) => Ok(id),
            other => unexpected("spawn", other),
        }
    }

    /// Kills `actor`. Killing oneself never returns.
    pub async fn kill(&self, actor: ActorId) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Kill { actor }).await)
    }

    /// Kills every other actor.
    pub async fn kill_all(&self) -> Result<(), SimError> {
        unit(self.simcall(Simcall::KillAll).await)
    }

    /// Terminates the calling actor.
    pub async fn exit(&self) {
        let _ = self.kill(self.id).await;
    }

    /// Suspends `actor`. Suspending oneself returns once another actor resumes us.
    pub async fn suspend(&self, actor: ActorId) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Suspend { actor }).await)
    }

    pub async fn suspend_self(&self) -> Result<(), SimError> {
        self.suspend(self.id).await
    }

    pub async fn resume(&self, actor: ActorId) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Resume { actor }).await)
    }

    /// Waits for `actor` to terminate.
    pub async fn join(&self, actor: ActorId) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Join { actor, timeout: None }).await)
    }

    pub async fn join_for(&self, actor: ActorId, timeout: f64) -> Result<(), SimError> {
        unit(
            self.simcall(Simcall::Join {
                actor,
                timeout: Some(timeout),
            })
            .await,
        )
    }

    /// Turns the calling actor into a daemon, which does not keep the simulation alive.
    pub async fn daemonize(&self) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Daemonize).await)
    }

    /// Lets the other actors of this round run first.
    pub async fn yield_now(&self) -> Result<(), SimError> {
        unit(self.simcall(Simcall::Yield).await)
    }

    pub async fn set_host_state(&self, host: HostId, on: bool) -> Result<(), SimError> {
        unit(self.simcall(Simcall::SetHostState { host, on }).await)
    }

    pub async fn set_link_state(&self, link: LinkId, on: bool) -> Result<(), SimError> {
        unit(self.simcall(Simcall::SetLinkState { link, on }).await)
    }
}

/// A running execution.
#[derive(Debug)]
pub struct ExecHandle {
    inner: ActivityHandle,
    actor: Actor,
}

impl ExecHandle {
    pub fn activity(&self) -> &ActivityHandle {
        &self.inner
    }

    pub fn state(&self) -> ActivityState {
        self.inner.state()
    }

    /// Flops still to compute.
    pub fn remaining(&self) -> Option<f64> {
        self.inner.remaining()
    }

    pub async fn wait(&self) -> Result<(), SimError> {
        self.actor.wait(&self.inner).await
    }

    pub async fn wait_for(&self, timeout: f64) -> Result<(), SimError> {
        self.actor.wait_for(&self.inner, timeout).await
    }

    pub async fn test(&self) -> Result<bool, SimError> {
        self.actor.test(&self.inner).await
    }

    pub async fn cancel(&self) -> Result<(), SimError> {
        self.actor.cancel(&self.inner).await
    }

    pub async fn set_priority(&self, priority: f64) -> Result<(), SimError> {
        self.actor.set_priority(&self.inner, priority).await
    }
}

/// The sending side of a communication.
#[derive(Debug)]
pub struct CommHandle {
    inner: ActivityHandle,
    actor: Actor,
}

impl CommHandle {
    pub fn activity(&self) -> &ActivityHandle {
        &self.inner
    }

    pub fn state(&self) -> ActivityState {
        self.inner.state()
    }

    pub async fn wait(&self) -> Result<(), SimError> {
        self.actor.wait(&self.inner).await
    }

    /// Waits at most `timeout` seconds. On timeout the communication fails for both sides.
    pub async fn wait_for(&self, timeout: f64) -> Result<(), SimError> {
        self.actor.wait_for(&self.inner, timeout).await
    }

    pub async fn test(&self) -> Result<bool, SimError> {
        self.actor.test(&self.inner).await
    }

    pub async fn cancel(&self) -> Result<(), SimError> {
        self.actor.cancel(&self.inner).await
    }

    /// Lets the communication complete without this handle.
    pub fn detach(self) {
        self.inner.detach();
    }
}

/// The receiving side of a communication carrying a `T`.
pub struct RecvHandle<T> {
    inner: ActivityHandle,
    actor: Actor,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Any> RecvHandle<T> {
    pub fn activity(&self) -> &ActivityHandle {
        &self.inner
    }

    pub fn state(&self) -> ActivityState {
        self.inner.state()
    }

    /// Waits for the payload.
    pub async fn wait(&self) -> Result<T, SimError> {
        self.take(self.actor.wait_inner(&self.inner, None).await)
    }

    pub async fn wait_for(&self, timeout: f64) -> Result<T, SimError> {
        self.take(self.actor.wait_inner(&self.inner, Some(timeout)).await)
    }

    /// Whether the payload arrived. It stays in place for a later [`wait`](Self::wait).
    pub async fn test(&self) -> Result<bool, SimError> {
        self.actor.test(&self.inner).await
    }

    pub async fn cancel(&self) -> Result<(), SimError> {
        self.actor.cancel(&self.inner).await
    }

    fn take(&self, result: SimcallResult) -> Result<T, SimError> {
        match result? {
            SimcallValue::Payload(payload) => payload
                .downcast::<T>()
                .map(|payload| *payload)
                .map_err(|_| SimError::PayloadType),
            other => unexpected("recv", other),
        }
    }
}

impl<T> fmt::Debug for RecvHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvHandle")
            .field("activity", &self.inner.id())
            .finish()
    }
}
