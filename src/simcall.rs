//! Simcalls: the requests actors submit to the maestro.
//!
//! An actor never touches kernel state that affects scheduling directly. It builds a
//! [`Simcall`], awaits the [`SimcallFuture`] returned by [`Actor::simcall`](crate::Actor::simcall)
//! and is resumed once the maestro has handled the request and produced a [`SimcallResult`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;

use crate::activity::{IoOp, MatchFn, Payload};
use crate::actor::Actor;
use crate::error::SimError;
use crate::id::{ActivityId, ActorId, CondId, HostId, LinkId, MailboxId, MutexId, SemId, StorageId};

/// The body of an actor spawned through a simcall.
pub type SpawnBody = Box<dyn FnOnce(Actor) -> LocalBoxFuture<'static, ()>>;

/// Options for spawning an actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnOptions {
    /// The actor is killed once simulated time reaches this instant, in seconds.
    pub kill_time: Option<f64>,
    /// Daemons do not keep the simulation alive.
    pub daemon: bool,
}

/// A request to the maestro.
pub enum Simcall {
    /// Start an execution of `flops` on the issuer's host.
    Exec {
        flops: f64,
        priority: f64,
        bound: Option<f64>,
    },
    /// Block for `duration` seconds.
    Sleep { duration: f64 },
    /// Start a read or write on a storage.
    Io {
        storage: StorageId,
        op: IoOp,
        size: f64,
    },
    /// Post a send on a mailbox.
    Send {
        mailbox: MailboxId,
        payload: Payload,
        size: f64,
        rate: Option<f64>,
        detached: bool,
    },
    /// Post a receive on a mailbox.
    Recv {
        mailbox: MailboxId,
        matcher: Option<MatchFn>,
        rate: Option<f64>,
    },
    /// Block until the activity ends, or at most `timeout` seconds.
    Wait {
        activity: ActivityId,
        timeout: Option<f64>,
    },
    /// Check whether the activity ended, without blocking.
    Test { activity: ActivityId },
    /// Block until one of the activities ends.
    WaitAny {
        activities: Vec<ActivityId>,
        timeout: Option<f64>,
    },
    TestAny { activities: Vec<ActivityId> },
    Cancel { activity: ActivityId },
    SetPriority { activity: ActivityId, priority: f64 },
    MutexLock { mutex: MutexId },
    MutexTryLock { mutex: MutexId },
    MutexUnlock { mutex: MutexId },
    CondWait {
        cond: CondId,
        mutex: MutexId,
        timeout: Option<f64>,
    },
    CondSignal { cond: CondId },
    CondBroadcast { cond: CondId },
    SemAcquire { sem: SemId, timeout: Option<f64> },
    SemRelease { sem: SemId },
    Spawn {
        name: String,
        host: HostId,
        options: SpawnOptions,
        body: SpawnBody,
    },
    Kill { actor: ActorId },
    KillAll,
    Suspend { actor: ActorId },
    Resume { actor: ActorId },
    Join {
        actor: ActorId,
        timeout: Option<f64>,
    },
    Daemonize,
    /// Let every other ready actor run before continuing.
    Yield,
    SetHostState { host: HostId, on: bool },
    SetLinkState { link: LinkId, on: bool },
}

/// The variant of a [`Simcall`], without its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SimcallKind {
    Exec,
    Sleep,
    Io,
    Send,
    Recv,
    Wait,
    Test,
    WaitAny,
    TestAny,
    Cancel,
    SetPriority,
    MutexLock,
    MutexTryLock,
    MutexUnlock,
    CondWait,
    CondSignal,
    CondBroadcast,
    SemAcquire,
    SemRelease,
    Spawn,
    Kill,
    KillAll,
    Suspend,
    Resume,
    Join,
    Daemonize,
    Yield,
    SetHostState,
    SetLinkState,
}

impl Simcall {
    pub fn kind(&self) -> SimcallKind {
        match self {
            Simcall::Exec { .. } => SimcallKind::Exec,
            Simcall::Sleep { .. } => SimcallKind::Sleep,
            Simcall::Io { .. } => SimcallKind::Io,
            Simcall::Send { .. } => SimcallKind::Send,
            Simcall::Recv { .. } => SimcallKind::Recv,
            Simcall::Wait { .. } => SimcallKind::Wait,
            Simcall::Test { .. } => SimcallKind::Test,
            Simcall::WaitAny { .. } => SimcallKind::WaitAny,
            Simcall::TestAny { .. } => SimcallKind::TestAny,
            Simcall::Cancel { .. } => SimcallKind::Cancel,
            Simcall::SetPriority { .. } => SimcallKind::SetPriority,
            Simcall::MutexLock { .. } => SimcallKind::MutexLock,
            Simcall::MutexTryLock { .. } => SimcallKind::MutexTryLock,
            Simcall::MutexUnlock { .. } => SimcallKind::MutexUnlock,
            Simcall::CondWait { .. } => SimcallKind::CondWait,
            Simcall::CondSignal { .. } => SimcallKind::CondSignal,
            Simcall::CondBroadcast { .. } => SimcallKind::CondBroadcast,
            Simcall::SemAcquire { .. } => SimcallKind::SemAcquire,
            Simcall::SemRelease { .. } => SimcallKind::SemRelease,
            Simcall::Spawn { .. } => SimcallKind::Spawn,
            Simcall::Kill { .. } => SimcallKind::Kill,
            Simcall::KillAll => SimcallKind::KillAll,
            Simcall::Suspend { .. } => SimcallKind::Suspend,
            Simcall::Resume { .. } => SimcallKind::Resume,
            Simcall::Join { .. } => SimcallKind::Join,
            Simcall::Daemonize => SimcallKind::Daemonize,
            Simcall::Yield => SimcallKind::Yield,
            Simcall::SetHostState { .. } => SimcallKind::SetHostState,
            Simcall::SetLinkState { .. } => SimcallKind::SetLinkState,
        }
    }
}

impl fmt::Debug for Simcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind(), f)
    }
}

/// The successful outcome of a simcall.
#[derive(Debug)]
pub enum SimcallValue {
    Unit,
    Bool(bool),
    Actor(ActorId),
    /// A new activity. The receiver owns one reference to it.
    Activity(ActivityId),
    Payload(Payload),
    Index(usize),
    /// A non-blocking check found nothing finished.
    Pending,
}

pub type SimcallResult = Result<SimcallValue, SimError>;

enum SimcallState {
    Init(Simcall),
    Issued,
    Done,
}

/// Resolves to the maestro's answer to a simcall.
///
/// The request is submitted the first time the future is polled. An actor may only have one
/// simcall in flight; issuing a second one before the first is answered stops the simulation
/// with a consistency violation.
#[must_use = "simcalls do nothing unless awaited"]
pub struct SimcallFuture {
    actor: Actor,
    state: SimcallState,
}

impl SimcallFuture {
    pub(crate) fn new(actor: Actor, call: Simcall) -> Self {
        SimcallFuture {
            actor,
            state: SimcallState::Init(call),
        }
    }
}

impl Future for SimcallFuture {
    type Output = SimcallResult;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut kernel = this.actor.kernel().borrow_mut();
        match std::mem::replace(&mut this.state, SimcallState::Issued) {
            SimcallState::Init(call) => {
                kernel.issue(this.actor.id(), call);
                Poll::Pending
            }
            SimcallState::Issued => match kernel.take_answer(this.actor.id()) {
                Some(answer) => {
                    this.state = SimcallState::Done;
                    Poll::Ready(answer)
                }
                None => Poll::Pending,
            },
            SimcallState::Done => panic!("simcall future polled after completion"),
        }
    }
}
