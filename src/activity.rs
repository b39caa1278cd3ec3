//! Activities: the things actors wait for.
//!
//! Every activity variant shares one state machine:
//!
//! ```text
//! INIT ──▶ READY ──▶ RUNNING ──▶ DONE
//!   │        │          │
//!   └────────┴──────────┴──────▶ FAILED | CANCELED
//! ```
//!
//! An activity enters READY when its resource action is allocated and RUNNING once that action
//! makes progress. The three right-most states are terminal: entering one of them notifies every
//! waiting actor exactly once, and the activity never changes state again.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::id::{ActionId, ActivityId, ActorId, CondId, HostId, MailboxId, MutexId, SemId, StorageId};
use crate::kernel::Kernel;

/// Data carried by a communication.
pub type Payload = Box<dyn Any>;

/// A receiver-side predicate deciding whether a sent payload may be matched.
pub type MatchFn = Rc<dyn Fn(&dyn Any) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActivityState {
    Init,
    Ready,
    Running,
    Done,
    Failed,
    Canceled,
}

impl ActivityState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActivityState::Done | ActivityState::Failed | ActivityState::Canceled
        )
    }
}

/// The variant of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActivityKind {
    Exec,
    Comm,
    Io,
    Sleep,
    Raw,
}

/// Why an activity failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCause {
    Timeout,
    Host(HostId),
    Link(Option<crate::id::LinkId>),
    /// The actor on the other side of a communication was killed.
    PeerTerminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// The synchronization object a raw activity waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncObject {
    Mutex(MutexId),
    Cond(CondId),
    Sem(SemId),
}

pub(crate) struct Exec {
    pub(crate) host: HostId,
    pub(crate) flops: f64,
}

pub(crate) struct Comm {
    pub(crate) mailbox: MailboxId,
    pub(crate) sender: Option<ActorId>,
    pub(crate) receiver: Option<ActorId>,
    pub(crate) sender_host: Option<HostId>,
    pub(crate) receiver_host: Option<HostId>,
    pub(crate) size: f64,
    pub(crate) rate: f64,
    pub(crate) payload: Option<Payload>,
    pub(crate) matcher: Option<MatchFn>,
    pub(crate) detached: bool,
    /// Whether the comm still sits in its mailbox, pending or eagerly started.
    pub(crate) queued: bool,
}

impl Comm {
    pub(crate) fn accepts(&self, payload: &dyn Any) -> bool {
        self.matcher.as_ref().is_none_or(|m| m(payload))
    }
}

pub(crate) struct Io {
    pub(crate) storage: StorageId,
    pub(crate) host: HostId,
    pub(crate) op: IoOp,
    pub(crate) size: f64,
}

pub(crate) struct Raw {
    pub(crate) host: HostId,
    pub(crate) on: SyncObject,
}

pub(crate) enum ActivityData {
    Exec(Exec),
    Comm(Comm),
    Io(Io),
    Sleep { host: HostId, duration: f64 },
    Raw(Raw),
}

impl ActivityData {
    pub(crate) fn kind(&self) -> ActivityKind {
        match self {
            ActivityData::Exec(_) => ActivityKind::Exec,
            ActivityData::Comm(_) => ActivityKind::Comm,
            ActivityData::Io(_) => ActivityKind::Io,
            ActivityData::Sleep { .. } => ActivityKind::Sleep,
            ActivityData::Raw(_) => ActivityKind::Raw,
        }
    }
}

pub(crate) struct Activity {
    pub(crate) id: ActivityId,
    pub(crate) state: ActivityState,
    pub(crate) data: ActivityData,
    pub(crate) waiters: Vec<ActorId>,
    pub(crate) action: Option<ActionId>,
    pub(crate) failure: Option<FailureCause>,
    /// Number of live handles, plus one for an answer not yet picked up.
    pub(crate) refs: usize,
}

impl Activity {
    pub(crate) fn new(id: ActivityId, data: ActivityData, refs: usize) -> Self {
        Activity {
            id,
            state: ActivityState::Init,
            data,
            waiters: Vec::new(),
            action: None,
            failure: None,
            refs,
        }
    }

    pub(crate) fn comm(&self) -> Option<&Comm> {
        match &self.data {
            ActivityData::Comm(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn comm_mut(&mut self) -> Option<&mut Comm> {
        match &mut self.data {
            ActivityData::Comm(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn detached(&self) -> bool {
        self.comm().is_some_and(|c| c.detached)
    }

    /// The host an activity is bound to, if it runs on a single host.
    pub(crate) fn host(&self) -> Option<HostId> {
        match &self.data {
            ActivityData::Exec(e) => Some(e.host),
            ActivityData::Io(io) => Some(io.host),
            ActivityData::Sleep { host, .. } => Some(*host),
            ActivityData::Raw(r) => Some(r.host),
            ActivityData::Comm(_) => None,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ActivityData::Exec(exec) => write!(f, "exec {} of {} flops", self.id, exec.flops)?,
            ActivityData::Comm(comm) => write!(f, "comm {} on {}", self.id, comm.mailbox)?,
            ActivityData::Io(io) => {
                write!(f, "{:?} {} of {} bytes from {}", io.op, self.id, io.size, io.storage)?
            }
            ActivityData::Sleep { duration, .. } => write!(f, "sleep {} for {duration}s", self.id)?,
            ActivityData::Raw(raw) => write!(f, "wait {} on {:?}", self.id, raw.on)?,
        }
        if let Some(host) = self.host() {
            write!(f, " at {host}")?;
        }
        write!(f, " ({:?})", self.state)
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("kind", &self.data.kind())
            .field("state", &self.state)
            .field("waiters", &self.waiters)
            .finish_non_exhaustive()
    }
}

/// A reference to an activity started by an actor.
///
/// The activity stays alive as long as a handle refers to it. Dropping the last handle of an
/// activity that has not finished cancels it; use [`detach`](Self::detach) to let a
/// communication complete on its own instead.
pub struct ActivityHandle {
    id: ActivityId,
    kernel: Rc<RefCell<Kernel>>,
    orphans: Orphans,
}

/// References given up while the kernel was busy, released at the end of the round.
pub(crate) type Orphans = Rc<RefCell<Vec<ActivityId>>>;

impl ActivityHandle {
    /// Takes over the reference the kernel reserved when answering the simcall that created it.
    pub(crate) fn adopt(id: ActivityId, kernel: Rc<RefCell<Kernel>>) -> Self {
        let orphans = kernel.borrow().orphans();
        ActivityHandle {
            id,
            kernel,
            orphans,
        }
    }

    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn state(&self) -> ActivityState {
        self.kernel.borrow().activity_state(self.id)
    }

    pub fn kind(&self) -> Option<ActivityKind> {
        self.kernel.borrow().activity_kind(self.id)
    }

    /// Work (flops or bytes) still to be done, if the activity is in progress.
    pub fn remaining(&self) -> Option<f64> {
        self.kernel.borrow().activity_remaining(self.id)
    }

    /// Lets a communication finish without anybody holding a handle to it.
    ///
    /// For other activities this is the same as dropping the handle.
    pub fn detach(self) {
        self.kernel.borrow_mut().detach_activity(self.id);
    }
}

impl Clone for ActivityHandle {
    fn clone(&self) -> Self {
        self.kernel.borrow_mut().ref_activity(self.id);
        ActivityHandle {
            id: self.id,
            kernel: self.kernel.clone(),
            orphans: self.orphans.clone(),
        }
    }
}

impl Drop for ActivityHandle {
    fn drop(&mut self) {
        // a handle inside a payload is dropped while the kernel is busy releasing it
        match self.kernel.try_borrow_mut() {
            Ok(mut kernel) => kernel.unref_activity(self.id),
            Err(_) => {
                trace!(activity = %self.id, "handle dropped while the kernel is busy");
                self.orphans.borrow_mut().push(self.id);
            }
        }
    }
}

impl fmt::Debug for ActivityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActivityHandle").field(&self.id).finish()
    }
}
