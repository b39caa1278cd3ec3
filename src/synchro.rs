//! Simulated synchronization primitives.
//!
//! These block simulated actors, never OS threads. Blocked actors wait on a raw activity bound
//! to their host, so a host failure or a timeout releases them like any other activity.

use std::collections::VecDeque;

use crate::error::SimError;
use crate::id::{ActivityId, ActorId, CondId, MutexId, SemId};
use crate::simcall::{SimcallResult, SimcallValue};

/// A simulated mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimMutex(pub(crate) MutexId);

/// A simulated condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimCondvar(pub(crate) CondId);

/// A simulated counting semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimSemaphore(pub(crate) SemId);

impl SimMutex {
    pub fn id(self) -> MutexId {
        self.0
    }
}

impl SimCondvar {
    pub fn id(self) -> CondId {
        self.0
    }
}

impl SimSemaphore {
    pub fn id(self) -> SemId {
        self.0
    }
}

/// What a blocked actor gets once it finally owns the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resumption {
    Locked,
    Signaled,
    TimedOut,
}

impl Resumption {
    pub(crate) fn result(self) -> SimcallResult {
        match self {
            Resumption::Locked | Resumption::Signaled => Ok(SimcallValue::Unit),
            Resumption::TimedOut => Err(SimError::Timeout),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MutexWaiter {
    pub(crate) actor: ActorId,
    pub(crate) raw: ActivityId,
    pub(crate) then: Resumption,
}

#[derive(Debug, Default)]
pub(crate) struct MutexImpl {
    pub(crate) owner: Option<ActorId>,
    pub(crate) sleeping: VecDeque<MutexWaiter>,
}

#[derive(Debug)]
pub(crate) struct CondWaiter {
    pub(crate) actor: ActorId,
    pub(crate) raw: ActivityId,
    pub(crate) mutex: MutexId,
}

#[derive(Debug, Default)]
pub(crate) struct CondImpl {
    pub(crate) sleeping: VecDeque<CondWaiter>,
}

#[derive(Debug)]
pub(crate) struct SemImpl {
    pub(crate) capacity: u32,
    pub(crate) sleeping: VecDeque<(ActorId, ActivityId)>,
}

impl SemImpl {
    pub(crate) fn new(capacity: u32) -> Self {
        SemImpl {
            capacity,
            sleeping: VecDeque::new(),
        }
    }
}
