//! Error types.
//!
//! [`SimError`] is part of the simulated world: it is delivered to an actor as the result of a
//! simcall and the actor is expected to handle it. [`KernelError`] means the simulation itself
//! cannot continue; it aborts the run and poisons the engine.

use std::fmt;

use crate::id::{ActivityId, ActorId, HostId, LinkId};
use crate::simcall::SimcallKind;
use crate::time::SimTime;

/// A recoverable failure reported to an actor as the result of a simcall.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("operation timed out")]
    Timeout,
    #[error("host {0} failed")]
    HostFailure(HostId),
    #[error("network failure: {0}")]
    NetworkFailure(NetworkFailure),
    #[error("activity was canceled")]
    Canceled,
    #[error("{0} does not exist")]
    NoSuchActor(ActorId),
    #[error("{0} does not exist")]
    NoSuchHost(HostId),
    #[error("received payload has an unexpected type")]
    PayloadType,
    #[error("payload was already delivered")]
    PayloadConsumed,
}

/// The cause of a [`SimError::NetworkFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFailure {
    /// A link on the route failed while the communication was in progress.
    LinkFailure(Option<LinkId>),
    /// The host or actor on the other side of the communication is gone.
    RemotePeerFailure,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkFailure::LinkFailure(Some(link)) => write!(f, "{link} failed"),
            NetworkFailure::LinkFailure(None) => f.write_str("link failed"),
            NetworkFailure::RemotePeerFailure => f.write_str("remote peer failed"),
        }
    }
}

/// A fatal error that stops the simulation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelError {
    /// A kernel invariant was broken, usually by misuse of the actor API.
    #[error("consistency violation: {message} (actor: {actor:?}, activity: {activity:?}, mailbox: {mailbox:?})")]
    ConsistencyViolation {
        message: String,
        actor: Option<ActorId>,
        activity: Option<ActivityId>,
        mailbox: Option<String>,
    },
    /// Actors are alive but none of them can ever make progress again.
    #[error("deadlock at {time}: {} actor(s) blocked forever", blocked.len())]
    Deadlock {
        time: SimTime,
        blocked: Vec<BlockedActor>,
    },
    /// Two hosts exchanged data but the platform has no route between them.
    #[error("no route from {src} to {dst}")]
    NoRoute { src: HostId, dst: HostId },
    #[error("{0} does not exist")]
    UnknownHost(HostId),
    #[error("{0} does not exist")]
    UnknownLink(LinkId),
    /// The engine was already stopped by an earlier fatal error.
    #[error("simulation was terminated by an earlier fatal error")]
    Terminated,
}

impl KernelError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        KernelError::ConsistencyViolation {
            message: message.into(),
            actor: None,
            activity: None,
            mailbox: None,
        }
    }

    pub(crate) fn with_actor(mut self, id: ActorId) -> Self {
        if let KernelError::ConsistencyViolation { actor, .. } = &mut self {
            *actor = Some(id);
        }
        self
    }

    pub(crate) fn with_activity(mut self, id: ActivityId) -> Self {
        if let KernelError::ConsistencyViolation { activity, .. } = &mut self {
            *activity = Some(id);
        }
        self
    }

    pub(crate) fn with_mailbox(mut self, name: &str) -> Self {
        if let KernelError::ConsistencyViolation { mailbox, .. } = &mut self {
            *mailbox = Some(name.to_owned());
        }
        self
    }
}

/// Diagnostics about an actor left blocked when a deadlock was detected.
#[derive(Debug, Clone)]
pub struct BlockedActor {
    pub actor: ActorId,
    pub name: String,
    pub host: HostId,
    /// The last simcall the actor issued.
    pub simcall: Option<SimcallKind>,
    /// What the actor is waiting for.
    pub waiting_for: String,
}

impl fmt::Display for BlockedActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) on {} in {:?} waiting for {}",
            self.actor, self.name, self.host, self.simcall, self.waiting_for
        )
    }
}

/// Errors reading a [`SimConfig`](crate::config::SimConfig) from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

/// Errors describing an invalid platform.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("duplicate name {0:?}")]
    DuplicateName(String),
    #[error("{what} of {name:?} must be positive and finite, got {value}")]
    InvalidCapacity {
        name: String,
        what: &'static str,
        value: f64,
    },
    #[error("latency of {name:?} must be non-negative and finite, got {value}")]
    InvalidLatency { name: String, value: f64 },
    #[error("{0} does not exist")]
    UnknownHost(HostId),
    #[error("{0} does not exist")]
    UnknownLink(LinkId),
    #[error("state change at {0} is not a valid simulated time")]
    InvalidTime(f64),
}
