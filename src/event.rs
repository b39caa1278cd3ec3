//! The event stream of a simulation.
//!
//! The kernel reports every scheduling decision and every activity transition as an [`Event`].
//! Events feed the observers registered on the engine and the determinism check of
//! [`SimBuilder`](crate::SimBuilder): two runs of the same simulation must produce the same
//! sequence.

use std::any::Any;
use std::hash::Hasher;
use std::rc::Rc;

use ahash::AHasher;

use crate::activity::{ActivityKind, ActivityState};
use crate::id::{ActivityId, ActorId, HostId, LinkId};
use crate::simcall::SimcallKind;
use crate::time::SimTime;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Event {
    ActorSpawned { actor: ActorId, host: HostId },
    ActorResumed(ActorId),
    SimcallHandled { actor: ActorId, simcall: SimcallKind },
    ActorTerminated { actor: ActorId, killed: bool },
    ActivityCreated { activity: ActivityId, kind: ActivityKind },
    ActivityStateChanged {
        activity: ActivityId,
        from: ActivityState,
        to: ActivityState,
    },
    ActivityDestroyed(ActivityId),
    TimeAdvanced(SimTime),
    HostStateChanged { host: HostId, on: bool },
    LinkStateChanged { link: LinkId, on: bool },
}

pub(crate) trait EventHandler {
    fn handle_event(&mut self, event: &Event);
    fn finalize(self: Box<Self>) -> Box<dyn Any>;
}

pub(crate) struct NoopEventHandler;

impl EventHandler for NoopEventHandler {
    fn handle_event(&mut self, _: &Event) {}

    fn finalize(self: Box<Self>) -> Box<dyn Any> {
        Box::new(())
    }
}

pub(crate) struct RecordingEventHandler {
    recorded_events: Vec<Event>,
}

impl RecordingEventHandler {
    pub(crate) fn new() -> Self {
        Self {
            recorded_events: Vec::new(),
        }
    }
}

impl EventHandler for RecordingEventHandler {
    fn handle_event(&mut self, event: &Event) {
        self.recorded_events.push(event.clone());
    }

    fn finalize(self: Box<Self>) -> Box<dyn Any> {
        Box::new(self.recorded_events)
    }
}

pub(crate) struct ValidatingEventHandler {
    expected: Rc<Vec<Event>>,
    next_event_index: usize,
}

impl ValidatingEventHandler {
    pub(crate) fn new(expected: Rc<Vec<Event>>) -> Self {
        Self {
            expected,
            next_event_index: 0,
        }
    }
}

impl EventHandler for ValidatingEventHandler {
    fn handle_event(&mut self, event: &Event) {
        let Some(expected) = self.expected.get(self.next_event_index) else {
            panic!("Non-Determinism detected: Expected no further events, but got '{event:?}'");
        };
        if event != expected {
            panic!(
                "Non-Determinism detected: Validation failed for event {index}: Expected '{expected:?}', but got '{event:?}'",
                index = self.next_event_index
            );
        }
        self.next_event_index += 1;
    }

    fn finalize(self: Box<Self>) -> Box<dyn Any> {
        let index = self.next_event_index;
        let len = self.expected.len();
        if index != len {
            panic!("Non-Determinism detected: Expected {len} events but only got {index}");
        }
        Box::new(())
    }
}

#[derive(Default)]
pub(crate) struct HashRecordingEventHandler {
    hasher: AHasher,
}

impl EventHandler for HashRecordingEventHandler {
    fn handle_event(&mut self, event: &Event) {
        std::hash::Hash::hash(event, &mut self.hasher);
    }

    fn finalize(self: Box<Self>) -> Box<dyn Any> {
        Box::new(self.hasher.finish())
    }
}

pub(crate) struct HashValidatingEventHandler {
    hasher: AHasher,
    expected: u64,
}

impl HashValidatingEventHandler {
    pub(crate) fn new(expected: u64) -> Self {
        HashValidatingEventHandler {
            hasher: AHasher::default(),
            expected,
        }
    }
}

impl EventHandler for HashValidatingEventHandler {
    fn handle_event(&mut self, event: &Event) {
        std::hash::Hash::hash(event, &mut self.hasher);
    }

    fn finalize(self: Box<Self>) -> Box<dyn Any> {
        let actual = self.hasher.finish();
        if actual != self.expected {
            panic!("Non-Determinism detected: event sequences differ");
        }
        Box::new(())
    }
}
