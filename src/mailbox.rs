//! Rendezvous points between senders and receivers.
//!
//! A mailbox holds the communications posted on it that found no partner yet, in FIFO order.
//! When a permanent receiver is set, sends that find no posted receive are started right away
//! and parked in a second FIFO until the receiver claims them.

use std::collections::VecDeque;

use crate::id::{ActivityId, ActorId};

pub(crate) struct Mailbox {
    pub(crate) name: String,
    pending: VecDeque<ActivityId>,
    started: VecDeque<ActivityId>,
    pub(crate) receiver: Option<ActorId>,
}

impl Mailbox {
    pub(crate) fn new(name: String) -> Self {
        Mailbox {
            name,
            pending: VecDeque::new(),
            started: VecDeque::new(),
            receiver: None,
        }
    }

    pub(crate) fn push(&mut self, comm: ActivityId) {
        self.pending.push_back(comm);
    }

    pub(crate) fn push_started(&mut self, comm: ActivityId) {
        self.started.push_back(comm);
    }

    /// Removes `comm` from whichever queue holds it, keeping the order of the others.
    ///
    /// Returns false if the mailbox does not know the comm.
    #[must_use]
    pub(crate) fn remove(&mut self, comm: ActivityId) -> bool {
        for queue in [&mut self.pending, &mut self.started] {
            if let Some(pos) = queue.iter().position(|c| *c == comm) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = ActivityId> + '_ {
        self.pending.iter().copied()
    }

    pub(crate) fn started(&self) -> impl Iterator<Item = ActivityId> + '_ {
        self.started.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len() + self.started.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::KernelId;

    fn comm(i: usize) -> ActivityId {
        ActivityId::from_index(i)
    }

    #[test]
    fn remove_preserves_order() {
        let mut mailbox = Mailbox::new("m".into());
        for i in 0..4 {
            mailbox.push(comm(i));
        }
        assert!(mailbox.remove(comm(1)));
        assert_eq!(
            mailbox.pending().collect::<Vec<_>>(),
            vec![comm(0), comm(2), comm(3)]
        );
        assert!(!mailbox.remove(comm(1)));
    }

    #[test]
    fn started_queue_is_separate() {
        let mut mailbox = Mailbox::new("m".into());
        mailbox.push(comm(0));
        mailbox.push_started(comm(1));
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.started().collect::<Vec<_>>(), vec![comm(1)]);
        assert!(mailbox.remove(comm(1)));
        assert!(mailbox.remove(comm(0)));
        assert!(mailbox.is_empty());
    }
}
