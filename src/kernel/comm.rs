//! Mailbox rendezvous and network transfers.

use tracing::debug;

use super::{Handled, Kernel};
use crate::activity::{ActivityData, ActivityState, Comm, FailureCause, MatchFn, Payload};
use crate::error::KernelError;
use crate::id::{ActivityId, ActorId, HostId, KernelId, MailboxId};
use crate::mailbox::Mailbox;
use crate::resource::{ActionSpec, Work};
use crate::simcall::SimcallValue;

impl Kernel {
    pub(crate) fn mailbox_by_name(&mut self, name: &str) -> MailboxId {
        if let Some(id) = self.mailbox_names.get(name) {
            return *id;
        }
        let id = MailboxId::from_index(self.mailboxes.len());
        self.mailboxes.push(Mailbox::new(name.to_owned()));
        self.mailbox_names.insert(name.to_owned(), id);
        id
    }

    pub(crate) fn mailbox_name(&self, mailbox: MailboxId) -> Option<&str> {
        self.mailboxes
            .get(mailbox.to_index())
            .map(|m| m.name.as_str())
    }

    pub(crate) fn set_receiver(&mut self, mailbox: MailboxId, receiver: Option<ActorId>) {
        if let Some(mailbox) = self.mailboxes.get_mut(mailbox.to_index()) {
            mailbox.receiver = receiver;
        }
    }

    pub(crate) fn receiver(&self, mailbox: MailboxId) -> Option<ActorId> {
        self.mailboxes.get(mailbox.to_index())?.receiver
    }

    pub(crate) fn mailbox_len(&self, mailbox: MailboxId) -> usize {
        self.mailboxes.get(mailbox.to_index()).map_or(0, Mailbox::len)
    }

    /// Number of communications in the mailbox sent from `host`.
    pub(crate) fn mailbox_comms_from(&self, mailbox: MailboxId, host: HostId) -> usize {
        let Some(mailbox) = self.mailboxes.get(mailbox.to_index()) else {
            return 0;
        };
        mailbox
            .pending()
            .chain(mailbox.started())
            .filter(|id| {
                self.activities
                    .get(id)
                    .and_then(|a| a.comm())
                    .is_some_and(|c| c.sender_host == Some(host))
            })
            .count()
    }

    fn checked_mailbox(&self, actor: ActorId, mailbox: MailboxId) -> Result<&Mailbox, KernelError> {
        self.mailboxes.get(mailbox.to_index()).ok_or_else(|| {
            KernelError::violation(format!("{mailbox} does not exist")).with_actor(actor)
        })
    }

    pub(super) fn post_send(
        &mut self,
        actor: ActorId,
        mailbox: MailboxId,
        payload: Payload,
        size: f64,
        rate: Option<f64>,
        detached: bool,
    ) -> Handled {
        let host = self.actors[&actor].host;
        let rate = rate.unwrap_or(f64::INFINITY);
        let queue = self.checked_mailbox(actor, mailbox)?;
        let matched = queue.pending().find(|id| {
            self.activities
                .get(id)
                .and_then(|a| a.comm())
                .is_some_and(|c| c.sender.is_none() && c.accepts(&*payload))
        });

        let id = if let Some(id) = matched {
            self.dequeue(mailbox, id)?;
            let Some(activity) = self.activities.get_mut(&id) else {
                return Err(KernelError::violation("matched comm vanished").with_activity(id));
            };
            if !detached {
                activity.refs += 1;
            }
            if let Some(comm) = activity.comm_mut() {
                comm.sender = Some(actor);
                comm.sender_host = Some(host);
                comm.payload = Some(payload);
                comm.size = size;
                comm.rate = comm.rate.min(rate);
                comm.detached = detached;
            }
            debug!(%actor, comm = %id, %mailbox, "send matched a posted receive");
            self.own(actor, id);
            self.start_comm(id)?;
            id
        } else {
            let receiver = self
                .receiver(mailbox)
                .filter(|r| self.actors.contains_key(r));
            let receiver_host = receiver.and_then(|r| self.actor_host(r));
            let id = self.create_activity(
                ActivityData::Comm(Comm {
                    mailbox,
                    sender: Some(actor),
                    receiver,
                    sender_host: Some(host),
                    receiver_host,
                    size,
                    rate,
                    payload: Some(payload),
                    matcher: None,
                    detached,
                    queued: true,
                }),
                usize::from(!detached),
            );
            self.own(actor, id);
            if receiver.is_some() {
                debug!(%actor, comm = %id, %mailbox, "send started towards the permanent receiver");
                self.mailboxes[mailbox.to_index()].push_started(id);
                self.start_comm(id)?;
            } else {
                debug!(%actor, comm = %id, %mailbox, "send queued");
                self.mailboxes[mailbox.to_index()].push(id);
            }
            id
        };
        Ok(Some(Ok(if detached {
            SimcallValue::Unit
        } else {
            SimcallValue::Activity(id)
        })))
    }

    pub(super) fn post_recv(
        &mut self,
        actor: ActorId,
        mailbox: MailboxId,
        matcher: Option<MatchFn>,
        rate: Option<f64>,
    ) -> Handled {
        let host = self.actors[&actor].host;
        let rate = rate.unwrap_or(f64::INFINITY);
        let queue = self.checked_mailbox(actor, mailbox)?;
        let accepts = |id: &ActivityId| {
            self.activities
                .get(id)
                .and_then(|a| a.comm())
                .is_some_and(|c| {
                    c.sender.is_some()
                        && matcher
                            .as_ref()
                            .is_none_or(|m| c.payload.as_deref().is_some_and(|p| m(p)))
                })
        };

        // data already flowing towards the permanent receiver comes first
        let eager = queue.started().find(|id| accepts(id));
        let posted = queue.pending().find(|id| accepts(id));

        if let Some(id) = eager {
            self.dequeue(mailbox, id)?;
            self.claim(actor, host, id, rate);
            debug!(%actor, comm = %id, %mailbox, "receive claimed an eagerly started comm");
            return Ok(Some(Ok(SimcallValue::Activity(id))));
        }
        if let Some(id) = posted {
            self.dequeue(mailbox, id)?;
            self.claim(actor, host, id, rate);
            debug!(%actor, comm = %id, %mailbox, "receive matched a posted send");
            self.start_comm(id)?;
            return Ok(Some(Ok(SimcallValue::Activity(id))));
        }

        let id = self.create_activity(
            ActivityData::Comm(Comm {
                mailbox,
                sender: None,
                receiver: Some(actor),
                sender_host: None,
                receiver_host: Some(host),
                size: 0.0,
                rate,
                payload: None,
                matcher,
                detached: false,
                queued: true,
            }),
            1,
        );
        self.own(actor, id);
        self.mailboxes[mailbox.to_index()].push(id);
        debug!(%actor, comm = %id, %mailbox, "receive queued");
        Ok(Some(Ok(SimcallValue::Activity(id))))
    }

    /// Makes `actor` the receiver of a comm posted by a sender.
    fn claim(&mut self, actor: ActorId, host: HostId, id: ActivityId, rate: f64) {
        if let Some(activity) = self.activities.get_mut(&id) {
            activity.refs += 1;
            if let Some(comm) = activity.comm_mut() {
                comm.receiver = Some(actor);
                comm.receiver_host = Some(host);
                comm.rate = comm.rate.min(rate);
            }
        }
        self.own(actor, id);
    }

    fn dequeue(&mut self, mailbox: MailboxId, id: ActivityId) -> Result<(), KernelError> {
        let queue = &mut self.mailboxes[mailbox.to_index()];
        if !queue.remove(id) {
            return Err(KernelError::violation("comm missing from its mailbox")
                .with_activity(id)
                .with_mailbox(&queue.name));
        }
        if let Some(comm) = self.activities.get_mut(&id).and_then(|a| a.comm_mut()) {
            comm.queued = false;
        }
        Ok(())
    }

    /// Starts the transfer of a comm whose both sides are known.
    fn start_comm(&mut self, id: ActivityId) -> Result<(), KernelError> {
        let Some(comm) = self.activities.get(&id).and_then(|a| a.comm()) else {
            return Ok(());
        };
        let (Some(src), Some(dst)) = (comm.sender_host, comm.receiver_host) else {
            return Err(KernelError::violation("comm started without both sides").with_activity(id));
        };
        let (size, rate) = (comm.size, comm.rate);

        if let Some(down) = [src, dst].into_iter().find(|h| !self.host_is_on(*h)) {
            debug!(comm = %id, host = %down, "comm endpoint is off");
            self.finish_activity(id, ActivityState::Failed, Some(FailureCause::Host(down)));
            return Ok(());
        }
        let Some(route) = self.routes.get(&(src, dst)) else {
            return Err(KernelError::NoRoute { src, dst });
        };
        let links: Vec<_> = route
            .iter()
            .map(|l| self.links[l.to_index()].resource)
            .collect();
        let latency = route.iter().map(|l| self.links[l.to_index()].latency).sum();
        self.launch(
            id,
            ActionSpec {
                owner: id,
                requires: links.clone(),
                consumes: links,
                work: Work::Amount(size.max(0.0)),
                latency,
                max_duration: None,
                weight: 1.0,
                bound: rate,
            },
        );
        Ok(())
    }
}
