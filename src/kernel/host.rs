//! Host and link failures.

use tracing::info;

use super::Kernel;
use crate::activity::{ActivityKind, ActivityState, FailureCause};
use crate::event::Event;
use crate::id::{ActivityId, ActorId, HostId, LinkId};

impl Kernel {
    /// Turns a host on or off.
    ///
    /// Turning it off fails every activity using it, fails communications with an endpoint on
    /// it and kills its actors: blocked ones right away, the others at their next simcall.
    pub(crate) fn set_host_state(&mut self, host: HostId, on: bool) {
        let Some(record) = self.hosts.get_mut(host.to_index()) else {
            return;
        };
        if record.on == on {
            return;
        }
        record.on = on;
        let cpu = record.cpu;
        info!(%host, name = %record.name, on, "host state changed");
        self.emit(Event::HostStateChanged { host, on });
        let failed = self.resources.set_state(cpu, on);
        if on {
            return;
        }
        for (_, activity) in failed {
            self.resource_failed(activity, FailureCause::Host(host));
        }

        let comms: Vec<ActivityId> = self
            .activities
            .iter()
            .filter(|(_, a)| {
                !a.state.is_terminal()
                    && a.comm().is_some_and(|c| {
                        c.sender_host == Some(host) || c.receiver_host == Some(host)
                    })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in comms {
            self.finish_activity(id, ActivityState::Failed, Some(FailureCause::Host(host)));
        }

        let victims: Vec<ActorId> = self.hosts[host.to_index()].actors.iter().copied().collect();
        for actor in victims {
            let Some(record) = self.actors.get_mut(&actor) else {
                continue;
            };
            if record.blocked.is_some() || record.suspended {
                self.kill_actor(actor);
            } else {
                record.doomed = true;
            }
        }
    }

    pub(crate) fn set_link_state(&mut self, link: LinkId, on: bool) {
        let Some(record) = self.links.get_mut(link.to_index()) else {
            return;
        };
        if record.on == on {
            return;
        }
        record.on = on;
        let resource = record.resource;
        info!(%link, on, "link state changed");
        self.emit(Event::LinkStateChanged { link, on });
        for (_, activity) in self.resources.set_state(resource, on) {
            self.resource_failed(activity, FailureCause::Link(Some(link)));
        }
    }

    fn resource_failed(&mut self, activity: ActivityId, cause: FailureCause) {
        if let Some(a) = self.activities.get_mut(&activity) {
            a.action = None;
        }
        if self.activity_kind(activity) == Some(ActivityKind::Raw) {
            self.raw_failed(activity);
        } else {
            self.finish_activity(activity, ActivityState::Failed, Some(cause));
        }
    }
}
