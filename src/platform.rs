//! Static description of the simulated platform.
//!
//! A [`Platform`] lists hosts, links, routes between hosts and storages, together with state
//! changes (failures and recoveries) scheduled at fixed instants. It is built once with a
//! [`PlatformBuilder`] and consumed by [`Engine::new`](crate::Engine::new); every run gets its
//! own copy of the resources it describes.
//!
//! Each host receives a loopback link so actors on the same host can communicate without an
//! explicit route.

use std::collections::{BTreeMap, HashSet};

use crate::error::PlatformError;
use crate::id::{HostId, KernelId, LinkId, StorageId};
use crate::time::SimTime;

/// Bandwidth of the implicit loopback link of every host, in bytes per second.
pub const LOOPBACK_BANDWIDTH: f64 = 498_000_000.0;
/// Latency of the implicit loopback link of every host, in seconds.
pub const LOOPBACK_LATENCY: f64 = 0.000_015;

#[derive(Debug, Clone)]
pub(crate) struct HostSpec {
    pub(crate) name: String,
    pub(crate) speed: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct LinkSpec {
    pub(crate) name: String,
    pub(crate) bandwidth: f64,
    pub(crate) latency: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct StorageSpec {
    pub(crate) name: String,
    pub(crate) host: HostId,
    pub(crate) read_bandwidth: f64,
    pub(crate) write_bandwidth: f64,
}

/// Something whose availability can change during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Host(HostId),
    Link(LinkId),
}

#[derive(Debug, Clone)]
pub(crate) struct StateChange {
    pub(crate) at: SimTime,
    pub(crate) component: Component,
    pub(crate) on: bool,
}

/// The resources a simulation runs on.
#[derive(Debug, Clone, Default)]
pub struct Platform {
    pub(crate) hosts: Vec<HostSpec>,
    pub(crate) links: Vec<LinkSpec>,
    pub(crate) routes: BTreeMap<(HostId, HostId), Vec<LinkId>>,
    pub(crate) storages: Vec<StorageSpec>,
    pub(crate) state_changes: Vec<StateChange>,
}

impl Platform {
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.hosts
            .iter()
            .position(|h| h.name == name)
            .map(HostId::from_index)
    }

    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.links
            .iter()
            .position(|l| l.name == name)
            .map(LinkId::from_index)
    }

    pub fn host_name(&self, host: HostId) -> Option<&str> {
        self.hosts.get(host.to_index()).map(|h| h.name.as_str())
    }

    /// The links crossed when sending from `src` to `dst`.
    pub fn route(&self, src: HostId, dst: HostId) -> Option<&[LinkId]> {
        self.routes.get(&(src, dst)).map(Vec::as_slice)
    }
}

/// Incrementally describes a [`Platform`].
#[derive(Debug, Default)]
pub struct PlatformBuilder {
    platform: Platform,
    names: HashSet<String>,
}

impl PlatformBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim_name(&mut self, name: &str) -> Result<(), PlatformError> {
        if !self.names.insert(name.to_owned()) {
            return Err(PlatformError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }

    fn check_host(&self, host: HostId) -> Result<(), PlatformError> {
        if host.to_index() >= self.platform.hosts.len() {
            return Err(PlatformError::UnknownHost(host));
        }
        Ok(())
    }

    /// Adds a host computing `speed` flops per second.
    pub fn add_host(&mut self, name: &str, speed: f64) -> Result<HostId, PlatformError> {
        check_capacity(name, "speed", speed)?;
        self.claim_name(name)?;
        let id = HostId::from_index(self.platform.hosts.len());
        self.platform.hosts.push(HostSpec {
            name: name.to_owned(),
            speed,
        });
        let loopback = self.push_link(
            format!("{name}/loopback"),
            LOOPBACK_BANDWIDTH,
            LOOPBACK_LATENCY,
        );
        self.platform.routes.insert((id, id), vec![loopback]);
        Ok(id)
    }

    /// Adds a link with the given bandwidth (bytes per second) and latency (seconds).
    pub fn add_link(
        &mut self,
        name: &str,
        bandwidth: f64,
        latency: f64,
    ) -> Result<LinkId, PlatformError> {
        check_capacity(name, "bandwidth", bandwidth)?;
        if !latency.is_finite() || latency < 0.0 {
            return Err(PlatformError::InvalidLatency {
                name: name.to_owned(),
                value: latency,
            });
        }
        self.claim_name(name)?;
        Ok(self.push_link(name.to_owned(), bandwidth, latency))
    }

    fn push_link(&mut self, name: String, bandwidth: f64, latency: f64) -> LinkId {
        let id = LinkId::from_index(self.platform.links.len());
        self.platform.links.push(LinkSpec {
            name,
            bandwidth,
            latency,
        });
        id
    }

    /// Declares the links crossed between `src` and `dst`.
    ///
    /// The reverse route is added as well, unless one was declared explicitly before.
    pub fn add_route(
        &mut self,
        src: HostId,
        dst: HostId,
        links: &[LinkId],
    ) -> Result<(), PlatformError> {
        self.check_host(src)?;
        self.check_host(dst)?;
        if let Some(&bad) = links
            .iter()
            .find(|l| l.to_index() >= self.platform.links.len())
        {
            return Err(PlatformError::UnknownLink(bad));
        }
        self.platform.routes.insert((src, dst), links.to_vec());
        if src != dst {
            let mut reverse = links.to_vec();
            reverse.reverse();
            self.platform.routes.entry((dst, src)).or_insert(reverse);
        }
        Ok(())
    }

    /// Attaches a storage with separate read and write bandwidths to `host`.
    pub fn add_storage(
        &mut self,
        name: &str,
        host: HostId,
        read_bandwidth: f64,
        write_bandwidth: f64,
    ) -> Result<StorageId, PlatformError> {
        self.check_host(host)?;
        check_capacity(name, "read bandwidth", read_bandwidth)?;
        check_capacity(name, "write bandwidth", write_bandwidth)?;
        self.claim_name(name)?;
        let id = StorageId::from_index(self.platform.storages.len());
        self.platform.storages.push(StorageSpec {
            name: name.to_owned(),
            host,
            read_bandwidth,
            write_bandwidth,
        });
        Ok(id)
    }

    /// Turns `host` off (or back on) at simulated time `at`.
    pub fn schedule_host_state(
        &mut self,
        host: HostId,
        at: f64,
        on: bool,
    ) -> Result<(), PlatformError> {
        self.check_host(host)?;
        self.schedule(Component::Host(host), at, on)
    }

    /// Turns `link` off (or back on) at simulated time `at`.
    pub fn schedule_link_state(
        &mut self,
        link: LinkId,
        at: f64,
        on: bool,
    ) -> Result<(), PlatformError> {
        if link.to_index() >= self.platform.links.len() {
            return Err(PlatformError::UnknownLink(link));
        }
        self.schedule(Component::Link(link), at, on)
    }

    fn schedule(&mut self, component: Component, at: f64, on: bool) -> Result<(), PlatformError> {
        if !at.is_finite() || at < 0.0 {
            return Err(PlatformError::InvalidTime(at));
        }
        self.platform.state_changes.push(StateChange {
            at: SimTime::from_secs(at),
            component,
            on,
        });
        Ok(())
    }

    pub fn build(self) -> Platform {
        self.platform
    }
}

fn check_capacity(name: &str, what: &'static str, value: f64) -> Result<(), PlatformError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PlatformError::InvalidCapacity {
            name: name.to_owned(),
            what,
            value,
        });
    }
    Ok(())
}
