//! A deterministic discrete-event simulation kernel for distributed systems.
//!
//! Simulated processes ([actors](Actor)) are `async` bodies running on the hosts of a
//! [`Platform`]. They never block on anything real: every operation that takes simulated time
//! (computing, sleeping, communicating, waiting on a mutex) is a [simcall](simcall) handled by
//! the maestro, which owns all kernel state and advances the virtual clock only when no actor
//! can make progress anymore.
//!
//! A run is fully deterministic. Simcalls of a round are handled in ascending actor id order,
//! simultaneous completions in ascending activity creation order, and mailboxes match in FIFO
//! order. [`SimBuilder`] runs a simulation several times and checks that every run produces
//! the same [`Event`] sequence.
//!
//! ```ignore
//! let mut platform = PlatformBuilder::new();
//! let host = platform.add_host("alice", 1e9)?;
//! let platform = platform.build();
//!
//! SimBuilder::new()
//!     .run(&platform, |engine| {
//!         engine
//!             .spawn("worker", host, |actor| async move {
//!                 actor.execute(1e9).await.unwrap();
//!                 assert_eq!(actor.now().as_secs(), 1.0);
//!             })
//!             .unwrap();
//!     })
//!     .unwrap();
//! ```

pub mod activity;
mod actor;
pub mod config;
mod engine;
pub mod error;
mod event;
pub mod id;
mod kernel;
mod mailbox;
pub mod observer;
pub mod platform;
pub mod resource;
pub mod scheduling;
mod sim_builder;
pub mod simcall;
pub mod synchro;
pub mod time;

pub use activity::{ActivityHandle, ActivityKind, ActivityState};
pub use actor::{Actor, CommHandle, ExecHandle, RecvHandle};
pub use config::{Sharing, SimConfig};
pub use engine::{Engine, RunReport, StopReason};
pub use error::{KernelError, NetworkFailure, SimError};
pub use event::Event;
pub use id::{ActivityId, ActorId, HostId, LinkId, MailboxId, StorageId};
pub use observer::Observer;
pub use platform::{Platform, PlatformBuilder};
pub use scheduling::{AscendingId, SchedulingPolicy, SeededRandom};
pub use sim_builder::{DeterminismCheck, SimBuilder, SimulationOutput};
pub use simcall::{Simcall, SimcallKind, SpawnOptions};
pub use synchro::{SimCondvar, SimMutex, SimSemaphore};
pub use time::SimTime;
