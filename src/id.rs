//! Identifiers of kernel objects.
//!
//! Every kind of kernel object is numbered by its own creation counter, starting at 1.
//! Comparing two ids of the same kind therefore compares the creation order of the objects,
//! which the kernel relies on whenever several objects must be processed in a fixed order.

use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU64;

pub(crate) trait KernelId: Copy {
    fn from_index(index: usize) -> Self;
}

macro_rules! kernel_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Clone, Copy)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(NonZeroU64);

        impl $name {
            /// The zero based creation index of this object.
            pub fn to_index(self) -> usize {
                (self.0.get() - 1) as usize
            }
        }

        impl KernelId for $name {
            fn from_index(index: usize) -> Self {
                $name(NonZeroU64::MIN.saturating_add(index as u64))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

kernel_id!(
    /// Identifies an actor.
    ActorId,
    "actor"
);
kernel_id!(
    /// Identifies an activity (execution, communication, I/O, sleep or synchronization wait).
    ActivityId,
    "activity"
);
kernel_id!(
    /// Identifies a resource action inside the resource model.
    ActionId,
    "action"
);
kernel_id!(
    /// Identifies a host of the platform.
    HostId,
    "host"
);
kernel_id!(
    /// Identifies a network link of the platform.
    LinkId,
    "link"
);
kernel_id!(
    /// Identifies a storage of the platform.
    StorageId,
    "storage"
);
kernel_id!(
    /// Identifies a mailbox.
    MailboxId,
    "mailbox"
);
kernel_id!(
    /// Identifies a simulated mutex.
    MutexId,
    "mutex"
);
kernel_id!(
    /// Identifies a simulated condition variable.
    CondId,
    "cond"
);
kernel_id!(
    /// Identifies a simulated semaphore.
    SemId,
    "sem"
);
kernel_id!(
    /// Identifies a kernel timer.
    TimerId,
    "timer"
);

/// Hands out ids of one kind in creation order.
pub(crate) struct IdCounter<T> {
    issued: usize,
    _kind: PhantomData<T>,
}

impl<T: KernelId> IdCounter<T> {
    pub(crate) fn new() -> Self {
        IdCounter {
            issued: 0,
            _kind: PhantomData,
        }
    }

    pub(crate) fn next(&mut self) -> T {
        let id = T::from_index(self.issued);
        self.issued += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_creation_order() {
        let mut counter = IdCounter::<ActorId>::new();
        let a = counter.next();
        let b = counter.next();
        assert!(a < b);
        assert_eq!(a.to_index(), 0);
        assert_eq!(b.to_index(), 1);
        assert_eq!(b.to_string(), "actor#2");
    }

    #[test]
    fn index_round_trip() {
        assert_eq!(HostId::from_index(41).to_index(), 41);
    }
}
