//! Ordering of simcalls within a scheduling round.
//!
//! By default the simcalls gathered in a round are handled in ascending actor id order. A model
//! checker, or a test exploring other interleavings, installs its own [`SchedulingPolicy`] with
//! [`Engine::set_policy`](crate::Engine::set_policy).

use rand_chacha::ChaCha12Rng;
use rand_core::{RngCore, SeedableRng};

use crate::id::ActorId;
use crate::simcall::SimcallKind;

/// A simcall waiting to be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSimcall {
    pub actor: ActorId,
    pub kind: SimcallKind,
}

/// Chooses the order in which pending simcalls are handled.
pub trait SchedulingPolicy {
    /// Returns the actors of `pending` in the order their simcalls should be handled.
    ///
    /// `pending` is sorted by actor id. Actors missing from the result are handled afterwards in
    /// ascending id order; duplicates and unknown actors are ignored.
    fn order(&mut self, pending: &[PendingSimcall]) -> Vec<ActorId>;
}

/// Handles simcalls in ascending actor id order.
#[derive(Debug, Default, Clone, Copy)]
pub struct AscendingId;

impl SchedulingPolicy for AscendingId {
    fn order(&mut self, pending: &[PendingSimcall]) -> Vec<ActorId> {
        pending.iter().map(|p| p.actor).collect()
    }
}

/// Handles simcalls in a pseudo-random order derived from a seed.
///
/// The same seed always yields the same interleaving.
pub struct SeededRandom {
    rng: ChaCha12Rng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }
}

impl SchedulingPolicy for SeededRandom {
    fn order(&mut self, pending: &[PendingSimcall]) -> Vec<ActorId> {
        let mut order: Vec<ActorId> = pending.iter().map(|p| p.actor).collect();
        for i in (1..order.len()).rev() {
            let j = (self.rng.next_u64() % (i as u64 + 1)) as usize;
            order.swap(i, j);
        }
        order
    }
}
