// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Random policy

use std::rc::Rc;

use flitsim_track::entity::Entity;
use flitsim_track::trace;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;

use crate::arbiter::Arbitrate;

/// Picks uniformly among the requesters using a seeded generator, so runs
/// with the same seed make the same choices.
pub struct Random {
    rng: StdRng,
}

impl Random {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Arbitrate for Random {
    fn select(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        let selected = requests
            .iter()
            .enumerate()
            .filter(|(_, requested)| **requested)
            .map(|(index, _)| index)
            .choose(&mut self.rng);
        trace!(entity ; "random: selected {:?}", selected);
        selected
    }

    fn granted(&mut self, _index: usize) {}
}

#[cfg(test)]
mod tests {
    use flitsim_track::entity::toplevel;
    use flitsim_track::tracker::dev_null_tracker;

    use super::*;

    #[test]
    fn same_seed_same_choices() {
        let top = toplevel(&dev_null_tracker(), "top");
        let requests = [true, false, true, true, false, true];
        let mut a = Random::new(42);
        let mut b = Random::new(42);

        for _ in 0..20 {
            let choice = a.select(&top, &requests);
            assert_eq!(choice, b.select(&top, &requests));
            assert!(requests[choice.unwrap()]);
        }
        assert_eq!(a.select(&top, &[false; 6]), None);
    }
}
