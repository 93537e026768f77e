// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Round Robin policy

use std::rc::Rc;

use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::arbiter::Arbitrate;

/// Grants the first requester at or after the priority pointer.
///
/// The pointer moves past a requester once it is granted, so a requester
/// that keeps asking waits for at most `num_inputs - 1` other grants.
pub struct RoundRobin {
    priority: usize,
    num_inputs: usize,
}

impl RoundRobin {
    #[must_use]
    pub fn new(num_inputs: usize) -> Self {
        Self {
            priority: 0,
            num_inputs,
        }
    }
}

impl Arbitrate for RoundRobin {
    fn select(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        let num_inputs = requests.len().min(self.num_inputs);
        let selected = (0..num_inputs)
            .map(|i| (i + self.priority) % num_inputs)
            .find(|&index| requests[index]);
        trace!(entity ; "rr: priority {} selected {:?}", self.priority, selected);
        selected
    }

    fn granted(&mut self, index: usize) {
        self.priority = (index + 1) % self.num_inputs;
    }
}
