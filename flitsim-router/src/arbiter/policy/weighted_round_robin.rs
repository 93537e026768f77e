// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Weighted Round Robin policy

use std::rc::Rc;

use flitsim_engine::sim_error;
use flitsim_engine::types::SimError;
use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::arbiter::Arbitrate;

/// Round robin in which requester `i` may be granted `weights[i]` times in a
/// row before lower-credit requesters are skipped over.
pub struct WeightedRoundRobin {
    candidate: usize,
    grants: Vec<usize>,
    weights: Vec<usize>,
}

impl WeightedRoundRobin {
    pub fn new(weights: Vec<usize>, num_inputs: usize) -> Result<Self, SimError> {
        if weights.len() != num_inputs {
            return sim_error!(
                "The number of weights ({}) must be equal to the number of inputs ({num_inputs})",
                weights.len()
            );
        }
        if weights.contains(&0) {
            return sim_error!("Weights must all be > 0");
        }

        Ok(Self {
            candidate: 0,
            grants: vec![0; weights.len()],
            weights,
        })
    }

    #[must_use]
    pub fn state_str(&self, requests: &[bool]) -> String {
        let mut s = String::new();
        s.push_str(format!("{}: ", self.candidate).as_str());
        for (i, grant) in self.grants.iter().enumerate() {
            let req = if requests.get(i).copied().unwrap_or(false) {
                "r"
            } else {
                "-"
            };
            s.push_str(format!("{}/{}/{}, ", req, grant, self.weights[i]).as_str());
        }
        s
    }
}

impl Arbitrate for WeightedRoundRobin {
    fn select(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize> {
        trace!(entity ; "wrr: arbitrate {}", self.state_str(requests));

        let num_inputs = requests.len().min(self.weights.len());
        let mut selected_candidate = None;
        for i in 0..num_inputs {
            let index = (i + self.candidate) % num_inputs;
            if !requests[index] {
                continue;
            }
            if self.weights[index] > self.grants[index] {
                selected_candidate = Some(index);
                break;
            } else if selected_candidate.is_none() {
                selected_candidate = Some(index);
            }
        }
        selected_candidate
    }

    fn granted(&mut self, index: usize) {
        if self.weights[index] == self.grants[index] {
            self.grants[index] = 0;
        }
        self.grants[index] += 1;
        self.candidate = (index + 1) % self.weights.len();
    }
}
