// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Arbiters used by the crossbar scheduler.
//!
//! An arbiter picks one of a set of requesters. Its state only advances when
//! the caller reports, with [`Arbitrate::granted`], that the choice was
//! actually used.

use std::rc::Rc;

use flitsim_engine::types::SimError;
use flitsim_track::entity::Entity;

use crate::settings::{ArbiterPolicy, ArbiterSettings};

pub mod policy;

use policy::random::Random;
use policy::round_robin::RoundRobin;
use policy::weighted_round_robin::WeightedRoundRobin;

pub trait Arbitrate {
    /// Choose one of the indices for which `requests` is true.
    fn select(&mut self, entity: &Rc<Entity>, requests: &[bool]) -> Option<usize>;

    /// Record that `index` was granted so that priorities can move on.
    fn granted(&mut self, index: usize);
}

/// Build an arbiter over `num_inputs` requesters.
///
/// Weights are only used by the weighted policy and only when
/// `use_weights` is set. `seed_offset` separates the random streams of the
/// arbiters that share one set of settings.
pub fn create_arbiter(
    settings: &ArbiterSettings,
    num_inputs: usize,
    use_weights: bool,
    seed_offset: u64,
) -> Result<Box<dyn Arbitrate>, SimError> {
    match settings.policy {
        ArbiterPolicy::RoundRobin => Ok(Box::new(RoundRobin::new(num_inputs))),
        ArbiterPolicy::WeightedRoundRobin => {
            let weights = if use_weights && !settings.weights.is_empty() {
                settings.weights.clone()
            } else {
                vec![1; num_inputs]
            };
            Ok(Box::new(WeightedRoundRobin::new(weights, num_inputs)?))
        }
        ArbiterPolicy::Random => Ok(Box::new(Random::new(
            settings.seed.wrapping_add(seed_offset),
        ))),
    }
}
