// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Routing algorithms.
//!
//! A routing algorithm is created for every input `(port, vc)` of a router.
//! Given a head flit it fills a [`Response`] with the admissible
//! `(output port, output vc, hops)` [candidates](Candidate), or marks the
//! response unresolved so that the request is retried on the next cycle.
//!
//! Topology specific algorithms are selected by name through a
//! [`RoutingAlgorithmFactory`]; [`SettingsFactory`] knows:
//!
//!  - `direct`: every terminal is attached to the one router.
//!  - `dimension_order`: torus routing with dateline VC classes.
//!  - `common_ancestor`: fat-tree up/down routing.

use std::fmt;
use std::rc::Rc;

use flitsim_engine::config_error;
use flitsim_engine::types::{SimError, SimResult};
use flitsim_track::entity::Entity;

use crate::settings::{ReductionMode, RoutingSettings};
use crate::types::Flit;

pub mod common_ancestor;
pub mod dimension_order;
pub mod direct;
pub mod reduction;

use common_ancestor::CommonAncestorRouting;
use dimension_order::DimensionOrderRouting;
use direct::DirectRouting;

/// One admissible way out of the router.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Candidate {
    pub port: usize,
    pub vc: usize,

    /// Number of hops remaining to the destination along this choice.
    pub hops: u32,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}({})", self.port, self.vc, self.hops)
    }
}

/// The result of a routing request.
#[derive(Debug, Default)]
pub struct Response {
    candidates: Vec<Candidate>,
    unresolved: bool,
}

impl Response {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, port: usize, vc: usize, hops: u32) {
        self.candidates.push(Candidate { port, vc, hops });
    }

    /// Ask for the request to be made again next cycle.
    pub fn set_unresolved(&mut self) {
        self.unresolved = true;
    }

    /// True if the response can be used.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.unresolved && !self.candidates.is_empty()
    }

    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    #[must_use]
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}

/// Where a routing algorithm sits.
#[derive(Clone, Debug)]
pub struct RouterPosition {
    pub id: usize,

    /// Topology coordinates of the router.
    pub address: Vec<usize>,

    pub num_ports: usize,
    pub num_vcs: usize,
}

pub trait RoutingAlgorithm {
    /// Core cycles between a request and its response.
    fn latency(&self) -> u64;

    /// How the candidates of a response are narrowed down before they are
    /// requested.
    fn reduction(&self) -> ReductionMode;

    /// Fill `response` for the head flit `flit`.
    ///
    /// Must only consider `flit`; algorithms keep no state about other
    /// flits.
    fn process_request(&mut self, flit: &Flit, response: &mut Response) -> SimResult;
}

pub trait RoutingAlgorithmFactory {
    /// Create the algorithm of input `(input_port, input_vc)`.
    fn create_routing_algorithm(
        &self,
        input_port: usize,
        input_vc: usize,
        name: &str,
        parent: &Rc<Entity>,
        position: &RouterPosition,
    ) -> Result<Box<dyn RoutingAlgorithm>, SimError>;
}

/// The VCs a candidate may use: all of `allowed` or just the first.
fn candidate_vcs(all_vcs: bool, allowed: impl Iterator<Item = usize>) -> Vec<usize> {
    if all_vcs {
        allowed.collect()
    } else {
        allowed.take(1).collect()
    }
}

/// Creates algorithms selected by the `algorithm` setting.
pub struct SettingsFactory {
    settings: RoutingSettings,
}

impl SettingsFactory {
    #[must_use]
    pub fn new(settings: RoutingSettings) -> Self {
        Self { settings }
    }
}

impl RoutingAlgorithmFactory for SettingsFactory {
    fn create_routing_algorithm(
        &self,
        input_port: usize,
        input_vc: usize,
        name: &str,
        parent: &Rc<Entity>,
        position: &RouterPosition,
    ) -> Result<Box<dyn RoutingAlgorithm>, SimError> {
        if self.settings.latency == 0 {
            return config_error!("routing latency must be > 0");
        }
        let entity = Rc::new(Entity::new(parent, name));
        match self.settings.algorithm.as_str() {
            "direct" => Ok(Box::new(DirectRouting::new(
                entity,
                input_vc,
                position,
                &self.settings,
            )?)),
            "dimension_order" => Ok(Box::new(DimensionOrderRouting::new(
                entity,
                input_vc,
                position,
                &self.settings,
            )?)),
            "common_ancestor" => Ok(Box::new(CommonAncestorRouting::new(
                entity,
                input_port,
                input_vc,
                position,
                &self.settings,
            )?)),
            other => config_error!("unknown routing algorithm '{other}'"),
        }
    }
}
