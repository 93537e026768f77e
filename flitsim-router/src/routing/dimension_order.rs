// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Dimension-order routing for a torus.
//!
//! Port layout of every router: the `concentration` terminal ports come
//! first, followed by a `(positive, negative)` pair of ports per dimension.
//!
//! A destination address is `[terminal port, x0, x1, ...]`. Each dimension
//! is resolved in turn taking the shorter way round the ring (ties go the
//! positive way).
//!
//! VCs are split into two classes by parity. A packet uses class 0 while it
//! still has to cross the dateline (the wrap-around link) of the current
//! dimension and class 1 otherwise, which breaks the cyclic channel
//! dependency of each ring.

use std::rc::Rc;

use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{config_error, sim_error};
use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::routing::{Response, RouterPosition, RoutingAlgorithm, candidate_vcs};
use crate::settings::{ReductionMode, RoutingSettings};
use crate::types::Flit;

pub struct DimensionOrderRouting {
    entity: Rc<Entity>,
    latency: u64,
    reduction: ReductionMode,
    num_vcs: usize,
    input_vc: usize,
    all_vcs: bool,
    concentration: usize,
    widths: Vec<usize>,
    address: Vec<usize>,
}

impl DimensionOrderRouting {
    pub fn new(
        entity: Rc<Entity>,
        input_vc: usize,
        position: &RouterPosition,
        settings: &RoutingSettings,
    ) -> Result<Self, SimError> {
        let widths = settings.dimension_widths.clone();
        if widths.is_empty() || widths.contains(&0) {
            return config_error!("dimension_order needs non-zero dimension_widths");
        }
        if position.address.len() != widths.len() {
            return config_error!(
                "router {} address {:?} does not match {} dimensions",
                position.id,
                position.address,
                widths.len()
            );
        }
        if position
            .address
            .iter()
            .zip(&widths)
            .any(|(coord, width)| coord >= width)
        {
            return config_error!(
                "router {} address {:?} outside {:?}",
                position.id,
                position.address,
                widths
            );
        }
        let concentration = settings.concentration;
        if concentration == 0 || position.num_ports != concentration + 2 * widths.len() {
            return config_error!(
                "dimension_order needs {} terminal ports plus 2 per dimension, router has {}",
                concentration,
                position.num_ports
            );
        }
        if position.num_vcs < 2 {
            return config_error!("dimension_order needs at least 2 VCs for the dateline classes");
        }

        Ok(Self {
            entity,
            latency: settings.latency,
            reduction: settings.reduction,
            num_vcs: position.num_vcs,
            input_vc,
            all_vcs: settings.all_vcs,
            concentration,
            widths,
            address: position.address.clone(),
        })
    }

    /// Shortest distance from this router to `dst` in dimension `dim` and
    /// whether it is reached going the positive way.
    fn distance(&self, dim: usize, dst: usize) -> (usize, bool) {
        let width = self.widths[dim];
        let src = self.address[dim];
        let forward = (dst + width - src) % width;
        let backward = (width - forward) % width;
        if forward <= backward {
            (forward, true)
        } else {
            (backward, false)
        }
    }
}

impl RoutingAlgorithm for DimensionOrderRouting {
    fn latency(&self) -> u64 {
        self.latency
    }

    fn reduction(&self) -> ReductionMode {
        self.reduction
    }

    fn process_request(&mut self, flit: &Flit, response: &mut Response) -> SimResult {
        let destination = flit.packet().destination_address();
        if destination.len() != self.widths.len() + 1 {
            return sim_error!(
                "{}: destination address {destination:?} of {flit} has the wrong dimensions",
                self.entity
            );
        }

        let remaining: usize = (0..self.widths.len())
            .map(|dim| self.distance(dim, destination[dim + 1]).0)
            .sum();
        let hops = remaining as u32 + 1;

        for dim in 0..self.widths.len() {
            let src = self.address[dim];
            let dst = destination[dim + 1];
            if src == dst {
                continue;
            }

            let (_, positive) = self.distance(dim, dst);
            let (port, will_wrap) = if positive {
                (self.concentration + 2 * dim, dst < src)
            } else {
                (self.concentration + 2 * dim + 1, dst > src)
            };
            let class = usize::from(!will_wrap);
            let vcs = candidate_vcs(
                self.all_vcs,
                (0..self.num_vcs).filter(|vc| vc % 2 == class),
            );
            for vc in vcs {
                response.add(port, vc, hops);
            }
            trace!(self.entity ; "{flit} dim {dim} -> port {port} class {class}");
            return Ok(());
        }

        // Arrived: eject to the terminal
        let port = destination[0];
        if port >= self.concentration {
            return sim_error!(
                "{}: terminal port {port} of {flit} is not a terminal port",
                self.entity
            );
        }
        let vcs: Vec<usize> = if self.all_vcs {
            (0..self.num_vcs).collect()
        } else {
            vec![self.input_vc]
        };
        for vc in vcs {
            response.add(port, vc, hops);
        }
        trace!(self.entity ; "{flit} -> terminal port {port}");
        Ok(())
    }
}
