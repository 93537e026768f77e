// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Routing for a single router with every terminal attached to it.

use std::rc::Rc;

use flitsim_engine::config_error;
use flitsim_engine::types::{SimError, SimResult};
use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::routing::{Response, RouterPosition, RoutingAlgorithm};
use crate::settings::{ReductionMode, RoutingSettings};
use crate::types::Flit;

/// Sends every packet straight to the port of its destination terminal.
pub struct DirectRouting {
    entity: Rc<Entity>,
    latency: u64,
    reduction: ReductionMode,
    num_vcs: usize,
    input_vc: usize,
    concentration: usize,
    all_vcs: bool,
}

impl DirectRouting {
    pub fn new(
        entity: Rc<Entity>,
        input_vc: usize,
        position: &RouterPosition,
        settings: &RoutingSettings,
    ) -> Result<Self, SimError> {
        let concentration = if settings.concentration == 0 {
            position.num_ports
        } else {
            settings.concentration
        };
        if concentration == 0 || concentration > position.num_ports {
            return config_error!(
                "concentration {concentration} does not fit the {} router ports",
                position.num_ports
            );
        }
        Ok(Self {
            entity,
            latency: settings.latency,
            reduction: settings.reduction,
            num_vcs: position.num_vcs,
            input_vc,
            concentration,
            all_vcs: settings.all_vcs,
        })
    }
}

impl RoutingAlgorithm for DirectRouting {
    fn latency(&self) -> u64 {
        self.latency
    }

    fn reduction(&self) -> ReductionMode {
        self.reduction
    }

    fn process_request(&mut self, flit: &Flit, response: &mut Response) -> SimResult {
        let port = flit.packet().destination() % self.concentration;
        let vcs: Vec<usize> = if self.all_vcs {
            (0..self.num_vcs).collect()
        } else {
            vec![self.input_vc]
        };
        for vc in vcs {
            response.add(port, vc, 1);
        }
        trace!(self.entity ; "{flit} -> port {port}");
        Ok(())
    }
}
