// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Up/down routing for a fat tree.
//!
//! The tree is described by the `[down, up]` port counts of each level,
//! leaf level first. A router has its `down` ports first followed by its
//! `up` ports and its address is `[level, position]`. The routers of one
//! level are grouped: every group of `prod(up[..level])` routers covers the
//! same `prod(down[..=level])` terminals.
//!
//! Packets climb until they reach a router whose group covers the
//! destination (or to the top level when `least_common_ancestor` is off)
//! and then descend. The up port is chosen by hashing
//! `(source, destination, router)` when deterministic, otherwise by a
//! seeded generator.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{config_error, sim_error};
use flitsim_track::entity::Entity;
use flitsim_track::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::routing::{Response, RouterPosition, RoutingAlgorithm};
use crate::settings::{ReductionMode, RoutingSettings};
use crate::types::Flit;

pub struct CommonAncestorRouting {
    entity: Rc<Entity>,
    latency: u64,
    reduction: ReductionMode,
    num_vcs: usize,
    input_port: usize,
    input_vc: usize,
    all_vcs: bool,
    deterministic: bool,
    least_common_ancestor: bool,
    radices: Vec<[usize; 2]>,
    router_id: usize,
    level: usize,
    position: usize,
    rng: StdRng,
}

impl CommonAncestorRouting {
    pub fn new(
        entity: Rc<Entity>,
        input_port: usize,
        input_vc: usize,
        position: &RouterPosition,
        settings: &RoutingSettings,
    ) -> Result<Self, SimError> {
        let radices = settings.radices.clone();
        if radices.is_empty() || radices.iter().any(|[down, _]| *down == 0) {
            return config_error!("common_ancestor needs radices with down ports on every level");
        }
        let num_levels = radices.len();
        if let Some(open) = radices[..num_levels - 1].iter().position(|[_, up]| *up == 0) {
            return config_error!("common_ancestor level {open} below the top has no up ports");
        }
        let &[level, router_position] = position.address.as_slice() else {
            return config_error!(
                "router {} address {:?} must be [level, position]",
                position.id,
                position.address
            );
        };
        if level >= radices.len() {
            return config_error!("router {} level {level} is not in the tree", position.id);
        }
        let [down, up] = radices[level];
        if level + 1 == radices.len() && up != 0 {
            return config_error!("top level routers cannot have up ports");
        }
        if position.num_ports != down + up {
            return config_error!(
                "router {} at level {level} needs {} ports, has {}",
                position.id,
                down + up,
                position.num_ports
            );
        }

        let seed = settings
            .seed
            .wrapping_add((position.id as u64) << 32)
            .wrapping_add((input_port * position.num_vcs + input_vc) as u64);
        Ok(Self {
            entity,
            latency: settings.latency,
            reduction: settings.reduction,
            num_vcs: position.num_vcs,
            input_port,
            input_vc,
            all_vcs: settings.all_vcs,
            deterministic: settings.deterministic,
            least_common_ancestor: settings.least_common_ancestor,
            radices,
            router_id: position.id,
            level,
            position: router_position,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Number of terminals below a router of `level`.
    fn span(&self, level: usize) -> usize {
        self.radices[..=level].iter().map(|[down, _]| down).product()
    }

    /// Number of routers of `level` that cover the same terminals.
    fn replication(&self, level: usize) -> usize {
        self.radices[..level].iter().map(|[_, up]| up).product()
    }

    fn top_level(&self) -> usize {
        self.radices.len() - 1
    }

    /// Lowest level at which `source` and `destination` share a subtree.
    fn ancestor_level(&self, source: usize, destination: usize) -> usize {
        (0..self.radices.len())
            .find(|&level| source / self.span(level) == destination / self.span(level))
            .unwrap_or(self.top_level())
    }

    fn up_port(&mut self, source: usize, destination: usize) -> usize {
        let [down, up] = self.radices[self.level];
        let choice = if self.deterministic {
            let mut hasher = DefaultHasher::new();
            (source, destination, self.router_id).hash(&mut hasher);
            (hasher.finish() % up as u64) as usize
        } else {
            self.rng.gen_range(0..up)
        };
        down + choice
    }

    fn add_vcs(&self, response: &mut Response, port: usize, hops: u32) {
        if self.all_vcs {
            for vc in 0..self.num_vcs {
                response.add(port, vc, hops);
            }
        } else {
            response.add(port, self.input_vc, hops);
        }
    }
}

impl RoutingAlgorithm for CommonAncestorRouting {
    fn latency(&self) -> u64 {
        self.latency
    }

    fn reduction(&self) -> ReductionMode {
        self.reduction
    }

    fn process_request(&mut self, flit: &Flit, response: &mut Response) -> SimResult {
        let packet = flit.packet();
        let (source, destination) = (packet.source(), packet.destination());
        let [down, _] = self.radices[self.level];

        let group = self.position / self.replication(self.level);
        let below = destination / self.span(self.level) == group;
        let ascending = self.input_port < down;
        let go_up = ascending
            && self.level < self.top_level()
            && (!below || !self.least_common_ancestor);

        if go_up {
            let turn = if self.least_common_ancestor {
                self.ancestor_level(source, destination)
            } else {
                self.top_level()
            };
            let hops = (turn.saturating_sub(self.level) + turn + 1) as u32;
            let port = self.up_port(source, destination);
            trace!(self.entity ; "{flit} up port {port}, turning at level {turn}");
            self.add_vcs(response, port, hops);
            return Ok(());
        }

        if !below {
            return sim_error!(
                "{}: terminal {destination} of {flit} is not below level {} position {}",
                self.entity,
                self.level,
                self.position
            );
        }
        let child_span = if self.level == 0 {
            1
        } else {
            self.span(self.level - 1)
        };
        let port = (destination / child_span) % down;
        trace!(self.entity ; "{flit} down port {port}");
        self.add_vcs(response, port, (self.level + 1) as u32);
        Ok(())
    }
}
