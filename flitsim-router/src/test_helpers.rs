// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Helpers for building routers in tests.

use std::cell::Cell;
use std::rc::Rc;

use flitsim_engine::engine::Engine;
use flitsim_engine::time::ClockDomain;
use flitsim_engine::types::{SimError, SimResult};
use flitsim_track::entity::Entity;

use crate::router::Router;
use crate::routing::{
    Candidate, Response, RouterPosition, RoutingAlgorithm, RoutingAlgorithmFactory,
};
use crate::settings::{ChannelSettings, ReductionMode, RouterSettings};
use crate::terminal::{Terminal, connect_terminal};
use crate::types::Flit;

/// Routing that always offers the same candidates.
pub struct FixedRouting {
    latency: u64,
    candidates: Vec<Candidate>,

    /// Number of requests still to be answered as unresolved.
    unresolved: Rc<Cell<u32>>,
}

impl RoutingAlgorithm for FixedRouting {
    fn latency(&self) -> u64 {
        self.latency
    }

    fn reduction(&self) -> ReductionMode {
        ReductionMode::All
    }

    fn process_request(&mut self, _flit: &Flit, response: &mut Response) -> SimResult {
        if self.unresolved.get() > 0 {
            self.unresolved.set(self.unresolved.get() - 1);
            response.set_unresolved();
            return Ok(());
        }
        for candidate in &self.candidates {
            response.add(candidate.port, candidate.vc, candidate.hops);
        }
        Ok(())
    }
}

/// Creates a [`FixedRouting`] for every input.
pub struct FixedRoutingFactory {
    latency: u64,
    candidates: Vec<Candidate>,
    unresolved: Rc<Cell<u32>>,
}

impl FixedRoutingFactory {
    /// Every request is answered with `(port, vc, hops)` of `candidates`.
    #[must_use]
    pub fn new(latency: u64, candidates: &[(usize, usize, u32)]) -> Self {
        Self {
            latency,
            candidates: candidates
                .iter()
                .map(|&(port, vc, hops)| Candidate { port, vc, hops })
                .collect(),
            unresolved: Rc::new(Cell::new(0)),
        }
    }

    /// Answer the next `count` requests, across all inputs, as unresolved.
    #[must_use]
    pub fn with_unresolved(self, count: u32) -> Self {
        self.unresolved.set(count);
        self
    }
}

impl RoutingAlgorithmFactory for FixedRoutingFactory {
    fn create_routing_algorithm(
        &self,
        _input_port: usize,
        _input_vc: usize,
        _name: &str,
        _parent: &Rc<Entity>,
        _position: &RouterPosition,
    ) -> Result<Box<dyn RoutingAlgorithm>, SimError> {
        Ok(Box::new(FixedRouting {
            latency: self.latency,
            candidates: self.candidates.clone(),
            unresolved: self.unresolved.clone(),
        }))
    }
}

/// A router with a terminal on every port.
pub struct RouterBench {
    pub engine: Engine,
    pub router: Rc<Router>,
    pub terminals: Vec<Rc<Terminal>>,
}

/// Build a router with terminal `i` attached to port `i`.
///
/// The core and channel clocks are set to `core_period` and
/// `channel_period` ticks before anything is built.
#[allow(clippy::too_many_arguments)]
pub fn router_bench(
    mut engine: Engine,
    core_period: u64,
    channel_period: u64,
    num_ports: usize,
    num_vcs: usize,
    settings: &RouterSettings,
    channel: &ChannelSettings,
    factory: &dyn RoutingAlgorithmFactory,
) -> Result<RouterBench, SimError> {
    engine.set_cycle_time(ClockDomain::Core, core_period)?;
    engine.set_cycle_time(ClockDomain::Channel, channel_period)?;
    let context = engine.context();
    let settings = &settings.tailored_to(channel.latency);

    let router = Router::new(
        engine.top(),
        "router",
        &context,
        0,
        vec![0],
        num_ports,
        num_vcs,
        settings,
        factory,
    )?;

    let initial_credits = u32::try_from(settings.input_queue_depth)
        .map_err(|e| SimError::Config(e.to_string()))?;
    let mut terminals = Vec::with_capacity(num_ports);
    for port in 0..num_ports {
        let terminal = Terminal::new(
            engine.top(),
            &format!("terminal{port}"),
            &context,
            port,
            num_vcs,
            initial_credits,
        );
        connect_terminal(&router, port, &terminal, &context, channel)?;
        terminals.push(terminal);
    }

    Ok(RouterBench {
        engine,
        router,
        terminals,
    })
}
