// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Per-VC buffer at a router input.
//!
//! The input queue holds the flits of one `(port, vc)` and drives the head
//! packet through routing and the router's transfer scheduler:
//!
//! ```text
//!  Idle -> RoutingPending -> QueuedForGrant -> Draining -> Idle
//! ```
//!
//! When the transfer scheduler grants the head packet the whole packet is
//! moved to its output queue in one go. The buffer slots it occupied are
//! then freed one per core cycle, each returning a credit upstream, as the
//! flits of the packet arrive.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::time::{ClockDomain, EPSILON_PIPELINE};
use flitsim_engine::traits::Component;
use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{invariant_error, sim_error};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::{debug, trace};

use crate::crossbar_scheduler::{CrossbarScheduler, CrossbarSchedulerClient};
use crate::router::Router;
use crate::routing::Response;
use crate::routing::reduction::reduce;
use crate::types::{Flit, vc_index};

const ROUTE_EVENT: u32 = 0;
const DRAIN_EVENT: u32 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputQueueState {
    /// Nothing to route.
    Idle,

    /// The head flit is being routed.
    RoutingPending,

    /// The head packet is waiting for the transfer scheduler.
    QueuedForGrant,

    /// The head packet has been transferred and its flits are being freed.
    Draining,
}

#[derive(EntityDisplay)]
pub struct InputQueue {
    pub entity: Rc<Entity>,
    context: SimContext,
    self_ref: Weak<InputQueue>,
    router: Weak<Router>,
    scheduler: Rc<CrossbarScheduler>,

    port: usize,
    vc: usize,
    num_vcs: usize,
    depth: usize,

    state: Cell<InputQueueState>,
    buffer: RefCell<VecDeque<Flit>>,

    /// Flits of the transferred packet still to be freed.
    remaining: Cell<usize>,
    drain_pending: Cell<bool>,

    /// Tick at which a slot was last freed.
    last_drain: Cell<Option<u64>>,
}

impl InputQueue {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        router: Weak<Router>,
        scheduler: &Rc<CrossbarScheduler>,
        port: usize,
        vc: usize,
        num_vcs: usize,
        depth: usize,
    ) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        Rc::new_cyclic(|self_ref| Self {
            entity,
            context: context.clone(),
            self_ref: self_ref.clone(),
            router,
            scheduler: scheduler.clone(),
            port,
            vc,
            num_vcs,
            depth,
            state: Cell::new(InputQueueState::Idle),
            buffer: RefCell::new(VecDeque::new()),
            remaining: Cell::new(0),
            drain_pending: Cell::new(false),
            last_drain: Cell::new(None),
        })
    }

    #[must_use]
    pub fn state(&self) -> InputQueueState {
        self.state.get()
    }

    /// Number of buffer slots in use.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Buffer an arriving flit.
    pub fn receive_flit(&self, flit: Flit) -> SimResult {
        {
            let mut buffer = self.buffer.borrow_mut();
            if buffer.len() >= self.depth {
                return invariant_error!(self.context, self.entity ;
                    "buffer overflow on port {} vc {} (depth {}) by {flit}",
                    self.port, self.vc, self.depth);
            }
            trace!(self.entity ; "buffer {flit}");
            buffer.push_back(flit);
        }

        match self.state.get() {
            InputQueueState::Idle => self.start_routing(),
            InputQueueState::Draining => self.schedule_drain(),
            _ => Ok(()),
        }
    }

    fn router(&self) -> Result<Rc<Router>, SimError> {
        match self.router.upgrade() {
            Some(router) => Ok(router),
            None => sim_error!("{}: router dropped", self.entity),
        }
    }

    fn front(&self) -> Option<Flit> {
        self.buffer.borrow().front().cloned()
    }

    fn start_routing(&self) -> SimResult {
        let Some(head) = self.front() else {
            return Ok(());
        };
        if !head.is_head() {
            return invariant_error!(self.context, self.entity ;
                "{head} at the front of port {} vc {} is not a head flit", self.port, self.vc);
        }

        let latency = self.router()?.routing_latency(self.port, self.vc);
        self.state.set(InputQueueState::RoutingPending);
        self.schedule_route(latency)
    }

    fn schedule_route(&self, cycles: u64) -> SimResult {
        let tick = self.context.future_cycle(ClockDomain::Core, cycles);
        self.context.schedule(
            self.self_ref.clone(),
            tick,
            EPSILON_PIPELINE,
            Box::new(()),
            ROUTE_EVENT,
        )
    }

    fn handle_route(&self) -> SimResult {
        let Some(head) = self.front() else {
            return invariant_error!(self.context, self.entity ;
                "routing completed with port {} vc {} empty", self.port, self.vc);
        };

        let router = self.router()?;
        let mut response = Response::new();
        router.route(self.port, self.vc, &head, &mut response)?;
        if !response.is_resolved() {
            debug!(self.entity ; "{head} unresolved, retrying");
            return self.schedule_route(1);
        }

        let status = router.congestion_status();
        let reduction = router.routing_reduction(self.port, self.vc);
        let candidates = reduce(reduction, response.into_candidates(), |c| {
            status.status(self.port, self.vc, c.port, c.vc)
        });

        let mut requests = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if candidate.port >= router.num_ports() || candidate.vc >= self.num_vcs {
                return invariant_error!(self.context, self.entity ;
                    "{head} routed to non-existent output {candidate}");
            }
            requests.push((
                candidate.port,
                vc_index(candidate.port, candidate.vc, self.num_vcs),
            ));
        }

        trace!(self.entity ; "{head} requests {} outputs", requests.len());
        self.state.set(InputQueueState::QueuedForGrant);
        // The whole packet moves at once, so it is both head and tail to the
        // transfer scheduler
        self.scheduler.request(
            vc_index(self.port, self.vc, self.num_vcs),
            requests,
            head.packet().num_flits(),
            true,
            true,
        )
    }

    /// Free the slot of the flit at the front and return its credit.
    fn pop_and_credit(&self) -> Result<Flit, SimError> {
        let Some(flit) = self.buffer.borrow_mut().pop_front() else {
            return invariant_error!(self.context, self.entity ;
                "port {} vc {} freed while empty", self.port, self.vc);
        };
        self.last_drain.set(Some(self.context.now()));
        self.router()?.send_credit(self.port, self.vc)?;
        Ok(flit)
    }

    fn schedule_drain(&self) -> SimResult {
        if self.drain_pending.get() || self.buffer.borrow().is_empty() {
            return Ok(());
        }
        let mut tick = self.context.next_edge(ClockDomain::Core);
        if let Some(last) = self.last_drain.get() {
            tick = tick.max(last + self.context.cycle_time(ClockDomain::Core));
        }
        self.drain_pending.set(true);
        self.context.schedule(
            self.self_ref.clone(),
            tick,
            EPSILON_PIPELINE,
            Box::new(()),
            DRAIN_EVENT,
        )
    }

    fn handle_drain(&self) -> SimResult {
        self.drain_pending.set(false);
        if self.state.get() != InputQueueState::Draining {
            return sim_error!("{}: drain while {:?}", self.entity, self.state.get());
        }

        let flit = self.pop_and_credit()?;
        if flit.is_head() {
            return invariant_error!(self.context, self.entity ;
                "{flit} interleaved with a transferred packet on port {} vc {}",
                self.port, self.vc);
        }
        trace!(self.entity ; "freed {flit}");

        self.remaining.set(self.remaining.get() - 1);
        self.finish_or_continue()
    }

    fn finish_or_continue(&self) -> SimResult {
        if self.remaining.get() > 0 {
            self.state.set(InputQueueState::Draining);
            self.schedule_drain()
        } else {
            self.state.set(InputQueueState::Idle);
            self.start_routing()
        }
    }
}

impl CrossbarSchedulerClient for InputQueue {
    fn crossbar_scheduler_response(&self, port: usize, vc: usize) -> SimResult {
        if self.state.get() != InputQueueState::QueuedForGrant {
            return invariant_error!(self.context, self.entity ;
                "grant of port {port} while {:?}", self.state.get());
        }
        if vc / self.num_vcs != port {
            return invariant_error!(self.context, self.entity ;
                "granted vc index {vc} does not belong to port {port}");
        }
        let Some(head) = self.front() else {
            return invariant_error!(self.context, self.entity ;
                "granted with port {} vc {} empty", self.port, self.vc);
        };

        let output_vc = vc % self.num_vcs;
        debug!(self.entity ; "transfer {head} to port {port} vc {output_vc}");
        self.router()?.transfer_packet(&head, port, output_vc)?;

        self.pop_and_credit()?;
        self.remaining.set(head.packet().num_flits() - 1);
        self.finish_or_continue()
    }
}

impl Component for InputQueue {
    fn process_event(&self, _event: Box<dyn Any>, kind: u32) -> SimResult {
        match kind {
            ROUTE_EVENT => self.handle_route(),
            DRAIN_EVENT => self.handle_drain(),
            _ => sim_error!("{}: unknown event kind {kind}", self.entity),
        }
    }
}
