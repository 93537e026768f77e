// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The output-queued router.
//!
//! The router owns one routing algorithm, input queue and output queue per
//! `(port, vc)` and one output scheduler, crossbar and ejector per port. All
//! of them are built once in [`Router::new`] and live as long as the router.
//!
//! Packets move from the input queues to the unbounded output queues
//! through the router's transfer scheduler. A granted packet reaches its
//! output queue `transfer_latency` core cycles later. Because the output
//! queues never fill the congestion status must use the absolute style.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::time::{ClockDomain, EPSILON_ALLOCATE, EPSILON_PIPELINE};
use flitsim_engine::traits::{Component, downcast_event};
use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{config_error, invariant_error, sim_error};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::{debug, info, trace};

use crate::channel::{Channel, ChannelEndpoint};
use crate::congestion_status::CongestionStatus;
use crate::crossbar::Crossbar;
use crate::crossbar_scheduler::CrossbarScheduler;
use crate::ejector::Ejector;
use crate::input_queue::{InputQueue, InputQueueState};
use crate::output_queue::OutputQueue;
use crate::routing::{Response, RouterPosition, RoutingAlgorithm, RoutingAlgorithmFactory};
use crate::settings::{CongestionStyle, ReductionMode, RouterSettings};
use crate::types::{Credit, Flit, Packet, UNBOUNDED_CREDITS, vc_index};

/// Packet and flit totals seen at the router's ports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RouterCounters {
    pub packets_received: u64,
    pub flits_received: u64,
    pub packets_sent: u64,
    pub flits_sent: u64,
}

/// What each input port expects next.
#[derive(Default)]
struct PortState {
    /// Tick the next flit of the arriving packet must arrive at.
    expected_time: Option<u64>,

    /// Packet currently arriving.
    expected_packet: Option<Rc<Packet>>,

    /// VC the arriving packet was assigned at its head.
    vc: Option<usize>,
}

#[derive(EntityDisplay)]
pub struct Router {
    pub entity: Rc<Entity>,
    context: SimContext,
    self_ref: Weak<Router>,

    id: usize,
    address: Vec<usize>,
    num_ports: usize,
    num_vcs: usize,
    transfer_latency: u64,
    input_queue_depth: usize,

    /// Number of VCs a single credit message can carry.
    credit_size: usize,

    routing_algorithms: Vec<RefCell<Box<dyn RoutingAlgorithm>>>,
    input_queues: Vec<Rc<InputQueue>>,
    transfer_scheduler: Rc<CrossbarScheduler>,
    congestion_status: Rc<CongestionStatus>,
    output_schedulers: Vec<Rc<CrossbarScheduler>>,
    output_crossbars: Vec<Rc<Crossbar>>,
    output_queues: Vec<Rc<OutputQueue>>,
    ejectors: Vec<Rc<Ejector>>,

    input_channels: RefCell<Vec<Option<Rc<Channel>>>>,
    output_channels: RefCell<Vec<Option<Rc<Channel>>>>,
    ports: RefCell<Vec<PortState>>,
    counters: Cell<RouterCounters>,
}

impl Router {
    /// Build a router and everything inside it.
    ///
    /// The clock periods of the engine must be set before this is called as
    /// the credit message size depends on them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        id: usize,
        address: Vec<usize>,
        num_ports: usize,
        num_vcs: usize,
        settings: &RouterSettings,
        factory: &dyn RoutingAlgorithmFactory,
    ) -> Result<Rc<Self>, SimError> {
        settings.validate()?;
        if num_ports == 0 || num_vcs == 0 {
            return config_error!("router {name}: needs at least one port and one VC");
        }
        if settings.congestion_status.style != CongestionStyle::Absolute {
            return config_error!(
                "router {name}: output queues are unbounded, congestion status must be absolute"
            );
        }
        let depth = u32::try_from(settings.input_queue_depth).or_else(|_| {
            config_error!(
                "router {name}: input_queue_depth {} too large",
                settings.input_queue_depth
            )
        })?;

        let entity = Rc::new(Entity::new(parent, name));
        let num_slots = num_ports * num_vcs;
        let credit_size =
            num_vcs * context.cycle_ratio(ClockDomain::Channel, ClockDomain::Core) as usize;

        let congestion_status = Rc::new(CongestionStatus::new(
            &entity,
            "congestion_status",
            context,
            num_ports,
            num_vcs,
            &settings.congestion_status,
        ));

        let position = RouterPosition {
            id,
            address: address.clone(),
            num_ports,
            num_vcs,
        };
        let mut routing_algorithms = Vec::with_capacity(num_slots);
        for port in 0..num_ports {
            for vc in 0..num_vcs {
                let algorithm = factory.create_routing_algorithm(
                    port,
                    vc,
                    &format!("routing_{port}_{vc}"),
                    &entity,
                    &position,
                )?;
                routing_algorithms.push(RefCell::new(algorithm));
            }
        }

        let transfer_scheduler = CrossbarScheduler::new(
            &entity,
            "transfer_scheduler",
            context,
            num_slots,
            num_slots,
            num_ports,
            0,
            ClockDomain::Core,
            &settings.transfer_scheduler,
        )?;
        for vc_idx in 0..num_slots {
            transfer_scheduler.init_credits(vc_idx, UNBOUNDED_CREDITS)?;
        }

        let mut output_schedulers = Vec::with_capacity(num_ports);
        let mut output_crossbars = Vec::with_capacity(num_ports);
        let mut output_queues = Vec::with_capacity(num_slots);
        for port in 0..num_ports {
            let scheduler = CrossbarScheduler::new(
                &entity,
                &format!("output_scheduler_{port}"),
                context,
                num_vcs,
                num_vcs,
                1,
                port * num_vcs,
                ClockDomain::Channel,
                &settings.output_crossbar_scheduler,
            )?;
            let crossbar = Crossbar::new(
                &entity,
                &format!("output_crossbar_{port}"),
                context,
                num_vcs,
                1,
                ClockDomain::Channel,
                &settings.output_crossbar,
            )?;

            for vc in 0..num_vcs {
                let vc_idx = vc_index(port, vc, num_vcs);
                scheduler.init_credits(vc_idx, depth)?;
                congestion_status.init_credits(vc_idx, UNBOUNDED_CREDITS)?;
                output_queues.push(OutputQueue::new(
                    &entity,
                    &format!("output_queue_{port}_{vc}"),
                    context,
                    port,
                    vc,
                    vc_idx,
                    &scheduler,
                    &crossbar,
                    &congestion_status,
                )?);
            }
            output_schedulers.push(scheduler);
            output_crossbars.push(crossbar);
        }

        let router = Rc::new_cyclic(|self_ref: &Weak<Router>| {
            let mut input_queues = Vec::with_capacity(num_slots);
            for port in 0..num_ports {
                for vc in 0..num_vcs {
                    input_queues.push(InputQueue::new(
                        &entity,
                        &format!("input_queue_{port}_{vc}"),
                        context,
                        self_ref.clone(),
                        &transfer_scheduler,
                        port,
                        vc,
                        num_vcs,
                        settings.input_queue_depth,
                    ));
                }
            }
            let ejectors = (0..num_ports)
                .map(|port| {
                    Rc::new(Ejector::new(
                        &entity,
                        &format!("ejector_{port}"),
                        self_ref.clone(),
                        port,
                    ))
                })
                .collect();

            Self {
                entity: entity.clone(),
                context: context.clone(),
                self_ref: self_ref.clone(),
                id,
                address,
                num_ports,
                num_vcs,
                transfer_latency: settings.transfer_latency,
                input_queue_depth: settings.input_queue_depth,
                credit_size,
                routing_algorithms,
                input_queues,
                transfer_scheduler,
                congestion_status,
                output_schedulers,
                output_crossbars,
                output_queues,
                ejectors,
                input_channels: RefCell::new(vec![None; num_ports]),
                output_channels: RefCell::new(vec![None; num_ports]),
                ports: RefCell::new((0..num_ports).map(|_| PortState::default()).collect()),
                counters: Cell::new(RouterCounters::default()),
            }
        });

        for (vc_idx, queue) in router.input_queues.iter().enumerate() {
            let client: Weak<InputQueue> = Rc::downgrade(queue);
            router.transfer_scheduler.set_client(vc_idx, client)?;
        }
        for (crossbar, ejector) in router.output_crossbars.iter().zip(&router.ejectors) {
            let receiver: Weak<Ejector> = Rc::downgrade(ejector);
            crossbar.set_receiver(0, receiver, 0)?;
        }

        info!(router.entity ;
            "router {id} {:?}: {num_ports} ports x {num_vcs} vcs", router.address);
        Ok(router)
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> &[usize] {
        &self.address
    }

    #[must_use]
    pub fn num_ports(&self) -> usize {
        self.num_ports
    }

    #[must_use]
    pub fn num_vcs(&self) -> usize {
        self.num_vcs
    }

    /// Flits each input VC can buffer.
    #[must_use]
    pub fn input_queue_depth(&self) -> usize {
        self.input_queue_depth
    }

    /// Number of VCs a credit message sent by this router can carry.
    #[must_use]
    pub fn credit_size(&self) -> usize {
        self.credit_size
    }

    /// Bind the channel that delivers flits to `port`.
    pub fn set_input_channel(&self, port: usize, channel: &Rc<Channel>) -> SimResult {
        self.check_port(port)?;
        let mut channels = self.input_channels.borrow_mut();
        if channels[port].is_some() {
            return sim_error!("{}: input channel of port {port} already set", self.entity);
        }
        let endpoint: Weak<dyn ChannelEndpoint> = self.self_ref.clone();
        channel.set_sink(endpoint, port)?;
        channels[port] = Some(channel.clone());
        Ok(())
    }

    /// The channel that delivers flits to `port`.
    #[must_use]
    pub fn input_channel(&self, port: usize) -> Option<Rc<Channel>> {
        self.input_channels.borrow().get(port).cloned().flatten()
    }

    /// Bind the channel that carries flits away from `port`.
    pub fn set_output_channel(&self, port: usize, channel: &Rc<Channel>) -> SimResult {
        self.check_port(port)?;
        let mut channels = self.output_channels.borrow_mut();
        if channels[port].is_some() {
            return sim_error!("{}: output channel of port {port} already set", self.entity);
        }
        let endpoint: Weak<dyn ChannelEndpoint> = self.self_ref.clone();
        channel.set_source(endpoint, port)?;
        channels[port] = Some(channel.clone());
        Ok(())
    }

    /// The channel that carries flits away from `port`.
    #[must_use]
    pub fn output_channel(&self, port: usize) -> Option<Rc<Channel>> {
        self.output_channels.borrow().get(port).cloned().flatten()
    }

    fn check_port(&self, port: usize) -> SimResult {
        if port >= self.num_ports {
            return sim_error!("{}: no port {port}", self.entity);
        }
        Ok(())
    }

    /// Add `vc` to the credit message going upstream on `port` this channel
    /// cycle, creating the message if needed.
    pub fn send_credit(&self, port: usize, vc: usize) -> SimResult {
        if vc >= self.num_vcs {
            return invariant_error!(self.context, self.entity ;
                "credit for port {port} vc {vc} beyond {} vcs", self.num_vcs);
        }
        let Some(channel) = self.input_channel(port) else {
            return sim_error!("{}: no input channel on port {port}", self.entity);
        };

        trace!(self.entity ; "credit port {port} vc {vc}");
        match channel.get_next_credit() {
            Some(credit) => {
                let mut credit = credit.borrow_mut();
                if credit.is_full() {
                    return invariant_error!(self.context, self.entity ;
                        "credit on port {port} full ({} vcs), cannot add vc {vc}", credit.len());
                }
                credit.put_num(vc)
            }
            None => {
                let mut credit = Credit::new(self.credit_size);
                credit.put_num(vc)?;
                channel.set_next_credit(credit)
            }
        }
    }

    /// Stage `flit` on the output channel of `port`.
    pub fn send_flit(&self, port: usize, flit: Flit) -> SimResult {
        let Some(channel) = self.output_channel(port) else {
            return sim_error!("{}: no output channel on port {port}", self.entity);
        };
        if let Some(pending) = channel.get_next_flit() {
            return invariant_error!(self.context, self.entity ;
                "{flit} sent on port {port} while {pending} is pending");
        }

        let mut counters = self.counters.get();
        if flit.is_head() {
            counters.packets_sent += 1;
        }
        counters.flits_sent += 1;
        self.counters.set(counters);

        channel.set_next_flit(flit)
    }

    /// Move the packet of `head` to the output queue of
    /// `(output_port, output_vc)`.
    ///
    /// Every flit of the packet is moved to `output_vc`, including those
    /// that have not yet arrived, and the packet reaches the output queue
    /// `transfer_latency` core cycles later.
    pub fn transfer_packet(&self, head: &Flit, output_port: usize, output_vc: usize) -> SimResult {
        if self.context.epsilon() != EPSILON_ALLOCATE {
            return invariant_error!(self.context, self.entity ;
                "transfer of {head} outside the allocation epsilon");
        }
        if output_port >= self.num_ports || output_vc >= self.num_vcs {
            return invariant_error!(self.context, self.entity ;
                "transfer of {head} to missing port {output_port} vc {output_vc}");
        }

        let vc_idx = vc_index(output_port, output_vc, self.num_vcs);
        let packet = head.packet().clone();
        for flit in packet.flits() {
            flit.set_vc(output_vc);
            self.congestion_status.decrement_credit(vc_idx)?;
        }

        let tick = self
            .context
            .future_cycle(ClockDomain::Core, self.transfer_latency);
        debug!(self.entity ; "{packet} to port {output_port} vc {output_vc} at {tick}");
        self.context.schedule(
            self.self_ref.clone(),
            tick,
            EPSILON_PIPELINE,
            Box::new(packet),
            vc_idx as u32,
        )
    }

    /// Run the routing algorithm of input `(port, vc)` for `flit`.
    pub fn route(&self, port: usize, vc: usize, flit: &Flit, response: &mut Response) -> SimResult {
        let vc_idx = vc_index(port, vc, self.num_vcs);
        match self.routing_algorithms.get(vc_idx) {
            Some(algorithm) => algorithm.borrow_mut().process_request(flit, response),
            None => sim_error!("{}: no routing algorithm for port {port} vc {vc}", self.entity),
        }
    }

    /// Core cycles the routing algorithm of input `(port, vc)` takes.
    #[must_use]
    pub fn routing_latency(&self, port: usize, vc: usize) -> u64 {
        self.routing_algorithms[vc_index(port, vc, self.num_vcs)]
            .borrow()
            .latency()
    }

    /// Candidate reduction used by input `(port, vc)`.
    #[must_use]
    pub fn routing_reduction(&self, port: usize, vc: usize) -> ReductionMode {
        self.routing_algorithms[vc_index(port, vc, self.num_vcs)]
            .borrow()
            .reduction()
    }

    #[must_use]
    pub fn congestion_status(&self) -> &Rc<CongestionStatus> {
        &self.congestion_status
    }

    /// Congestion of output `(output_port, output_vc)` seen from input
    /// `(input_port, input_vc)`.
    #[must_use]
    pub fn congestion(
        &self,
        input_port: usize,
        input_vc: usize,
        output_port: usize,
        output_vc: usize,
    ) -> f64 {
        self.congestion_status
            .status(input_port, input_vc, output_port, output_vc)
    }

    /// Downstream credits the output scheduler of `port` holds for `vc`.
    ///
    /// `None` if `port` or `vc` is out of range.
    #[must_use]
    pub fn output_credits(&self, port: usize, vc: usize) -> Option<u32> {
        let slot = self.slot(port, vc)?;
        self.output_schedulers.get(port)?.credits(slot)
    }

    #[must_use]
    pub fn output_queue_occupancy(&self, port: usize, vc: usize) -> Option<usize> {
        let slot = self.slot(port, vc)?;
        self.output_queues.get(slot).map(|queue| queue.occupancy())
    }

    #[must_use]
    pub fn input_queue_occupancy(&self, port: usize, vc: usize) -> Option<usize> {
        let slot = self.slot(port, vc)?;
        self.input_queues.get(slot).map(|queue| queue.occupancy())
    }

    #[must_use]
    pub fn input_queue_state(&self, port: usize, vc: usize) -> Option<InputQueueState> {
        let slot = self.slot(port, vc)?;
        self.input_queues.get(slot).map(|queue| queue.state())
    }

    fn slot(&self, port: usize, vc: usize) -> Option<usize> {
        (port < self.num_ports && vc < self.num_vcs).then(|| vc_index(port, vc, self.num_vcs))
    }

    #[must_use]
    pub fn counters(&self) -> RouterCounters {
        self.counters.get()
    }

    /// Check that `flit` continues the packet arriving on `port` and return
    /// the VC it is buffered in.
    fn accept_flit(&self, port: usize, flit: &Flit) -> Result<usize, SimError> {
        let mut ports = self.ports.borrow_mut();
        let state = &mut ports[port];
        let now = self.context.now();

        if let Some(expected) = state.expected_time {
            if now != expected {
                return invariant_error!(self.context, self.entity ;
                    "{flit} on port {port} at {now}, expected back-to-back at {expected}");
            }
        }
        state.expected_time = if flit.is_tail() {
            None
        } else {
            Some(self.context.future_cycle(ClockDomain::Channel, 1))
        };

        if flit.is_head() {
            if let Some(current) = &state.expected_packet {
                return invariant_error!(self.context, self.entity ;
                    "{flit} on port {port} interrupts {current}");
            }
            state.expected_packet = Some(flit.packet().clone());
            state.vc = Some(flit.vc());
        } else {
            match &state.expected_packet {
                Some(current) if Rc::ptr_eq(current, flit.packet()) => {}
                _ => {
                    return invariant_error!(self.context, self.entity ;
                        "{flit} on port {port} does not continue the arriving packet");
                }
            }
        }
        if flit.is_tail() {
            state.expected_packet = None;
        }

        // Later flits may have been moved to another VC by a transfer that
        // happened before they arrived
        match state.vc {
            Some(vc) if vc < self.num_vcs => Ok(vc),
            Some(vc) => invariant_error!(self.context, self.entity ;
                "{flit} on port {port} uses vc {vc} of {}", self.num_vcs),
            None => invariant_error!(self.context, self.entity ;
                "{flit} on port {port} has no assigned vc"),
        }
    }
}

impl ChannelEndpoint for Router {
    fn receive_flit(&self, port: usize, flit: Flit) -> SimResult {
        self.check_port(port)?;
        let vc = self.accept_flit(port, &flit)?;

        let mut counters = self.counters.get();
        if flit.is_head() {
            flit.packet().increment_hop_count();
            counters.packets_received += 1;
        }
        counters.flits_received += 1;
        self.counters.set(counters);

        trace!(self.entity ; "port {port} vc {vc} receives {flit}");
        self.input_queues[vc_index(port, vc, self.num_vcs)].receive_flit(flit)
    }

    fn receive_credit(&self, port: usize, mut credit: Credit) -> SimResult {
        self.check_port(port)?;
        trace!(self.entity ; "port {port} receives {credit}");
        while let Some(vc) = credit.get_num() {
            if vc >= self.num_vcs {
                return invariant_error!(self.context, self.entity ;
                    "credit on port {port} for vc {vc} beyond {} vcs", self.num_vcs);
            }
            self.output_schedulers[port].increment_credit(vc_index(port, vc, self.num_vcs))?;
        }
        Ok(())
    }
}

impl Component for Router {
    fn process_event(&self, event: Box<dyn Any>, kind: u32) -> SimResult {
        let packet = downcast_event::<Rc<Packet>>(event, kind)?;
        match self.output_queues.get(kind as usize) {
            Some(queue) => queue.receive_packet(packet),
            None => sim_error!("{}: no output queue {kind}", self.entity),
        }
    }
}
