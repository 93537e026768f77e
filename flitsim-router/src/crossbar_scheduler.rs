// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Switch allocation.
//!
//! A crossbar scheduler matches requesting clients to crossbar ports once
//! per cycle of its clock domain. Matching is separable and iterative in
//! the style of iSLIP:
//!
//!  1. every unmatched crossbar port offers itself to one eligible client,
//!     chosen by that port's grant arbiter,
//!  2. every client accepts at most one offer, chosen by its accept arbiter,
//!  3. matched ports and clients drop out and the next iteration starts.
//!
//! Arbiter priorities only advance for matches made in the first iteration,
//! which keeps round-robin arbitration starvation free.
//!
//! A request names candidate `(crossbar_port, vc)` pairs where `vc` is a
//! global [`vc_index`](crate::types::vc_index). Credits are kept for the
//! `total_vcs` VCs starting at `global_vc_offset`; a candidate is only
//! eligible while its VC has enough credit.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::time::{ClockDomain, EPSILON_ALLOCATE};
use flitsim_engine::traits::Component;
use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{invariant_error, sim_error};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::{debug, trace};
use itertools::Itertools;

use crate::arbiter::{Arbitrate, create_arbiter};
use crate::settings::{CrossbarSchedulerSettings, FlowControl};
use crate::types::UNBOUNDED_CREDITS;

/// Implemented by anything that requests a crossbar scheduler.
pub trait CrossbarSchedulerClient {
    /// Called when a request is granted `port` using global VC `vc`.
    ///
    /// The request is consumed; a client with more to send must request
    /// again.
    fn crossbar_scheduler_response(&self, port: usize, vc: usize) -> SimResult;
}

struct Request {
    candidates: Vec<(usize, usize)>,
    packet_flits: usize,
    head: bool,
    tail: bool,
}

/// The outcome of one match.
struct Grant {
    client: usize,
    port: usize,
    vc: usize,
}

#[derive(EntityDisplay)]
pub struct CrossbarScheduler {
    pub entity: Rc<Entity>,
    context: SimContext,
    self_ref: Weak<CrossbarScheduler>,

    num_clients: usize,
    total_vcs: usize,
    crossbar_ports: usize,
    global_vc_offset: usize,
    clock: ClockDomain,

    flow_control: FlowControl,
    packet_lock: bool,
    iterations: usize,

    clients: RefCell<Vec<Option<Weak<dyn CrossbarSchedulerClient>>>>,
    requests: RefCell<Vec<Option<Request>>>,
    credits: RefCell<Vec<u32>>,
    max_credits: RefCell<Vec<u32>>,

    grant_arbiters: RefCell<Vec<Box<dyn Arbitrate>>>,
    accept_arbiters: RefCell<Vec<Box<dyn Arbitrate>>>,

    /// Client holding each crossbar port between head and tail.
    port_locks: RefCell<Vec<Option<usize>>>,

    run_pending: Cell<bool>,
    last_run: Cell<Option<u64>>,
}

impl CrossbarScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        num_clients: usize,
        total_vcs: usize,
        crossbar_ports: usize,
        global_vc_offset: usize,
        clock: ClockDomain,
        settings: &CrossbarSchedulerSettings,
    ) -> Result<Rc<Self>, SimError> {
        settings.validate()?;

        let grant_arbiters = (0..crossbar_ports)
            .map(|port| create_arbiter(&settings.arbiter, num_clients, true, port as u64))
            .collect::<Result<Vec<_>, SimError>>()?;
        let accept_arbiters = (0..num_clients)
            .map(|client| {
                create_arbiter(
                    &settings.arbiter,
                    crossbar_ports,
                    false,
                    (crossbar_ports + client) as u64,
                )
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        let entity = Rc::new(Entity::new(parent, name));
        Ok(Rc::new_cyclic(|self_ref| Self {
            entity,
            context: context.clone(),
            self_ref: self_ref.clone(),
            num_clients,
            total_vcs,
            crossbar_ports,
            global_vc_offset,
            clock,
            flow_control: settings.flow_control,
            packet_lock: settings.packet_lock,
            iterations: settings.iterations,
            clients: RefCell::new(vec![None; num_clients]),
            requests: RefCell::new((0..num_clients).map(|_| None).collect()),
            credits: RefCell::new(vec![0; total_vcs]),
            max_credits: RefCell::new(vec![0; total_vcs]),
            grant_arbiters: RefCell::new(grant_arbiters),
            accept_arbiters: RefCell::new(accept_arbiters),
            port_locks: RefCell::new(vec![None; crossbar_ports]),
            run_pending: Cell::new(false),
            last_run: Cell::new(None),
        }))
    }

    /// Bind the object that is told about the grants of `client`.
    pub fn set_client(
        &self,
        client: usize,
        handler: Weak<dyn CrossbarSchedulerClient>,
    ) -> SimResult {
        let mut clients = self.clients.borrow_mut();
        match clients.get_mut(client) {
            None => sim_error!("{}: no client {client}", self.entity),
            Some(Some(_)) => sim_error!("{}: client {client} already bound", self.entity),
            Some(slot) => {
                *slot = Some(handler);
                Ok(())
            }
        }
    }

    /// Set the starting (and maximum) credits of global VC `vc`.
    pub fn init_credits(&self, vc: usize, credits: u32) -> SimResult {
        let local = self.local_vc(vc)?;
        self.credits.borrow_mut()[local] = credits;
        self.max_credits.borrow_mut()[local] = credits;
        Ok(())
    }

    /// Return one credit to global VC `vc`.
    pub fn increment_credit(&self, vc: usize) -> SimResult {
        let local = self.local_vc(vc)?;
        {
            let mut credits = self.credits.borrow_mut();
            if credits[local] == UNBOUNDED_CREDITS {
                return Ok(());
            }
            if credits[local] >= self.max_credits.borrow()[local] {
                return invariant_error!(self.context, self.entity ;
                    "credit overflow on vc {vc} (max {})", self.max_credits.borrow()[local]);
            }
            credits[local] += 1;
            trace!(self.entity ; "vc {vc} credits {}", credits[local]);
        }

        if self.has_requests() {
            self.schedule_run()?;
        }
        Ok(())
    }

    /// Current credits of global VC `vc`, `None` if this scheduler does not
    /// serve it.
    #[must_use]
    pub fn credits(&self, vc: usize) -> Option<u32> {
        let local = vc.checked_sub(self.global_vc_offset)?;
        self.credits.borrow().get(local).copied()
    }

    /// Ask for one of `candidates`.
    ///
    /// `packet_flits`, `head` and `tail` describe the flit the request is
    /// made for and drive the packet-level flow control and locking.
    pub fn request(
        &self,
        client: usize,
        candidates: Vec<(usize, usize)>,
        packet_flits: usize,
        head: bool,
        tail: bool,
    ) -> SimResult {
        if client >= self.num_clients {
            return invariant_error!(self.context, self.entity ;
                "request from unknown client {client}");
        }
        if candidates.is_empty() {
            return invariant_error!(self.context, self.entity ;
                "client {client} made a request without candidates");
        }
        for &(port, vc) in &candidates {
            if port >= self.crossbar_ports {
                return invariant_error!(self.context, self.entity ;
                    "client {client} requested crossbar port {port}");
            }
            self.local_vc(vc)?;
        }

        {
            let mut requests = self.requests.borrow_mut();
            if requests[client].is_some() {
                return invariant_error!(self.context, self.entity ;
                    "client {client} already has a request");
            }
            trace!(self.entity ; "client {client} requests {}",
                candidates.iter().map(|(p, vc)| format!("{p}/{vc}")).join(", "));
            requests[client] = Some(Request {
                candidates,
                packet_flits,
                head,
                tail,
            });
        }
        self.schedule_run()
    }

    /// True if `client` has a request waiting for a grant.
    #[must_use]
    pub fn has_request(&self, client: usize) -> bool {
        self.requests.borrow()[client].is_some()
    }

    fn has_requests(&self) -> bool {
        self.requests.borrow().iter().any(Option::is_some)
    }

    fn local_vc(&self, vc: usize) -> Result<usize, SimError> {
        if vc < self.global_vc_offset || vc >= self.global_vc_offset + self.total_vcs {
            return invariant_error!(self.context, self.entity ;
                "vc {vc} outside {}..{}", self.global_vc_offset,
                self.global_vc_offset + self.total_vcs);
        }
        Ok(vc - self.global_vc_offset)
    }

    /// Make sure an allocation runs on the next edge of the clock that has
    /// not already had one.
    fn schedule_run(&self) -> SimResult {
        if self.run_pending.get() {
            return Ok(());
        }
        let mut tick = self.context.next_edge(self.clock);
        if let Some(last) = self.last_run.get() {
            if tick <= last {
                tick = last + self.context.cycle_time(self.clock);
            }
        }
        self.run_pending.set(true);
        self.context
            .schedule(self.self_ref.clone(), tick, EPSILON_ALLOCATE, Box::new(()), 0)
    }

    /// First VC of `request` on `port` with enough credit, if any.
    fn eligible_vc(
        &self,
        request: &Request,
        client: usize,
        port: usize,
        credits: &[u32],
        locks: &[Option<usize>],
    ) -> Option<usize> {
        if self.packet_lock && locks[port].is_some_and(|owner| owner != client) {
            return None;
        }
        let needed = match self.flow_control {
            FlowControl::PacketBuffer if request.head => request.packet_flits,
            _ => 1,
        };
        request
            .candidates
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, vc)| *vc)
            .find(|vc| {
                let available = credits[vc - self.global_vc_offset];
                available == UNBOUNDED_CREDITS || available as usize >= needed
            })
    }

    fn allocate(&self) -> Vec<Grant> {
        let mut requests = self.requests.borrow_mut();
        let mut credits = self.credits.borrow_mut();
        let mut locks = self.port_locks.borrow_mut();
        let mut grant_arbiters = self.grant_arbiters.borrow_mut();
        let mut accept_arbiters = self.accept_arbiters.borrow_mut();

        let mut client_matched = vec![false; self.num_clients];
        let mut port_matched = vec![false; self.crossbar_ports];
        let mut grants = Vec::new();

        for iteration in 0..self.iterations {
            // Grant: each free port offers itself to one eligible client
            let mut offers = vec![None; self.crossbar_ports];
            for (port, offer) in offers.iter_mut().enumerate() {
                if port_matched[port] {
                    continue;
                }
                let eligible: Vec<bool> = (0..self.num_clients)
                    .map(|client| {
                        !client_matched[client]
                            && requests[client].as_ref().is_some_and(|request| {
                                self.eligible_vc(request, client, port, &credits, &locks)
                                    .is_some()
                            })
                    })
                    .collect();
                *offer = grant_arbiters[port].select(&self.entity, &eligible);
            }

            // Accept: each client takes at most one offer
            let mut matched = false;
            for client in 0..self.num_clients {
                if client_matched[client] {
                    continue;
                }
                let offered: Vec<bool> = offers.iter().map(|o| *o == Some(client)).collect();
                let Some(port) = accept_arbiters[client].select(&self.entity, &offered) else {
                    continue;
                };
                let Some(request) = requests[client].take() else {
                    continue;
                };
                let Some(vc) = self.eligible_vc(&request, client, port, &credits, &locks) else {
                    requests[client] = Some(request);
                    continue;
                };

                if iteration == 0 {
                    grant_arbiters[port].granted(client);
                    accept_arbiters[client].granted(port);
                }

                let local = vc - self.global_vc_offset;
                if credits[local] != UNBOUNDED_CREDITS {
                    credits[local] -= 1;
                }
                if self.packet_lock {
                    locks[port] = if request.tail { None } else { Some(client) };
                }

                debug!(self.entity ; "grant client {client} port {port} vc {vc}");
                client_matched[client] = true;
                port_matched[port] = true;
                matched = true;
                grants.push(Grant { client, port, vc });
            }

            if !matched {
                break;
            }
        }
        grants
    }
}

impl Component for CrossbarScheduler {
    fn process_event(&self, _event: Box<dyn Any>, _kind: u32) -> SimResult {
        self.run_pending.set(false);
        self.last_run.set(Some(self.context.now()));

        let grants = self.allocate();
        let granted_any = !grants.is_empty();

        for grant in grants {
            let client = self.clients.borrow()[grant.client]
                .as_ref()
                .and_then(Weak::upgrade);
            match client {
                Some(client) => client.crossbar_scheduler_response(grant.port, grant.vc)?,
                None => return sim_error!("{}: client {} is not bound", self.entity, grant.client),
            }
        }

        // Without a grant nothing can change until a credit or a new request
        // arrives, both of which schedule another run.
        if granted_any && self.has_requests() {
            self.schedule_run()?;
        }
        Ok(())
    }
}
