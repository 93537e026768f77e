// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A point-to-point link between two endpoints.
//!
//! A channel carries flits from its source to its sink and credits from its
//! sink back to its source. In every cycle of the channel clock it carries
//! at most one flit and one credit message; staging a second one in the
//! same cycle is an invariant violation.
//!
//! A credit staged in a cycle can still have VCs added until the end of that
//! cycle so that the credits freed by a faster core clock are coalesced into
//! one message. Everything staged in cycle `c` is delivered at the start of
//! cycle `c + latency`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::time::{ClockDomain, EPSILON_DELIVER};
use flitsim_engine::traits::{Component, downcast_event};
use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{config_error, invariant_error, sim_error};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::settings::ChannelSettings;
use crate::types::{Credit, Flit};

const FLIT_EVENT: u32 = 0;
const CREDIT_EVENT: u32 = 1;

/// Something that can sit at either end of a channel.
pub trait ChannelEndpoint {
    /// A flit has arrived at the sink.
    fn receive_flit(&self, port: usize, flit: Flit) -> SimResult;

    /// A credit message has arrived back at the source.
    fn receive_credit(&self, port: usize, credit: Credit) -> SimResult;
}

type Binding = Option<(Weak<dyn ChannelEndpoint>, usize)>;

#[derive(EntityDisplay)]
pub struct Channel {
    pub entity: Rc<Entity>,
    context: SimContext,
    self_ref: Weak<Channel>,
    latency: u64,

    source: RefCell<Binding>,
    sink: RefCell<Binding>,

    /// The flit staged and the channel cycle it was staged in.
    next_flit: RefCell<Option<(u64, Flit)>>,

    /// The credit staged and the channel cycle it was staged in.
    next_credit: RefCell<Option<(u64, Rc<RefCell<Credit>>)>>,
}

impl Channel {
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        settings: &ChannelSettings,
    ) -> Result<Rc<Self>, SimError> {
        if settings.latency == 0 {
            return config_error!("channel {name}: latency must be > 0");
        }
        let entity = Rc::new(Entity::new(parent, name));
        Ok(Rc::new_cyclic(|self_ref| Self {
            entity,
            context: context.clone(),
            self_ref: self_ref.clone(),
            latency: settings.latency,
            source: RefCell::new(None),
            sink: RefCell::new(None),
            next_flit: RefCell::new(None),
            next_credit: RefCell::new(None),
        }))
    }

    /// Latency in channel cycles.
    #[must_use]
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Bind the endpoint that sends flits and receives credits.
    pub fn set_source(&self, endpoint: Weak<dyn ChannelEndpoint>, port: usize) -> SimResult {
        Self::bind(&self.entity, &self.source, endpoint, port, "source")
    }

    /// Bind the endpoint that receives flits and sends credits.
    pub fn set_sink(&self, endpoint: Weak<dyn ChannelEndpoint>, port: usize) -> SimResult {
        Self::bind(&self.entity, &self.sink, endpoint, port, "sink")
    }

    fn bind(
        entity: &Rc<Entity>,
        slot: &RefCell<Binding>,
        endpoint: Weak<dyn ChannelEndpoint>,
        port: usize,
        end: &str,
    ) -> SimResult {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return sim_error!("{entity}: {end} already bound");
        }
        *slot = Some((endpoint, port));
        Ok(())
    }

    /// The flit staged during the current channel cycle.
    #[must_use]
    pub fn get_next_flit(&self) -> Option<Flit> {
        let cycle = self.context.cycle(ClockDomain::Channel);
        match &*self.next_flit.borrow() {
            Some((staged, flit)) if *staged == cycle => Some(flit.clone()),
            _ => None,
        }
    }

    /// Stage the flit for the current channel cycle.
    pub fn set_next_flit(&self, flit: Flit) -> SimResult {
        let cycle = self.context.cycle(ClockDomain::Channel);
        if let Some((staged, pending)) = &*self.next_flit.borrow() {
            if *staged == cycle {
                return invariant_error!(self.context, self.entity ;
                    "{flit} staged while {pending} is pending in cycle {cycle}");
            }
        }

        trace!(self.entity ; "send {flit}");
        *self.next_flit.borrow_mut() = Some((cycle, flit.clone()));
        self.schedule_delivery(Box::new(flit), FLIT_EVENT)
    }

    /// The credit staged during the current channel cycle.
    ///
    /// VCs may still be added to it until the cycle ends.
    #[must_use]
    pub fn get_next_credit(&self) -> Option<Rc<RefCell<Credit>>> {
        let cycle = self.context.cycle(ClockDomain::Channel);
        match &*self.next_credit.borrow() {
            Some((staged, credit)) if *staged == cycle => Some(credit.clone()),
            _ => None,
        }
    }

    /// Stage the credit for the current channel cycle.
    pub fn set_next_credit(&self, credit: Credit) -> SimResult {
        let cycle = self.context.cycle(ClockDomain::Channel);
        if self.get_next_credit().is_some() {
            return invariant_error!(self.context, self.entity ;
                "second credit staged in cycle {cycle}");
        }

        let credit = Rc::new(RefCell::new(credit));
        *self.next_credit.borrow_mut() = Some((cycle, credit.clone()));
        self.schedule_delivery(Box::new(credit), CREDIT_EVENT)
    }

    fn schedule_delivery(&self, payload: Box<dyn Any>, kind: u32) -> SimResult {
        let tick = self
            .context
            .future_cycle(ClockDomain::Channel, self.latency);
        self.context
            .schedule(self.self_ref.clone(), tick, EPSILON_DELIVER, payload, kind)
    }

    fn endpoint(
        &self,
        binding: &RefCell<Binding>,
        end: &str,
    ) -> Result<(Rc<dyn ChannelEndpoint>, usize), SimError> {
        let binding = binding.borrow().clone();
        match binding {
            Some((endpoint, port)) => match endpoint.upgrade() {
                Some(endpoint) => Ok((endpoint, port)),
                None => sim_error!("{}: {end} dropped", self.entity),
            },
            None => sim_error!("{}: no {end} bound", self.entity),
        }
    }
}

impl Component for Channel {
    fn process_event(&self, event: Box<dyn Any>, kind: u32) -> SimResult {
        match kind {
            FLIT_EVENT => {
                let flit = downcast_event::<Flit>(event, kind)?;
                let (sink, port) = self.endpoint(&self.sink, "sink")?;
                trace!(self.entity ; "deliver {flit}");
                sink.receive_flit(port, flit)
            }
            CREDIT_EVENT => {
                let credit = downcast_event::<Rc<RefCell<Credit>>>(event, kind)?;
                let credit = credit.borrow().clone();
                let (source, port) = self.endpoint(&self.source, "source")?;
                trace!(self.entity ; "deliver {credit}");
                source.receive_credit(port, credit)
            }
            _ => sim_error!("{}: unknown event kind {kind}", self.entity),
        }
    }
}
