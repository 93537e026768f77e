// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A network endpoint that injects and sinks packets.
//!
//! A terminal sends the flits of each packet back-to-back, one per channel
//! cycle, once the downstream input VC has credit for the whole packet. It
//! records every flit it receives and normally returns the credit at once;
//! credits can be held back to create backpressure and released later.

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
use flitsim_track::{connect, debug, exit, trace};

use crate::channel::{Channel, ChannelEndpoint};
use crate::router::Router;
use crate::settings::ChannelSettings;
use crate::types::{Credit, Flit, Packet};

const INJECT_EVENT: u32 = 0;
const FLUSH_EVENT: u32 = 1;

/// A flit seen by a terminal and the tick it arrived at.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub tick: u64,
    pub flit: Flit,
}

#[derive(EntityDisplay)]
pub struct Terminal {
    pub entity: Rc<Entity>,
    context: SimContext,
    self_ref: Weak<Terminal>,
    id: usize,
    num_vcs: usize,
    credit_size: usize,

    /// Carries flits to the network and credits back.
    output: RefCell<Option<Rc<Channel>>>,

    /// Carries flits from the network and credits back to it.
    input: RefCell<Option<Rc<Channel>>>,

    /// Free downstream buffer slots per VC.
    credits: RefCell<Vec<u32>>,
    max_credits: u32,

    waiting: RefCell<VecDeque<Rc<Packet>>>,

    /// The packet being sent and the index of its next flit.
    sending: RefCell<Option<(Rc<Packet>, usize)>>,
    inject_pending: Cell<bool>,
    last_inject: Cell<Option<u64>>,

    next_tag: Cell<u64>,
    received: RefCell<Vec<Delivery>>,

    hold_credits: Cell<bool>,
    held: RefCell<VecDeque<usize>>,
    flush_pending: Cell<bool>,
}

impl Terminal {
    /// Create terminal `id` with `initial_credits` for every downstream VC.
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        id: usize,
        num_vcs: usize,
        initial_credits: u32,
    ) -> Rc<Self> {
        let entity = Rc::new(Entity::new(parent, name));
        let credit_size =
            num_vcs * context.cycle_ratio(ClockDomain::Channel, ClockDomain::Core) as usize;
        Rc::new_cyclic(|self_ref| Self {
            entity,
            context: context.clone(),
            self_ref: self_ref.clone(),
            id,
            num_vcs,
            credit_size,
            output: RefCell::new(None),
            input: RefCell::new(None),
            credits: RefCell::new(vec![initial_credits; num_vcs]),
            max_credits: initial_credits,
            waiting: RefCell::new(VecDeque::new()),
            sending: RefCell::new(None),
            inject_pending: Cell::new(false),
            last_inject: Cell::new(None),
            next_tag: Cell::new(0),
            received: RefCell::new(Vec::new()),
            hold_credits: Cell::new(false),
            held: RefCell::new(VecDeque::new()),
            flush_pending: Cell::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Bind the channel this terminal sends on.
    pub fn set_output_channel(&self, channel: &Rc<Channel>) -> SimResult {
        if self.output.borrow().is_some() {
            return sim_error!("{}: output channel already set", self.entity);
        }
        let endpoint: Weak<dyn ChannelEndpoint> = self.self_ref.clone();
        channel.set_source(endpoint, 0)?;
        *self.output.borrow_mut() = Some(channel.clone());
        Ok(())
    }

    /// Bind the channel this terminal receives from.
    pub fn set_input_channel(&self, channel: &Rc<Channel>) -> SimResult {
        if self.input.borrow().is_some() {
            return sim_error!("{}: input channel already set", self.entity);
        }
        let endpoint: Weak<dyn ChannelEndpoint> = self.self_ref.clone();
        channel.set_sink(endpoint, 0)?;
        *self.input.borrow_mut() = Some(channel.clone());
        Ok(())
    }

    /// Queue a packet of `num_flits` flits on `vc` for terminal
    /// `destination`.
    pub fn send_packet(
        &self,
        destination: usize,
        destination_address: Vec<usize>,
        num_flits: usize,
        vc: usize,
    ) -> Result<Rc<Packet>, SimError> {
        if vc >= self.num_vcs {
            return sim_error!("{}: no vc {vc}", self.entity);
        }
        let tag = self.next_tag.get();
        self.next_tag.set(tag + 1);

        let packet = Packet::new(
            &self.entity,
            tag,
            self.id,
            destination,
            destination_address,
            num_flits,
            vc,
            self.context.now(),
        )?;
        debug!(self.entity ; "queue {packet} on vc {vc}");
        self.waiting.borrow_mut().push_back(packet.clone());
        self.schedule_inject()?;
        Ok(packet)
    }

    /// Credits available for downstream `vc`.
    #[must_use]
    pub fn credits(&self, vc: usize) -> Option<u32> {
        self.credits.borrow().get(vc).copied()
    }

    /// Every flit received so far in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<Delivery> {
        self.received.borrow().clone()
    }

    #[must_use]
    pub fn num_received(&self) -> usize {
        self.received.borrow().len()
    }

    /// Keep the credits of received flits instead of returning them.
    pub fn hold_credits(&self) {
        self.hold_credits.set(true);
    }

    /// Stop holding credits and return all that were held.
    ///
    /// At most one credit message is sent per channel cycle so a large
    /// backlog is spread over several cycles.
    pub fn release_credits(&self) -> SimResult {
        self.hold_credits.set(false);
        self.flush_held()
    }

    fn input_channel(&self) -> Result<Rc<Channel>, SimError> {
        match &*self.input.borrow() {
            Some(channel) => Ok(channel.clone()),
            None => sim_error!("{}: no input channel", self.entity),
        }
    }

    fn output_channel(&self) -> Result<Rc<Channel>, SimError> {
        match &*self.output.borrow() {
            Some(channel) => Ok(channel.clone()),
            None => sim_error!("{}: no output channel", self.entity),
        }
    }

    /// Move held credits into this cycle's credit message until it is full.
    fn flush_held(&self) -> SimResult {
        let channel = self.input_channel()?;
        let staged = channel.get_next_credit();
        let mut credit = match &staged {
            Some(credit) => credit.borrow().clone(),
            None => Credit::new(self.credit_size),
        };
        let before = credit.len();
        {
            let mut held = self.held.borrow_mut();
            while !credit.is_full() {
                let Some(vc) = held.pop_front() else {
                    break;
                };
                credit.put_num(vc)?;
            }
        }

        if credit.len() > before {
            trace!(self.entity ; "return {credit}");
            match staged {
                Some(staged) => *staged.borrow_mut() = credit,
                None => channel.set_next_credit(credit)?,
            }
        }

        if !self.held.borrow().is_empty() && !self.flush_pending.get() {
            self.flush_pending.set(true);
            let tick = self.context.future_cycle(ClockDomain::Channel, 1);
            self.context.schedule(
                self.self_ref.clone(),
                tick,
                EPSILON_PIPELINE,
                Box::new(()),
                FLUSH_EVENT,
            )?;
        }
        Ok(())
    }

    fn schedule_inject(&self) -> SimResult {
        if self.inject_pending.get() {
            return Ok(());
        }
        let mut tick = self.context.next_edge(ClockDomain::Channel);
        if let Some(last) = self.last_inject.get() {
            tick = tick.max(last + self.context.cycle_time(ClockDomain::Channel));
        }
        self.inject_pending.set(true);
        self.context.schedule(
            self.self_ref.clone(),
            tick,
            EPSILON_PIPELINE,
            Box::new(()),
            INJECT_EVENT,
        )
    }

    /// Start the next waiting packet if its VC has room for all of it.
    fn start_next_packet(&self) -> bool {
        let mut waiting = self.waiting.borrow_mut();
        let Some(packet) = waiting.front() else {
            return false;
        };
        let vc = packet.flit(0).vc();
        let needed = packet.num_flits() as u32;
        let mut credits = self.credits.borrow_mut();
        if credits[vc] < needed {
            trace!(self.entity ; "{packet} waits for {needed} credits on vc {vc}");
            return false;
        }
        credits[vc] -= needed;
        let packet = waiting.pop_front();
        *self.sending.borrow_mut() = packet.map(|packet| (packet, 0));
        true
    }

    fn inject(&self) -> SimResult {
        self.inject_pending.set(false);
        if self.sending.borrow().is_none() && !self.start_next_packet() {
            return Ok(());
        }

        let Some((packet, index)) = self.sending.borrow_mut().take() else {
            return Ok(());
        };
        let flit = packet.flit(index);
        if index + 1 < packet.num_flits() {
            *self.sending.borrow_mut() = Some((packet.clone(), index + 1));
        }

        self.last_inject.set(Some(self.context.now()));
        self.output_channel()?.set_next_flit(flit)?;

        if self.sending.borrow().is_some() || !self.waiting.borrow().is_empty() {
            self.schedule_inject()?;
        }
        Ok(())
    }
}

impl ChannelEndpoint for Terminal {
    fn receive_flit(&self, _port: usize, flit: Flit) -> SimResult {
        let packet = flit.packet();
        if packet.destination() != self.id {
            return invariant_error!(self.context, self.entity ;
                "{flit} for terminal {} delivered to terminal {}", packet.destination(), self.id);
        }

        trace!(self.entity ; "receive {flit}");
        if flit.is_tail() {
            exit!(self.entity ; packet.id);
        }
        let vc = flit.vc();
        self.received.borrow_mut().push(Delivery {
            tick: self.context.now(),
            flit,
        });

        self.held.borrow_mut().push_back(vc);
        if self.hold_credits.get() {
            Ok(())
        } else {
            self.flush_held()
        }
    }

    fn receive_credit(&self, _port: usize, mut credit: Credit) -> SimResult {
        trace!(self.entity ; "receive {credit}");
        {
            let mut credits = self.credits.borrow_mut();
            while let Some(vc) = credit.get_num() {
                match credits.get_mut(vc) {
                    Some(count) if *count >= self.max_credits => {
                        return invariant_error!(self.context, self.entity ;
                            "credit overflow on vc {vc} (max {})", self.max_credits);
                    }
                    Some(count) => *count += 1,
                    None => {
                        return invariant_error!(self.context, self.entity ;
                            "credit for vc {vc} beyond {} vcs", self.num_vcs);
                    }
                }
            }
        }
        if self.sending.borrow().is_none() && !self.waiting.borrow().is_empty() {
            self.schedule_inject()?;
        }
        Ok(())
    }
}

impl Component for Terminal {
    fn process_event(&self, _event: Box<dyn Any>, kind: u32) -> SimResult {
        match kind {
            INJECT_EVENT => self.inject(),
            FLUSH_EVENT => {
                self.flush_pending.set(false);
                if self.hold_credits.get() {
                    return Ok(());
                }
                self.flush_held()
            }
            _ => sim_error!("{}: unknown event kind {kind}", self.entity),
        }
    }
}

/// Attach `terminal` to `port` of `router` with a channel in each
/// direction.
pub fn connect_terminal(
    router: &Rc<Router>,
    port: usize,
    terminal: &Rc<Terminal>,
    context: &SimContext,
    settings: &ChannelSettings,
) -> SimResult {
    let to_router = Channel::new(
        &terminal.entity,
        &format!("to_{}_{port}", router.entity.name),
        context,
        settings,
    )?;
    terminal.set_output_channel(&to_router)?;
    router.set_input_channel(port, &to_router)?;

    let from_router = Channel::new(
        &router.entity,
        &format!("to_{}", terminal.entity.name),
        context,
        settings,
    )?;
    router.set_output_channel(port, &from_router)?;
    terminal.set_input_channel(&from_router)?;

    connect!(terminal.entity ; router.entity);
    connect!(router.entity ; terminal.entity);
    Ok(())
}
