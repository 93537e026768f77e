// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A crossbar switch.
//!
//! Flits injected at an input appear at the chosen output `latency` cycles
//! later where they are handed to the bound [`FlitReceiver`]. Each output
//! accepts at most one flit per cycle.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::time::{ClockDomain, EPSILON_PIPELINE};
use flitsim_engine::traits::{Component, downcast_event};
use flitsim_engine::types::{SimError, SimResult};
use flitsim_engine::{invariant_error, sim_error};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::settings::CrossbarSettings;
use crate::types::Flit;

/// Anything that can be handed a flit.
pub trait FlitReceiver {
    fn receive_flit(&self, port: usize, flit: Flit) -> SimResult;
}

#[derive(EntityDisplay)]
pub struct Crossbar {
    pub entity: Rc<Entity>,
    context: SimContext,
    self_ref: Weak<Crossbar>,
    num_inputs: usize,
    num_outputs: usize,
    clock: ClockDomain,
    latency: u64,
    receivers: RefCell<Vec<Option<(Weak<dyn FlitReceiver>, usize)>>>,

    /// Cycle in which each output was last used.
    last_cycle: RefCell<Vec<Option<u64>>>,
}

impl Crossbar {
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        num_inputs: usize,
        num_outputs: usize,
        clock: ClockDomain,
        settings: &CrossbarSettings,
    ) -> Result<Rc<Self>, SimError> {
        settings.validate()?;
        let entity = Rc::new(Entity::new(parent, name));
        Ok(Rc::new_cyclic(|self_ref| Self {
            entity,
            context: context.clone(),
            self_ref: self_ref.clone(),
            num_inputs,
            num_outputs,
            clock,
            latency: settings.latency,
            receivers: RefCell::new(vec![None; num_outputs]),
            last_cycle: RefCell::new(vec![None; num_outputs]),
        }))
    }

    /// Bind `output` to `port` of `receiver`.
    pub fn set_receiver(
        &self,
        output: usize,
        receiver: Weak<dyn FlitReceiver>,
        port: usize,
    ) -> SimResult {
        let mut receivers = self.receivers.borrow_mut();
        match receivers.get_mut(output) {
            None => sim_error!("{}: no output {output}", self.entity),
            Some(Some(_)) => sim_error!("{}: output {output} already bound", self.entity),
            Some(slot) => {
                *slot = Some((receiver, port));
                Ok(())
            }
        }
    }

    /// Send `flit` from `input` to `output`.
    pub fn inject(&self, input: usize, output: usize, flit: Flit) -> SimResult {
        if input >= self.num_inputs || output >= self.num_outputs {
            return invariant_error!(self.context, self.entity ;
                "no path from input {input} to output {output}");
        }

        let cycle = self.context.cycle(self.clock);
        {
            let mut last_cycle = self.last_cycle.borrow_mut();
            if last_cycle[output] == Some(cycle) {
                return invariant_error!(self.context, self.entity ;
                    "second flit for output {output} in cycle {cycle}: {flit}");
            }
            last_cycle[output] = Some(cycle);
        }

        trace!(self.entity ; "{input} -> {output}: {flit}");
        let tick = self.context.future_cycle(self.clock, self.latency);
        self.context.schedule(
            self.self_ref.clone(),
            tick,
            EPSILON_PIPELINE,
            Box::new(flit),
            output as u32,
        )
    }
}

impl Component for Crossbar {
    fn process_event(&self, event: Box<dyn Any>, kind: u32) -> SimResult {
        let flit = downcast_event::<Flit>(event, kind)?;
        let output = kind as usize;
        let receiver = self.receivers.borrow()[output].clone();
        match receiver {
            Some((receiver, port)) => match receiver.upgrade() {
                Some(receiver) => receiver.receive_flit(port, flit),
                None => sim_error!("{}: receiver of output {output} dropped", self.entity),
            },
            None => sim_error!("{}: output {output} not bound", self.entity),
        }
    }
}
