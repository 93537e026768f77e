// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Unbounded per-VC buffer after the router's transfer stage.
//!
//! Each flit waits for a grant from the port's output crossbar scheduler,
//! which only grants when the downstream buffer has credit. When granted the
//! flit leaves through the output crossbar and its congestion status credit
//! is returned.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::invariant_error;
use flitsim_engine::types::{SimError, SimResult};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::{enter, exit, trace};

use crate::congestion_status::CongestionStatus;
use crate::crossbar::Crossbar;
use crate::crossbar_scheduler::{CrossbarScheduler, CrossbarSchedulerClient};
use crate::types::{Flit, Packet};

#[derive(EntityDisplay)]
pub struct OutputQueue {
    pub entity: Rc<Entity>,
    context: SimContext,
    port: usize,
    vc: usize,

    /// Flat `(port, vc)` index of this queue.
    vc_idx: usize,

    scheduler: Rc<CrossbarScheduler>,
    crossbar: Rc<Crossbar>,
    congestion_status: Rc<CongestionStatus>,

    buffer: RefCell<VecDeque<Flit>>,
}

impl OutputQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        port: usize,
        vc: usize,
        vc_idx: usize,
        scheduler: &Rc<CrossbarScheduler>,
        crossbar: &Rc<Crossbar>,
        congestion_status: &Rc<CongestionStatus>,
    ) -> Result<Rc<Self>, SimError> {
        let queue = Rc::new(Self {
            entity: Rc::new(Entity::new(parent, name)),
            context: context.clone(),
            port,
            vc,
            vc_idx,
            scheduler: scheduler.clone(),
            crossbar: crossbar.clone(),
            congestion_status: congestion_status.clone(),
            buffer: RefCell::new(VecDeque::new()),
        });
        let weak: Weak<OutputQueue> = Rc::downgrade(&queue);
        scheduler.set_client(vc, weak)?;
        Ok(queue)
    }

    /// Accept every flit of a transferred packet.
    pub fn receive_packet(&self, packet: Rc<Packet>) -> SimResult {
        enter!(self.entity ; packet.id);
        let was_empty = self.buffer.borrow().is_empty();
        self.buffer.borrow_mut().extend(packet.flits());
        trace!(self.entity ; "received {packet}, {} flits queued", self.buffer.borrow().len());
        if was_empty {
            self.request_front()?;
        }
        Ok(())
    }

    /// Number of flits waiting.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.buffer.borrow().len()
    }

    fn request_front(&self) -> SimResult {
        let buffer = self.buffer.borrow();
        let Some(flit) = buffer.front() else {
            return Ok(());
        };
        self.scheduler.request(
            self.vc,
            vec![(0, self.vc_idx)],
            flit.packet().num_flits(),
            flit.is_head(),
            flit.is_tail(),
        )
    }
}

impl CrossbarSchedulerClient for OutputQueue {
    fn crossbar_scheduler_response(&self, _port: usize, vc: usize) -> SimResult {
        if vc != self.vc_idx {
            return invariant_error!(self.context, self.entity ;
                "port {} vc {} granted vc index {vc}", self.port, self.vc);
        }
        let Some(flit) = self.buffer.borrow_mut().pop_front() else {
            return invariant_error!(self.context, self.entity ;
                "port {} vc {} granted while empty", self.port, self.vc);
        };

        self.congestion_status.increment_credit(self.vc_idx)?;
        if flit.is_tail() {
            exit!(self.entity ; flit.packet().id);
        }
        self.crossbar.inject(self.vc, 0, flit)?;
        self.request_front()
    }
}
