// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Credit accounting used to estimate how congested an output VC is.
//!
//! One credit slot is kept per `(port, vc)` using
//! [`vc_index`](crate::types::vc_index). Routing reductions query the
//! [`status`](CongestionStatus::status) of an output to choose between
//! candidates.

use std::cell::RefCell;
use std::rc::Rc;

use flitsim_engine::context::SimContext;
use flitsim_engine::types::SimResult;
use flitsim_engine::{config_error, invariant_error};
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::{trace, value};

use crate::settings::{CongestionMode, CongestionStatusSettings, CongestionStyle};
use crate::types::{UNBOUNDED_CREDITS, vc_index};

#[derive(EntityDisplay)]
pub struct CongestionStatus {
    pub entity: Rc<Entity>,
    context: SimContext,
    num_ports: usize,
    num_vcs: usize,
    style: CongestionStyle,
    mode: CongestionMode,
    credits: RefCell<Vec<u32>>,
    max_credits: RefCell<Vec<u32>>,
}

impl CongestionStatus {
    #[must_use]
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        context: &SimContext,
        num_ports: usize,
        num_vcs: usize,
        settings: &CongestionStatusSettings,
    ) -> Self {
        let num_slots = num_ports * num_vcs;
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            context: context.clone(),
            num_ports,
            num_vcs,
            style: settings.style,
            mode: settings.mode,
            credits: RefCell::new(vec![0; num_slots]),
            max_credits: RefCell::new(vec![0; num_slots]),
        }
    }

    #[must_use]
    pub fn style(&self) -> CongestionStyle {
        self.style
    }

    #[must_use]
    pub fn mode(&self) -> CongestionMode {
        self.mode
    }

    /// Set both the current and the maximum credits of a slot.
    pub fn init_credits(&self, vc_idx: usize, max: u32) -> SimResult {
        self.check_slot(vc_idx)?;
        if max == UNBOUNDED_CREDITS && self.style == CongestionStyle::Relative {
            return config_error!(
                "{}: relative congestion status needs finite credits (slot {vc_idx})",
                self.entity
            );
        }
        if max == 0 {
            return config_error!("{}: slot {vc_idx} initialised with no credits", self.entity);
        }
        self.credits.borrow_mut()[vc_idx] = max;
        self.max_credits.borrow_mut()[vc_idx] = max;
        Ok(())
    }

    /// Return one credit to a slot.
    ///
    /// Credits never rise above the initialised maximum.
    pub fn increment_credit(&self, vc_idx: usize) -> SimResult {
        self.check_slot(vc_idx)?;
        let max = self.max_credits.borrow()[vc_idx];
        let mut credits = self.credits.borrow_mut();
        if credits[vc_idx] < max {
            credits[vc_idx] += 1;
        } else {
            trace!(self.entity ; "slot {vc_idx} already at {max} credits");
        }
        value!(self.entity ; max - credits[vc_idx]);
        Ok(())
    }

    /// Consume one credit of a slot.
    pub fn decrement_credit(&self, vc_idx: usize) -> SimResult {
        self.check_slot(vc_idx)?;
        let mut credits = self.credits.borrow_mut();
        if credits[vc_idx] == 0 {
            return invariant_error!(self.context, self.entity ;
                "credit underflow on port {} vc {}",
                vc_idx / self.num_vcs, vc_idx % self.num_vcs);
        }
        credits[vc_idx] -= 1;
        value!(self.entity ; self.max_credits.borrow()[vc_idx] - credits[vc_idx]);
        Ok(())
    }

    /// Current credits of a slot.
    #[must_use]
    pub fn credits(&self, vc_idx: usize) -> Option<u32> {
        self.credits.borrow().get(vc_idx).copied()
    }

    /// Congestion of an output as seen from an input.
    ///
    /// In `Absolute` style this is the number of occupied slots, in
    /// `Relative` style the occupied fraction in `[0, 1]`.
    #[must_use]
    pub fn status(
        &self,
        _input_port: usize,
        _input_vc: usize,
        output_port: usize,
        output_vc: usize,
    ) -> f64 {
        match self.mode {
            CongestionMode::Vc => {
                self.slot_status(vc_index(output_port, output_vc, self.num_vcs))
            }
            CongestionMode::Port => {
                let total: f64 = (0..self.num_vcs)
                    .map(|vc| self.slot_status(vc_index(output_port, vc, self.num_vcs)))
                    .sum();
                total / self.num_vcs as f64
            }
        }
    }

    fn slot_status(&self, vc_idx: usize) -> f64 {
        let max = self.max_credits.borrow()[vc_idx];
        let occupied = max - self.credits.borrow()[vc_idx];
        match self.style {
            CongestionStyle::Absolute => f64::from(occupied),
            CongestionStyle::Relative => {
                if max == 0 {
                    0.0
                } else {
                    f64::from(occupied) / f64::from(max)
                }
            }
        }
    }

    fn check_slot(&self, vc_idx: usize) -> SimResult {
        if vc_idx >= self.num_ports * self.num_vcs {
            return invariant_error!(self.context, self.entity ;
                "slot {vc_idx} out of range for {} ports x {} vcs", self.num_ports, self.num_vcs);
        }
        Ok(())
    }
}
