// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The last stage of an output port: hands flits to the outbound channel.

use std::rc::{Rc, Weak};

use flitsim_engine::sim_error;
use flitsim_engine::types::SimResult;
use flitsim_model_builder::EntityDisplay;
use flitsim_track::entity::Entity;
use flitsim_track::trace;

use crate::crossbar::FlitReceiver;
use crate::router::Router;
use crate::types::Flit;

#[derive(EntityDisplay)]
pub struct Ejector {
    pub entity: Rc<Entity>,
    router: Weak<Router>,
    port: usize,
}

impl Ejector {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, router: Weak<Router>, port: usize) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            router,
            port,
        }
    }
}

impl FlitReceiver for Ejector {
    fn receive_flit(&self, _port: usize, flit: Flit) -> SimResult {
        trace!(self.entity ; "eject {flit}");
        match self.router.upgrade() {
            Some(router) => router.send_flit(self.port, flit),
            None => sim_error!("{}: router dropped", self.entity),
        }
    }
}
