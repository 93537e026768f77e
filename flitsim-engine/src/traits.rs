// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A set of common traits used across flitsim.

use std::any::Any;

use crate::sim_error;
use crate::types::{SimError, SimResult};

/// A simulation object that can be the target of scheduled events.
///
/// Components hold a `Weak` reference to themselves which they pass to
/// [`SimContext::schedule`](crate::context::SimContext::schedule). Events for
/// components that have been dropped are discarded.
pub trait Component {
    /// Handle an event previously scheduled for this component.
    ///
    /// `kind` distinguishes the events of one component and is opaque to the
    /// engine.
    fn process_event(&self, event: Box<dyn Any>, kind: u32) -> SimResult;
}

/// Recover the concrete payload of an event.
pub fn downcast_event<T: 'static>(event: Box<dyn Any>, kind: u32) -> Result<T, SimError> {
    match event.downcast::<T>() {
        Ok(value) => Ok(*value),
        Err(_) => sim_error!(
            "event of kind {kind} does not carry a {}",
            std::any::type_name::<T>()
        ),
    }
}
