// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! This module represents the time during a simulation.
//!
//! Time is made up of a tick count and an epsilon. Events at the same tick
//! run in ascending epsilon order. The router models use the epsilons as:
//!
//!  - [`EPSILON_DELIVER`]: channel delivery of flits and credits.
//!  - [`EPSILON_PIPELINE`]: routing responses, queue pipelines, arrivals at
//!    output queues and crossbar outputs.
//!  - [`EPSILON_ALLOCATE`]: crossbar scheduling and the transfers it grants.

use std::fmt;

/// Number of distinct epsilon values within a tick.
pub const NUM_EPSILONS: u8 = 3;

/// Epsilon used for channel deliveries.
pub const EPSILON_DELIVER: u8 = 0;

/// Epsilon used for pipeline stages and arrivals.
pub const EPSILON_PIPELINE: u8 = 1;

/// Epsilon used for switch allocation and packet transfer.
pub const EPSILON_ALLOCATE: u8 = 2;

/// The named clock domains of a simulation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ClockDomain {
    /// The router core pipeline clock.
    Core,
    /// The clock of the channels between routers and terminals.
    Channel,
}

impl fmt::Display for ClockDomain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClockDomain::Core => write!(f, "core"),
            ClockDomain::Channel => write!(f, "channel"),
        }
    }
}

/// A point in simulated time.
///
/// The derived ordering compares `tick` first and then `epsilon`.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EventTime {
    /// Simulation tick.
    pub tick: u64,

    /// Sub-tick ordering.
    pub epsilon: u8,
}

impl EventTime {
    #[must_use]
    pub fn new(tick: u64, epsilon: u8) -> Self {
        Self { tick, epsilon }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.tick, self.epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        assert!(EventTime::new(1, 2) < EventTime::new(2, 0));
        assert!(EventTime::new(2, 0) < EventTime::new(2, 1));
        assert_eq!(EventTime::new(3, 1), EventTime::new(3, 1));
        assert_eq!(format!("{}", EventTime::new(7, 2)), "7.2");
    }
}
