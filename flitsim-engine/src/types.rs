// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;

use crate::time::EventTime;

// Simulation errors

#[macro_export]
/// Build a [`SimError::Model`](crate::types::SimError) from a format string.
macro_rules! sim_error {
    ($($arg:tt)+) => {
        Err($crate::types::SimError::Model(format!($($arg)+)))
    };
}

#[macro_export]
/// Build a [`SimError::Config`](crate::types::SimError) from a format string.
macro_rules! config_error {
    ($($arg:tt)+) => {
        Err($crate::types::SimError::Config(format!($($arg)+)))
    };
}

#[macro_export]
/// Build a [`SimError::Invariant`](crate::types::SimError) stamped with the
/// current time of `context` and the full name of `entity`.
macro_rules! invariant_error {
    ($context:expr, $entity:expr ; $($arg:tt)+) => {
        Err($crate::types::SimError::Invariant {
            time: $context.time(),
            entity: $entity.full_name(),
            msg: format!($($arg)+),
        })
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Clone, Debug, PartialEq)]
pub enum SimError {
    /// General model errors.
    Model(String),

    /// Invalid or missing settings detected while building a model.
    Config(String),

    /// A simulated hardware invariant has been broken.
    ///
    /// The run that raised it is aborted and cannot be resumed.
    Invariant {
        /// Simulation time at which the violation was seen.
        time: EventTime,
        /// Full name of the entity that detected it.
        entity: String,
        /// Description including the offending port/VC.
        msg: String,
    },
}

impl SimError {
    /// True for invariant violations.
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        matches!(self, SimError::Invariant { .. })
    }

    /// True for configuration errors.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, SimError::Config(_))
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::Model(msg) => write!(f, "Error: {msg}"),
            SimError::Config(msg) => write!(f, "Config error: {msg}"),
            SimError::Invariant { time, entity, msg } => {
                write!(f, "Invariant violated at {time} in {entity}: {msg}")
            }
        }
    }
}

impl Error for SimError {}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;
