// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Unique identifiers.

/// IDs that should be unique across the simulation.
///
/// Each entity and each tracked object (for example a packet) is given a
/// unique ID so that _trace_ events can refer to it.
#[derive(Copy, Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Id(pub u64);

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `Unique` trait provides access to the [`Id`] of a tracked object.
pub trait Unique {
    /// Return the unique ID of an object.
    fn id(&self) -> Id;
}

impl Unique for Id {
    fn id(&self) -> Id {
        *self
    }
}
