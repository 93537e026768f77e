// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Arbitration policies.

pub mod random;
pub mod round_robin;
pub mod weighted_round_robin;
