// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Output-queued router model.
//!
//! A [`Router`](crate::router::Router) owns a fixed grid of
//! `num_ports x num_vcs` input queues, routing algorithms and output queues
//! plus, per port, an output [crossbar scheduler](crate::crossbar_scheduler),
//! a [crossbar](crate::crossbar) and an [ejector](crate::ejector).
//!
//! Flits arrive from [channels](crate::channel), are queued per input VC,
//! routed by a pluggable [routing algorithm](crate::routing), moved as whole
//! packets to the unbounded output queues and sent on when the downstream
//! buffer has credit:
//!
//! ```text
//!  channel -> receive_flit -> input queue -> routing algorithm
//!          -> transfer scheduler -> transfer_packet -> output queue
//!          -> output scheduler -> crossbar -> ejector -> channel
//! ```
//!
//! Credits flow the other way. Every [`SimError::Invariant`] raised by a
//! component aborts the simulation run.
//!
//! [`SimError::Invariant`]: flitsim_engine::types::SimError::Invariant

pub mod arbiter;
pub mod channel;
pub mod congestion_status;
pub mod crossbar;
pub mod crossbar_scheduler;
pub mod ejector;
pub mod input_queue;
pub mod output_queue;
pub mod router;
pub mod routing;
pub mod settings;
pub mod terminal;
pub mod test_helpers;
pub mod types;
