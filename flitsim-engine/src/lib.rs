// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! `flitsim` engine: discrete-event simulation of clocked hardware.
//!
//! The [engine](crate::engine::Engine) owns a single ordered event queue.
//! Components are plain objects implementing
//! [`Component`](crate::traits::Component); they schedule events for
//! themselves through a cloneable [`SimContext`](crate::context::SimContext)
//! and are called back in strict `(tick, epsilon)` order.
//!
//! Time is measured in integer ticks. Named
//! [clock domains](crate::time::ClockDomain) each have a period in ticks so
//! that a router core and the channels between routers can run at
//! different rates while sharing one notion of time.
//!
//! # Simple Application
//!
//! ```rust
//! use std::any::Any;
//! use std::cell::Cell;
//! use std::rc::{Rc, Weak};
//!
//! use flitsim_engine::context::SimContext;
//! use flitsim_engine::engine::Engine;
//! use flitsim_engine::time::ClockDomain;
//! use flitsim_engine::traits::Component;
//! use flitsim_engine::types::SimResult;
//! use flitsim_track::tracker::dev_null_tracker;
//!
//! struct Ticker {
//!     context: SimContext,
//!     self_ref: Weak<Ticker>,
//!     count: Cell<u32>,
//! }
//!
//! impl Component for Ticker {
//!     fn process_event(&self, _event: Box<dyn Any>, _kind: u32) -> SimResult {
//!         self.count.set(self.count.get() + 1);
//!         if self.count.get() < 4 {
//!             let tick = self.context.future_cycle(ClockDomain::Core, 1);
//!             self.context
//!                 .schedule(self.self_ref.clone(), tick, 0, Box::new(()), 0)?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut engine = Engine::new(&dev_null_tracker());
//! let context = engine.context();
//! let ticker = Rc::new_cyclic(|self_ref| Ticker {
//!     context: context.clone(),
//!     self_ref: self_ref.clone(),
//!     count: Cell::new(0),
//! });
//! let handler: Weak<Ticker> = Rc::downgrade(&ticker);
//! context.schedule(handler, 0, 0, Box::new(()), 0).unwrap();
//! engine.run().unwrap();
//! assert_eq!(ticker.count.get(), 4);
//! assert_eq!(engine.time_now(), 3);
//! ```

pub mod context;
pub mod engine;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;
