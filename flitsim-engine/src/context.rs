// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The simulation context shared by every component.
//!
//! A [`SimContext`] is a cheap handle onto the event queue and the clock
//! domain configuration of one [`Engine`](crate::engine::Engine). It is
//! created once per engine and cloned into each component at construction.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};

use flitsim_track::entity::Entity;

use crate::invariant_error;
use crate::time::{ClockDomain, EventTime, NUM_EPSILONS};
use crate::traits::Component;
use crate::types::SimResult;

/// An event waiting in the queue.
pub(crate) struct ScheduledEvent {
    pub(crate) time: EventTime,

    /// Insertion order, used to keep same-time events first-in first-out.
    seq: u64,

    pub(crate) handler: Weak<dyn Component>,
    pub(crate) payload: Box<dyn Any>,
    pub(crate) kind: u32,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct SimState {
    now: Cell<EventTime>,
    next_seq: Cell<u64>,
    queue: RefCell<BinaryHeap<Reverse<ScheduledEvent>>>,
    core_period: Cell<u64>,
    channel_period: Cell<u64>,
    toplevel: Rc<Entity>,
}

/// Handle used by components to read the time and schedule events.
#[derive(Clone)]
pub struct SimContext {
    state: Rc<SimState>,
}

impl SimContext {
    pub(crate) fn new(toplevel: &Rc<Entity>) -> Self {
        Self {
            state: Rc::new(SimState {
                now: Cell::new(EventTime::default()),
                next_seq: Cell::new(0),
                queue: RefCell::new(BinaryHeap::new()),
                core_period: Cell::new(1),
                channel_period: Cell::new(1),
                toplevel: toplevel.clone(),
            }),
        }
    }

    /// Schedule `payload` to be passed to `handler` at `(tick, epsilon)`.
    ///
    /// Scheduling before the current time or with an epsilon outside
    /// `[0, NUM_EPSILONS)` is an invariant violation.
    pub fn schedule(
        &self,
        handler: Weak<dyn Component>,
        tick: u64,
        epsilon: u8,
        payload: Box<dyn Any>,
        kind: u32,
    ) -> SimResult {
        let time = EventTime::new(tick, epsilon);
        if epsilon >= NUM_EPSILONS {
            return invariant_error!(self, self.state.toplevel ;
                "epsilon {epsilon} out of range (must be < {NUM_EPSILONS})");
        }
        if time < self.time() {
            return invariant_error!(self, self.state.toplevel ;
                "event scheduled in the past at {time}");
        }

        let seq = self.state.next_seq.get();
        self.state.next_seq.set(seq + 1);
        self.state.queue.borrow_mut().push(Reverse(ScheduledEvent {
            time,
            seq,
            handler,
            payload,
            kind,
        }));
        Ok(())
    }

    /// Current time including the epsilon.
    #[must_use]
    pub fn time(&self) -> EventTime {
        self.state.now.get()
    }

    /// Current tick.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.state.now.get().tick
    }

    /// Epsilon of the event being processed.
    #[must_use]
    pub fn epsilon(&self) -> u8 {
        self.state.now.get().epsilon
    }

    /// Period of a clock domain in ticks.
    #[must_use]
    pub fn cycle_time(&self, domain: ClockDomain) -> u64 {
        match domain {
            ClockDomain::Core => self.state.core_period.get(),
            ClockDomain::Channel => self.state.channel_period.get(),
        }
    }

    /// Index of the current cycle of a clock domain.
    #[must_use]
    pub fn cycle(&self, domain: ClockDomain) -> u64 {
        self.now() / self.cycle_time(domain)
    }

    /// Tick of the start of the cycle `cycles` after the current cycle of
    /// `domain`.
    #[must_use]
    pub fn future_cycle(&self, domain: ClockDomain, cycles: u64) -> u64 {
        (self.cycle(domain) + cycles) * self.cycle_time(domain)
    }

    /// The current tick if it is a cycle edge of `domain`, otherwise the next
    /// edge.
    #[must_use]
    pub fn next_edge(&self, domain: ClockDomain) -> u64 {
        if self.now() % self.cycle_time(domain) == 0 {
            self.now()
        } else {
            self.future_cycle(domain, 1)
        }
    }

    /// Number of `fast` cycles per `slow` cycle, rounded up.
    #[must_use]
    pub fn cycle_ratio(&self, slow: ClockDomain, fast: ClockDomain) -> u64 {
        self.cycle_time(slow).div_ceil(self.cycle_time(fast))
    }

    /// Number of events waiting in the queue.
    #[must_use]
    pub fn num_pending(&self) -> usize {
        self.state.queue.borrow().len()
    }

    pub(crate) fn set_cycle_time(&self, domain: ClockDomain, ticks: u64) {
        match domain {
            ClockDomain::Core => self.state.core_period.set(ticks),
            ClockDomain::Channel => self.state.channel_period.set(ticks),
        }
    }

    pub(crate) fn set_time(&self, time: EventTime) {
        self.state.now.set(time);
    }

    pub(crate) fn peek_time(&self) -> Option<EventTime> {
        self.state.queue.borrow().peek().map(|Reverse(e)| e.time)
    }

    pub(crate) fn pop(&self) -> Option<ScheduledEvent> {
        self.state.queue.borrow_mut().pop().map(|Reverse(e)| e)
    }
}
