// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The engine that runs a simulation.

use std::rc::Rc;

use flitsim_track::entity::{Entity, toplevel};
use flitsim_track::tracker::stdout_tracker;
use flitsim_track::{Tracker, debug, error, set_time};

use crate::config_error;
use crate::context::SimContext;
use crate::time::{ClockDomain, EventTime};
use crate::types::{SimError, SimResult};

pub struct Engine {
    context: SimContext,
    toplevel: Rc<Entity>,
    tracker: Tracker,

    /// The first error seen. Once set the engine refuses to run again.
    failure: Option<SimError>,

    events_processed: u64,
}

impl Engine {
    /// Create a standalone engine.
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let context = SimContext::new(&toplevel);
        Self {
            context,
            toplevel,
            tracker: tracker.clone(),
            failure: None,
            events_processed: 0,
        }
    }

    /// Set the period of a clock domain in ticks.
    ///
    /// Must be called before any component is built as components derive
    /// sizes (for example credit capacities) from the periods.
    pub fn set_cycle_time(&mut self, domain: ClockDomain, ticks: u64) -> SimResult {
        if ticks == 0 {
            return config_error!("cycle time of the {domain} clock must be > 0");
        }
        if self.events_processed > 0 {
            return config_error!("cannot change the {domain} clock once running");
        }
        self.context.set_cycle_time(domain, ticks);
        Ok(())
    }

    /// Run until there are no more events.
    pub fn run(&mut self) -> SimResult {
        self.run_events(None)
    }

    /// Run all events up to and including `tick`.
    ///
    /// Later events stay queued so that the run can be continued.
    pub fn run_until(&mut self, tick: u64) -> SimResult {
        self.run_events(Some(tick))?;
        if tick > self.context.now() {
            self.context.set_time(EventTime::new(tick, 0));
            set_time!(self.toplevel ; tick);
        }
        Ok(())
    }

    fn run_events(&mut self, limit: Option<u64>) -> SimResult {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let result = self.process_events(limit);
        if let Err(e) = &result {
            error!(self.toplevel ; "{e}");
            self.failure = Some(e.clone());
        }
        self.tracker.shutdown();
        result
    }

    fn process_events(&mut self, limit: Option<u64>) -> SimResult {
        while let Some(next_time) = self.context.peek_time() {
            if limit.is_some_and(|limit| next_time.tick > limit) {
                break;
            }
            let Some(event) = self.context.pop() else {
                break;
            };

            if event.time.tick != self.context.now() {
                set_time!(self.toplevel ; event.time.tick);
            }
            self.context.set_time(event.time);
            self.events_processed += 1;

            match event.handler.upgrade() {
                Some(handler) => handler.process_event(event.payload, event.kind)?,
                None => {
                    debug!(self.toplevel ; "dropped event {} for a deleted component", event.kind);
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn context(&self) -> SimContext {
        self.context.clone()
    }

    #[must_use]
    pub fn time_now(&self) -> u64 {
        self.context.now()
    }

    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends [`Track`](flitsim_track::Track) events
/// at `Warn` and above to stdout.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Warn);
        Self::new(&tracker)
    }
}
