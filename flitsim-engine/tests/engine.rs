// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::invariant_error;
use flitsim_engine::test_helpers::start_test;
use flitsim_engine::time::EventTime;
use flitsim_engine::traits::{Component, downcast_event};
use flitsim_engine::types::{SimError, SimResult};
use flitsim_track::entity::Entity;

/// Records the payload of every event along with the time it was seen.
struct Recorder {
    entity: Rc<Entity>,
    context: SimContext,
    seen: RefCell<Vec<(EventTime, u32)>>,

    /// Fail when an event with this payload is seen.
    fail_on: Option<u32>,
}

impl Recorder {
    fn new(context: &SimContext, parent: &Rc<Entity>, fail_on: Option<u32>) -> Rc<Self> {
        Rc::new(Self {
            entity: Rc::new(Entity::new(parent, "recorder")),
            context: context.clone(),
            seen: RefCell::new(Vec::new()),
            fail_on,
        })
    }

    fn handler(self: &Rc<Self>) -> Weak<dyn Component> {
        let weak: Weak<Self> = Rc::downgrade(self);
        weak
    }
}

impl Component for Recorder {
    fn process_event(&self, event: Box<dyn Any>, kind: u32) -> SimResult {
        let value = downcast_event::<u32>(event, kind)?;
        if self.fail_on == Some(value) {
            return invariant_error!(self.context, self.entity ; "bad value {value}");
        }
        self.seen.borrow_mut().push((self.context.time(), value));
        Ok(())
    }
}

#[test]
fn events_in_tick_then_epsilon_order() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), None);

    context
        .schedule(recorder.handler(), 5, 0, Box::new(1u32), 0)
        .unwrap();
    context
        .schedule(recorder.handler(), 2, 2, Box::new(2u32), 0)
        .unwrap();
    context
        .schedule(recorder.handler(), 2, 0, Box::new(3u32), 0)
        .unwrap();
    context
        .schedule(recorder.handler(), 2, 1, Box::new(4u32), 0)
        .unwrap();

    engine.run().unwrap();
    assert_eq!(
        *recorder.seen.borrow(),
        vec![
            (EventTime::new(2, 0), 3),
            (EventTime::new(2, 1), 4),
            (EventTime::new(2, 2), 2),
            (EventTime::new(5, 0), 1),
        ]
    );
    assert_eq!(engine.time_now(), 5);
    assert_eq!(engine.events_processed(), 4);
}

#[test]
fn same_time_is_fifo() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), None);

    for value in 0..10u32 {
        context
            .schedule(recorder.handler(), 3, 1, Box::new(value), 0)
            .unwrap();
    }
    engine.run().unwrap();

    let values: Vec<u32> = recorder.seen.borrow().iter().map(|(_, v)| *v).collect();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
}

#[test]
fn bad_epsilon_rejected() {
    let engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), None);

    let result = context.schedule(recorder.handler(), 3, 7, Box::new(0u32), 0);
    assert!(result.unwrap_err().is_invariant());
}

/// Schedules an event in the past when it runs.
struct TimeTraveller {
    context: SimContext,
    self_ref: Weak<TimeTraveller>,
}

impl Component for TimeTraveller {
    fn process_event(&self, _event: Box<dyn Any>, _kind: u32) -> SimResult {
        self.context
            .schedule(self.self_ref.clone(), 3, 0, Box::new(()), 0)
    }
}

#[test]
fn past_event_aborts_run() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let traveller = Rc::new_cyclic(|self_ref| TimeTraveller {
        context: context.clone(),
        self_ref: self_ref.clone(),
    });
    let handler: Weak<TimeTraveller> = Rc::downgrade(&traveller);
    context.schedule(handler, 4, 1, Box::new(()), 0).unwrap();

    match engine.run() {
        Err(SimError::Invariant { time, entity, msg }) => {
            assert_eq!(time, EventTime::new(4, 1));
            assert_eq!(entity, "top");
            assert_eq!(msg, "event scheduled in the past at 3.0");
        }
        other => panic!("Expected an invariant error, got {other:?}"),
    }
}

#[test]
fn invariant_poisons_engine() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), Some(2));

    for (tick, value) in [(1, 1u32), (2, 2), (3, 3)] {
        context
            .schedule(recorder.handler(), tick, 0, Box::new(value), 0)
            .unwrap();
    }

    let err = engine.run().unwrap_err();
    assert_eq!(
        format!("{err}"),
        "Invariant violated at 2.0 in top::recorder: bad value 2"
    );
    assert_eq!(recorder.seen.borrow().len(), 1);

    // The remaining event must never be run
    assert_eq!(engine.run().unwrap_err(), err);
    assert_eq!(recorder.seen.borrow().len(), 1);
}

#[test]
fn dropped_component_events_are_skipped() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), None);
    context
        .schedule(recorder.handler(), 1, 0, Box::new(1u32), 0)
        .unwrap();
    drop(recorder);

    engine.run().unwrap();
    assert_eq!(engine.events_processed(), 1);
}

#[test]
fn run_until_leaves_later_events() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), None);

    for tick in [2u64, 4, 6, 8] {
        context
            .schedule(recorder.handler(), tick, 0, Box::new(tick as u32), 0)
            .unwrap();
    }

    engine.run_until(5).unwrap();
    assert_eq!(recorder.seen.borrow().len(), 2);
    assert_eq!(engine.time_now(), 5);
    assert_eq!(context.num_pending(), 2);

    engine.run().unwrap();
    assert_eq!(recorder.seen.borrow().len(), 4);
    assert_eq!(engine.time_now(), 8);
}

#[test]
fn wrong_payload_is_an_error() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let recorder = Recorder::new(&context, engine.top(), None);
    context
        .schedule(recorder.handler(), 1, 0, Box::new("text"), 9)
        .unwrap();

    let err = engine.run().unwrap_err();
    assert!(matches!(err, SimError::Model(_)));
}
