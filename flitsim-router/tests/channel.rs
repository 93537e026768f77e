// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::test_helpers::start_test;
use flitsim_engine::time::ClockDomain;
use flitsim_engine::types::SimResult;
use flitsim_router::channel::{Channel, ChannelEndpoint};
use flitsim_router::settings::ChannelSettings;
use flitsim_router::types::{Credit, Flit, Packet};

#[derive(Default)]
struct Endpoint {
    context: Option<SimContext>,
    flits: RefCell<Vec<(u64, Flit)>>,
    credits: RefCell<Vec<(u64, Vec<usize>)>>,
}

impl ChannelEndpoint for Endpoint {
    fn receive_flit(&self, _port: usize, flit: Flit) -> SimResult {
        let now = self.context.as_ref().map_or(0, SimContext::now);
        self.flits.borrow_mut().push((now, flit));
        Ok(())
    }

    fn receive_credit(&self, _port: usize, credit: Credit) -> SimResult {
        let now = self.context.as_ref().map_or(0, SimContext::now);
        self.credits
            .borrow_mut()
            .push((now, credit.iter().copied().collect()));
        Ok(())
    }
}

fn endpoint(context: &SimContext) -> Rc<Endpoint> {
    Rc::new(Endpoint {
        context: Some(context.clone()),
        ..Endpoint::default()
    })
}

fn bind(channel: &Channel, source: &Rc<Endpoint>, sink: &Rc<Endpoint>) {
    let source: Weak<dyn ChannelEndpoint> = Rc::<Endpoint>::downgrade(source);
    let sink: Weak<dyn ChannelEndpoint> = Rc::<Endpoint>::downgrade(sink);
    channel.set_source(source, 0).unwrap();
    channel.set_sink(sink, 0).unwrap();
}

#[test]
fn one_flit_per_cycle() {
    let mut engine = start_test(file!());
    let context = engine.context();
    let channel = Channel::new(engine.top(), "channel", &context, &ChannelSettings::default())
        .unwrap();
    let (source, sink) = (endpoint(&context), endpoint(&context));
    bind(&channel, &source, &sink);

    let packet = Packet::new(engine.top(), 0, 0, 1, vec![1], 2, 0, 0).unwrap();
    assert!(channel.get_next_flit().is_none());
    channel.set_next_flit(packet.flit(0)).unwrap();
    assert_eq!(channel.get_next_flit(), Some(packet.flit(0)));

    let err = channel.set_next_flit(packet.flit(1)).unwrap_err();
    assert!(err.is_invariant());

    engine.run_until(1).unwrap();
    assert!(channel.get_next_flit().is_none());
    channel.set_next_flit(packet.flit(1)).unwrap();
    engine.run().unwrap();

    let ticks: Vec<u64> = sink.flits.borrow().iter().map(|(t, _)| *t).collect();
    assert_eq!(ticks, vec![1, 2]);
}

#[test]
fn credits_can_grow_until_the_cycle_ends() {
    let mut engine = start_test(file!());
    engine.set_cycle_time(ClockDomain::Channel, 4).unwrap();
    let context = engine.context();
    let channel = Channel::new(
        engine.top(),
        "channel",
        &context,
        &ChannelSettings { latency: 2 },
    )
    .unwrap();
    let (source, sink) = (endpoint(&context), endpoint(&context));
    bind(&channel, &source, &sink);

    let mut credit = Credit::new(3);
    credit.put_num(2).unwrap();
    channel.set_next_credit(credit).unwrap();
    channel.get_next_credit().unwrap().borrow_mut().put_num(0).unwrap();

    assert!(channel.set_next_credit(Credit::new(3)).unwrap_err().is_invariant());

    engine.run().unwrap();
    assert_eq!(*source.credits.borrow(), vec![(8, vec![2, 0])]);
    assert!(sink.credits.borrow().is_empty());
}

#[test]
fn ends_bind_once() {
    let engine = start_test(file!());
    let context = engine.context();
    let channel = Channel::new(engine.top(), "channel", &context, &ChannelSettings::default())
        .unwrap();
    let (source, sink) = (endpoint(&context), endpoint(&context));
    bind(&channel, &source, &sink);

    let again: Weak<dyn ChannelEndpoint> = Rc::<Endpoint>::downgrade(&source);
    assert!(channel.set_source(again.clone(), 1).is_err());
    assert!(channel.set_sink(again, 1).is_err());
}

#[test]
fn zero_latency_rejected() {
    let engine = start_test(file!());
    let result = Channel::new(
        engine.top(),
        "channel",
        &engine.context(),
        &ChannelSettings { latency: 0 },
    );
    assert!(result.is_err_and(|e| e.is_config()));
}
