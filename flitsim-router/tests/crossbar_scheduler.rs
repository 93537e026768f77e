// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use flitsim_engine::context::SimContext;
use flitsim_engine::engine::Engine;
use flitsim_engine::test_helpers::start_test;
use flitsim_engine::time::ClockDomain;
use flitsim_engine::types::SimResult;
use flitsim_router::crossbar_scheduler::{CrossbarScheduler, CrossbarSchedulerClient};
use flitsim_router::settings::{CrossbarSchedulerSettings, FlowControl};
use flitsim_router::types::UNBOUNDED_CREDITS;

type GrantLog = Rc<RefCell<Vec<(u64, usize, usize)>>>;

/// A client that sends a fixed sequence of `(head, tail)` flits.
struct Client {
    index: usize,
    context: SimContext,
    scheduler: Rc<CrossbarScheduler>,
    candidates: Vec<(usize, usize)>,
    packet_flits: usize,
    flits: RefCell<VecDeque<(bool, bool)>>,
    log: GrantLog,
}

impl Client {
    fn new(
        index: usize,
        context: &SimContext,
        scheduler: &Rc<CrossbarScheduler>,
        candidates: Vec<(usize, usize)>,
        packet_flits: usize,
        num_packets: usize,
        log: &GrantLog,
    ) -> Rc<Self> {
        let flits = (0..num_packets)
            .flat_map(|_| (0..packet_flits).map(move |i| (i == 0, i + 1 == packet_flits)))
            .collect();
        let client = Rc::new(Self {
            index,
            context: context.clone(),
            scheduler: scheduler.clone(),
            candidates,
            packet_flits,
            flits: RefCell::new(flits),
            log: log.clone(),
        });
        let weak: Weak<Client> = Rc::downgrade(&client);
        scheduler.set_client(index, weak).unwrap();
        client
    }

    fn request_next(&self) -> SimResult {
        let Some(&(head, tail)) = self.flits.borrow().front() else {
            return Ok(());
        };
        self.scheduler.request(
            self.index,
            self.candidates.clone(),
            self.packet_flits,
            head,
            tail,
        )
    }
}

impl CrossbarSchedulerClient for Client {
    fn crossbar_scheduler_response(&self, port: usize, vc: usize) -> SimResult {
        self.log
            .borrow_mut()
            .push((self.context.now(), self.index, port));
        assert!(self.candidates.contains(&(port, vc)));
        self.flits.borrow_mut().pop_front();
        self.request_next()
    }
}

fn scheduler(
    engine: &Engine,
    num_clients: usize,
    crossbar_ports: usize,
    settings: &CrossbarSchedulerSettings,
) -> Rc<CrossbarScheduler> {
    CrossbarScheduler::new(
        engine.top(),
        "scheduler",
        &engine.context(),
        num_clients,
        num_clients,
        crossbar_ports,
        0,
        ClockDomain::Core,
        settings,
    )
    .unwrap()
}

fn flit_settings(packet_lock: bool) -> CrossbarSchedulerSettings {
    CrossbarSchedulerSettings {
        flow_control: FlowControl::FlitBuffer,
        packet_lock,
        ..CrossbarSchedulerSettings::default()
    }
}

fn granted_clients(log: &GrantLog) -> Vec<usize> {
    log.borrow().iter().map(|&(_, client, _)| client).collect()
}

#[test]
fn round_robin_is_fair() {
    let mut engine = start_test(file!());
    let sched = scheduler(&engine, 3, 1, &flit_settings(false));
    let log = GrantLog::default();

    let clients: Vec<_> = (0..3)
        .map(|i| {
            sched.init_credits(i, UNBOUNDED_CREDITS).unwrap();
            Client::new(i, &engine.context(), &sched, vec![(0, i)], 1, 3, &log)
        })
        .collect();
    for client in &clients {
        client.request_next().unwrap();
    }
    engine.run().unwrap();

    assert_eq!(granted_clients(&log), vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    let ticks: Vec<u64> = log.borrow().iter().map(|&(t, _, _)| t).collect();
    assert_eq!(ticks, (0..9).collect::<Vec<u64>>());
}

#[test]
fn packet_lock_holds_the_port() {
    for (packet_lock, expected) in [(true, vec![0, 0, 0, 1]), (false, vec![0, 1, 0, 0])] {
        let mut engine = start_test(file!());
        let sched = scheduler(&engine, 2, 1, &flit_settings(packet_lock));
        let log = GrantLog::default();

        sched.init_credits(0, UNBOUNDED_CREDITS).unwrap();
        sched.init_credits(1, UNBOUNDED_CREDITS).unwrap();
        let long = Client::new(0, &engine.context(), &sched, vec![(0, 0)], 3, 1, &log);
        let short = Client::new(1, &engine.context(), &sched, vec![(0, 1)], 1, 1, &log);
        long.request_next().unwrap();
        short.request_next().unwrap();
        engine.run().unwrap();

        assert_eq!(granted_clients(&log), expected);
    }
}

#[test]
fn packet_buffer_waits_for_whole_packet() {
    let mut engine = start_test(file!());
    let settings = CrossbarSchedulerSettings {
        flow_control: FlowControl::PacketBuffer,
        packet_lock: true,
        ..CrossbarSchedulerSettings::default()
    };
    let sched = scheduler(&engine, 1, 1, &settings);
    let log = GrantLog::default();

    sched.init_credits(0, 4).unwrap();
    let client = Client::new(0, &engine.context(), &sched, vec![(0, 0)], 3, 2, &log);
    client.request_next().unwrap();
    engine.run().unwrap();

    // Only one credit left: the second head waits
    assert_eq!(log.borrow().len(), 3);
    assert_eq!(sched.credits(0), Some(1));
    assert_eq!(sched.credits(1), None);
    assert!(sched.has_request(0));

    engine.run_until(10).unwrap();
    sched.increment_credit(0).unwrap();
    engine.run_until(11).unwrap();
    assert_eq!(log.borrow().len(), 3);

    sched.increment_credit(0).unwrap();
    engine.run().unwrap();
    let grants = log.borrow();
    assert_eq!(grants.len(), 6);
    assert_eq!(grants[3].0, 11);
    assert_eq!(sched.credits(0), Some(0));
}

#[test]
fn flit_buffer_needs_one_credit() {
    let mut engine = start_test(file!());
    let sched = scheduler(&engine, 1, 1, &flit_settings(true));
    let log = GrantLog::default();

    sched.init_credits(0, 1).unwrap();
    let client = Client::new(0, &engine.context(), &sched, vec![(0, 0)], 3, 1, &log);
    client.request_next().unwrap();
    engine.run().unwrap();
    assert_eq!(log.borrow().len(), 1);

    sched.increment_credit(0).unwrap();
    engine.run().unwrap();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn credit_overflow_is_an_invariant_violation() {
    let engine = start_test(file!());
    let sched = scheduler(&engine, 1, 1, &flit_settings(true));
    sched.init_credits(0, 2).unwrap();
    let err = sched.increment_credit(0).unwrap_err();
    assert!(err.is_invariant());

    // Unbounded credits never overflow
    sched.init_credits(0, UNBOUNDED_CREDITS).unwrap();
    sched.increment_credit(0).unwrap();
    assert_eq!(sched.credits(0), Some(UNBOUNDED_CREDITS));
}

#[test]
fn bad_requests_are_invariant_violations() {
    let engine = start_test(file!());
    let sched = scheduler(&engine, 2, 2, &flit_settings(false));
    sched.init_credits(0, 1).unwrap();
    sched.init_credits(1, 1).unwrap();

    assert!(sched.request(2, vec![(0, 0)], 1, true, true).unwrap_err().is_invariant());
    assert!(sched.request(0, vec![], 1, true, true).unwrap_err().is_invariant());
    assert!(sched.request(0, vec![(2, 0)], 1, true, true).unwrap_err().is_invariant());
    assert!(sched.request(0, vec![(0, 2)], 1, true, true).unwrap_err().is_invariant());

    sched.request(0, vec![(0, 0)], 1, true, true).unwrap();
    assert!(sched.request(0, vec![(1, 1)], 1, true, true).unwrap_err().is_invariant());
}

#[test]
fn extra_iterations_fill_free_ports() {
    for (iterations, expected_ticks) in [(1, vec![0, 1]), (2, vec![0, 0])] {
        let mut engine = start_test(file!());
        let settings = CrossbarSchedulerSettings {
            iterations,
            ..flit_settings(false)
        };
        let sched = scheduler(&engine, 2, 2, &settings);
        let log = GrantLog::default();

        let clients: Vec<_> = (0..2)
            .map(|i| {
                sched.init_credits(i, UNBOUNDED_CREDITS).unwrap();
                Client::new(i, &engine.context(), &sched, vec![(0, i), (1, i)], 1, 1, &log)
            })
            .collect();
        for client in &clients {
            client.request_next().unwrap();
        }
        engine.run().unwrap();

        let ticks: Vec<u64> = log.borrow().iter().map(|&(t, _, _)| t).collect();
        assert_eq!(ticks, expected_ticks);
        assert_eq!(granted_clients(&log), vec![0, 1]);
    }
}

#[test]
fn binding_a_client_twice_fails() {
    let engine = start_test(file!());
    let sched = scheduler(&engine, 1, 1, &flit_settings(false));
    let log = GrantLog::default();
    let _client = Client::new(0, &engine.context(), &sched, vec![(0, 0)], 1, 1, &log);

    let other = Client {
        index: 0,
        context: engine.context(),
        scheduler: sched.clone(),
        candidates: vec![(0, 0)],
        packet_flits: 1,
        flits: RefCell::new(VecDeque::new()),
        log,
    };
    let other = Rc::new(other);
    let weak: Weak<Client> = Rc::downgrade(&other);
    assert!(sched.set_client(0, weak).is_err());
}
