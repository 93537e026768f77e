// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use approx::assert_relative_eq;
use flitsim_engine::test_helpers::start_test;
use flitsim_router::channel::ChannelEndpoint;
use flitsim_router::input_queue::InputQueueState;
use flitsim_router::router::{Router, RouterCounters};
use flitsim_router::routing::SettingsFactory;
use flitsim_router::settings::{
    ChannelSettings, CongestionStyle, InputQueueTailoring, RouterSettings, RoutingSettings,
};
use flitsim_router::test_helpers::{FixedRoutingFactory, RouterBench, router_bench};
use flitsim_router::types::Packet;

fn bench(
    file: &str,
    num_ports: usize,
    num_vcs: usize,
    settings: &RouterSettings,
    factory: &FixedRoutingFactory,
) -> RouterBench {
    router_bench(
        start_test(file),
        1,
        1,
        num_ports,
        num_vcs,
        settings,
        &ChannelSettings::default(),
        factory,
    )
    .unwrap()
}

fn arrival_ticks(bench: &RouterBench, terminal: usize) -> Vec<u64> {
    bench.terminals[terminal]
        .received()
        .iter()
        .map(|d| d.tick)
        .collect()
}

#[test]
fn round_trip() {
    let factory = FixedRoutingFactory::new(1, &[(0, 1, 1)]);
    let mut bench = bench(file!(), 3, 2, &RouterSettings::new(2, 4), &factory);

    let packet = bench.terminals[2].send_packet(0, vec![0], 3, 1).unwrap();
    bench.engine.run().unwrap();

    assert_eq!(arrival_ticks(&bench, 0), vec![6, 7, 8]);
    let received = bench.terminals[0].received();
    for (index, delivery) in received.iter().enumerate() {
        assert_eq!(delivery.flit, packet.flit(index));
        assert_eq!(delivery.flit.vc(), 1);
    }
    assert_eq!(packet.hop_count(), 1);

    assert_eq!(
        bench.router.counters(),
        RouterCounters {
            packets_received: 1,
            flits_received: 3,
            packets_sent: 1,
            flits_sent: 3,
        }
    );

    // Everything returned
    assert_eq!(bench.router.output_credits(0, 1), Some(4));
    assert_eq!(bench.terminals[2].credits(1), Some(4));
    assert_eq!(bench.router.input_queue_occupancy(2, 1), Some(0));
    assert_eq!(bench.router.output_queue_occupancy(0, 1), Some(0));
    assert_eq!(bench.router.input_queue_state(2, 1), Some(InputQueueState::Idle));
    assert_relative_eq!(bench.router.congestion(2, 1, 0, 1), 0.0);
}

#[test]
fn congestion_follows_output_queue() {
    let factory = FixedRoutingFactory::new(1, &[(0, 1, 1)]);
    let mut bench = bench(file!(), 3, 2, &RouterSettings::new(2, 4), &factory);

    bench.terminals[2].send_packet(0, vec![0], 3, 1).unwrap();

    // Transferred at tick 2, first flit leaves the output queue at tick 4
    bench.engine.run_until(3).unwrap();
    assert_relative_eq!(bench.router.congestion(2, 1, 0, 1), 3.0);
    assert_eq!(bench.router.output_queue_occupancy(0, 1), Some(0));

    bench.engine.run_until(4).unwrap();
    assert_relative_eq!(bench.router.congestion(2, 1, 0, 1), 2.0);
    assert_eq!(bench.router.output_queue_occupancy(0, 1), Some(2));
    assert_relative_eq!(bench.router.congestion(2, 1, 0, 0), 0.0);

    bench.engine.run().unwrap();
    assert_relative_eq!(bench.router.congestion(2, 1, 0, 1), 0.0);
}

#[test]
fn unresolved_routing_retries() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]).with_unresolved(2);
    let mut bench = bench(file!(), 2, 1, &RouterSettings::new(2, 4), &factory);

    bench.terminals[1].send_packet(0, vec![0], 1, 0).unwrap();
    bench.engine.run().unwrap();

    assert_eq!(arrival_ticks(&bench, 0), vec![8]);
}

#[test]
fn credit_starvation_then_release() {
    let factory = FixedRoutingFactory::new(1, &[(0, 1, 1)]);
    let mut bench = bench(file!(), 3, 2, &RouterSettings::new(2, 1), &factory);

    bench.terminals[0].hold_credits();
    bench.terminals[2].send_packet(0, vec![0], 1, 1).unwrap();
    bench.terminals[2].send_packet(0, vec![0], 1, 1).unwrap();
    bench.engine.run().unwrap();

    // The second packet waits in the output queue for a credit
    assert_eq!(bench.terminals[0].num_received(), 1);
    assert_eq!(bench.router.output_credits(0, 1), Some(0));
    assert_eq!(bench.router.output_queue_occupancy(0, 1), Some(1));
    assert_eq!(bench.router.input_queue_occupancy(2, 1), Some(0));

    bench.engine.run_until(20).unwrap();
    assert_eq!(bench.terminals[0].num_received(), 1);

    bench.terminals[0].release_credits().unwrap();
    bench.engine.run().unwrap();

    let ticks = arrival_ticks(&bench, 0);
    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[1], 23);
    assert_eq!(bench.router.output_queue_occupancy(0, 1), Some(0));
}

#[test]
fn input_queues_follow_channel_latency() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let settings = RouterSettings {
        input_queue_tailoring: Some(InputQueueTailoring {
            mult: 2.0,
            min: 2,
            max: 16,
        }),
        ..RouterSettings::new(1, 4)
    };
    let mut bench = router_bench(
        start_test(file!()),
        1,
        1,
        2,
        1,
        &settings,
        &ChannelSettings { latency: 3 },
        &factory,
    )
    .unwrap();
    assert_eq!(bench.router.input_queue_depth(), 6);
    assert_eq!(bench.terminals[1].credits(0), Some(6));
    assert_eq!(bench.router.output_credits(0, 0), Some(6));

    bench.terminals[1].send_packet(0, vec![0], 6, 0).unwrap();
    bench.engine.run().unwrap();
    assert_eq!(bench.terminals[0].num_received(), 6);
    assert_eq!(bench.terminals[1].credits(0), Some(6));
}

#[test]
fn out_of_range_inspection_is_none() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let bench = bench(file!(), 2, 2, &RouterSettings::new(1, 4), &factory);
    assert_eq!(bench.router.output_credits(2, 0), None);
    assert_eq!(bench.router.output_credits(0, 2), None);
    assert_eq!(bench.router.output_queue_occupancy(0, 2), None);
    assert_eq!(bench.router.input_queue_occupancy(2, 0), None);
    assert_eq!(bench.router.input_queue_state(1, 2), None);
    assert_eq!(bench.terminals[0].credits(2), None);
}

#[test]
fn credits_for_several_vcs_share_a_message() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let bench = bench(file!(), 2, 4, &RouterSettings::new(2, 4), &factory);
    let router = &bench.router;
    assert_eq!(router.credit_size(), 4);

    router.send_credit(1, 0).unwrap();
    router.send_credit(1, 2).unwrap();
    router.send_credit(1, 3).unwrap();

    let channel = router.input_channel(1).unwrap();
    let credit = channel.get_next_credit().unwrap();
    let vcs: Vec<usize> = credit.borrow().iter().copied().collect();
    assert_eq!(vcs, vec![0, 2, 3]);

    // Nothing was sent so the terminal already holds every credit
    let mut engine = bench.engine;
    let err = engine.run().unwrap_err();
    assert!(err.is_invariant());
    assert!(format!("{err}").contains("top::terminal1: credit overflow on vc 0 (max 4)"));
    assert_eq!(bench.terminals[1].credits(0), Some(4));
}

#[test]
fn released_credits_coalesce() {
    let routing = RoutingSettings {
        all_vcs: false,
        ..RoutingSettings::default()
    };
    let mut bench = router_bench(
        start_test(file!()),
        1,
        1,
        4,
        4,
        &RouterSettings::new(2, 2),
        &ChannelSettings::default(),
        &SettingsFactory::new(routing),
    )
    .unwrap();

    bench.terminals[0].hold_credits();
    bench.terminals[1].send_packet(0, vec![0], 1, 0).unwrap();
    bench.terminals[2].send_packet(0, vec![0], 1, 2).unwrap();
    bench.terminals[3].send_packet(0, vec![0], 1, 3).unwrap();
    bench.engine.run().unwrap();

    let vcs: Vec<usize> = bench.terminals[0]
        .received()
        .iter()
        .map(|d| d.flit.vc())
        .collect();
    assert_eq!(vcs, vec![0, 2, 3]);
    for vc in [0, 2, 3] {
        assert_eq!(bench.router.output_credits(0, vc), Some(1));
    }

    bench.terminals[0].release_credits().unwrap();
    let channel = bench.router.output_channel(0).unwrap();
    let credit = channel.get_next_credit().unwrap();
    let released: Vec<usize> = credit.borrow().iter().copied().collect();
    assert_eq!(released, vec![0, 2, 3]);

    bench.engine.run().unwrap();
    for vc in 0..4 {
        assert_eq!(bench.router.output_credits(0, vc), Some(2));
    }
}

#[test]
fn slow_channel_coalesces_credits() {
    let factory = FixedRoutingFactory::new(5, &[(0, 1, 1)]);
    let mut bench = router_bench(
        start_test(file!()),
        1,
        2,
        3,
        2,
        &RouterSettings::new(1, 4),
        &ChannelSettings::default(),
        &factory,
    )
    .unwrap();
    assert_eq!(bench.router.credit_size(), 4);

    bench.terminals[2].send_packet(0, vec![0], 3, 1).unwrap();

    // The last two flits leave the input queue in one channel cycle
    bench.engine.run_until(9).unwrap();
    let channel = bench.router.input_channel(2).unwrap();
    let credit = channel.get_next_credit().unwrap();
    let vcs: Vec<usize> = credit.borrow().iter().copied().collect();
    assert_eq!(vcs, vec![1, 1]);

    bench.engine.run().unwrap();
    assert_eq!(bench.terminals[0].num_received(), 3);
    assert_eq!(bench.terminals[2].credits(1), Some(4));
}

#[test]
fn gap_between_flits_is_an_invariant_violation() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let mut bench = bench(file!(), 2, 1, &RouterSettings::new(2, 4), &factory);
    let packet = Packet::new(bench.engine.top(), 0, 1, 0, vec![0], 3, 0, 0).unwrap();

    bench.engine.run_until(1).unwrap();
    bench.router.receive_flit(1, packet.flit(0)).unwrap();

    bench.engine.run_until(3).unwrap();
    let err = bench.router.receive_flit(1, packet.flit(1)).unwrap_err();
    assert!(err.is_invariant());
    assert_eq!(
        format!("{err}"),
        "Invariant violated at 3.0 in top::router: flit 0.1 vc 0 on port 1 at 3, expected back-to-back at 2"
    );
}

#[test]
fn flit_of_another_packet_is_an_invariant_violation() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let mut bench = bench(file!(), 2, 1, &RouterSettings::new(2, 4), &factory);
    let first = Packet::new(bench.engine.top(), 0, 1, 0, vec![0], 2, 0, 0).unwrap();
    let second = Packet::new(bench.engine.top(), 1, 1, 0, vec![0], 2, 0, 0).unwrap();

    bench.engine.run_until(1).unwrap();
    bench.router.receive_flit(1, first.flit(0)).unwrap();
    bench.engine.run_until(2).unwrap();
    let err = bench.router.receive_flit(1, second.flit(1)).unwrap_err();
    assert!(err.is_invariant());
}

#[test]
fn later_flits_keep_the_head_vc() {
    // Input VC 1 is switched to output VC 0 before the tail arrives
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let mut bench = bench(file!(), 3, 2, &RouterSettings::new(2, 4), &factory);

    let packet = bench.terminals[2].send_packet(0, vec![0], 3, 1).unwrap();
    bench.engine.run().unwrap();

    let received = bench.terminals[0].received();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|d| d.flit.vc() == 0));
    assert!(packet.flits().all(|flit| flit.vc() == 0));

    // The upstream credits were returned on the input VC
    assert_eq!(bench.terminals[2].credits(1), Some(4));
    assert_eq!(bench.terminals[2].credits(0), Some(4));
    assert_eq!(bench.router.output_credits(0, 0), Some(4));
}

#[test]
fn input_overflow_is_an_invariant_violation() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let mut bench = bench(file!(), 2, 1, &RouterSettings::new(2, 1), &factory);
    let first = Packet::new(bench.engine.top(), 0, 1, 0, vec![0], 1, 0, 0).unwrap();
    let second = Packet::new(bench.engine.top(), 1, 1, 0, vec![0], 1, 0, 0).unwrap();

    bench.engine.run_until(1).unwrap();
    bench.router.receive_flit(1, first.flit(0)).unwrap();
    let err = bench.router.receive_flit(1, second.flit(0)).unwrap_err();
    assert!(err.is_invariant());
}

#[test]
fn many_packets_arrive_in_order() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1), (0, 1, 1)]);
    let mut bench = bench(file!(), 3, 2, &RouterSettings::new(1, 2), &factory);

    let mut sent = Vec::new();
    for _ in 0..6 {
        sent.push(bench.terminals[1].send_packet(0, vec![0], 2, 0).unwrap());
    }
    bench.engine.run().unwrap();

    let received = bench.terminals[0].received();
    assert_eq!(received.len(), 12);
    let tags: Vec<u64> = received
        .iter()
        .filter(|d| d.flit.is_head())
        .map(|d| d.flit.packet().tag())
        .collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4, 5]);
    for vc in 0..2 {
        assert_eq!(bench.router.output_credits(0, vc), Some(2));
    }
}

#[test]
fn relative_congestion_is_rejected() {
    let mut settings = RouterSettings::new(2, 4);
    settings.congestion_status.style = CongestionStyle::Relative;
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);

    let engine = start_test(file!());
    let result = Router::new(
        engine.top(),
        "router",
        &engine.context(),
        0,
        vec![0],
        2,
        1,
        &settings,
        &factory,
    );
    assert!(result.is_err_and(|e| e.is_config()));
}

#[test]
fn missing_settings_are_rejected() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let engine = start_test(file!());
    for settings in [RouterSettings::new(0, 4), RouterSettings::new(2, 0)] {
        let result = Router::new(
            engine.top(),
            "router",
            &engine.context(),
            0,
            vec![0],
            2,
            1,
            &settings,
            &factory,
        );
        assert!(result.is_err_and(|e| e.is_config()));
    }
}

#[test]
fn unknown_routing_algorithm_is_rejected() {
    let routing = RoutingSettings {
        algorithm: "valiant".to_string(),
        ..RoutingSettings::default()
    };
    let engine = start_test(file!());
    let result = Router::new(
        engine.top(),
        "router",
        &engine.context(),
        0,
        vec![0],
        2,
        1,
        &RouterSettings::new(2, 4),
        &SettingsFactory::new(routing),
    );
    let err = result.err().unwrap();
    assert!(err.is_config());
    assert_eq!(
        format!("{err}"),
        "Config error: unknown routing algorithm 'valiant'"
    );
}

#[test]
fn channels_bind_once() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let bench = bench(file!(), 2, 1, &RouterSettings::new(2, 4), &factory);

    let output = bench.router.output_channel(1).unwrap();
    assert!(bench.router.set_output_channel(1, &output).is_err());
    let input = bench.router.input_channel(0).unwrap();
    assert!(bench.router.set_input_channel(0, &input).is_err());
    assert!(bench.router.set_input_channel(2, &input).is_err());
}

#[test]
fn names() {
    let factory = FixedRoutingFactory::new(1, &[(0, 0, 1)]);
    let bench = bench(file!(), 2, 1, &RouterSettings::new(2, 4), &factory);
    assert_eq!(format!("{}", bench.router), "top::router");
    assert_eq!(format!("{}", bench.terminals[1]), "top::terminal1");
    assert_eq!(bench.router.num_ports(), 2);
    assert_eq!(bench.router.num_vcs(), 1);
    assert_eq!(bench.router.address(), &[0]);
}
