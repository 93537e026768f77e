// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use approx::assert_relative_eq;
use flitsim_engine::test_helpers::start_test;
use flitsim_router::congestion_status::CongestionStatus;
use flitsim_router::settings::{CongestionMode, CongestionStatusSettings, CongestionStyle};
use flitsim_router::types::{UNBOUNDED_CREDITS, vc_index};

fn settings(style: CongestionStyle, mode: CongestionMode) -> CongestionStatusSettings {
    CongestionStatusSettings { style, mode }
}

#[test]
fn absolute_counts_occupied_slots() {
    let engine = start_test(file!());
    let status = CongestionStatus::new(
        engine.top(),
        "status",
        &engine.context(),
        2,
        2,
        &settings(CongestionStyle::Absolute, CongestionMode::Vc),
    );
    for idx in 0..4 {
        status.init_credits(idx, UNBOUNDED_CREDITS).unwrap();
    }

    let slot = vc_index(1, 0, 2);
    for _ in 0..3 {
        status.decrement_credit(slot).unwrap();
    }
    assert_relative_eq!(status.status(0, 0, 1, 0), 3.0);
    assert_relative_eq!(status.status(0, 0, 1, 1), 0.0);

    status.increment_credit(slot).unwrap();
    assert_relative_eq!(status.status(0, 0, 1, 0), 2.0);
    assert_eq!(status.credits(slot), Some(UNBOUNDED_CREDITS - 2));
}

#[test]
fn relative_port_mode_averages() {
    let engine = start_test(file!());
    let status = CongestionStatus::new(
        engine.top(),
        "status",
        &engine.context(),
        1,
        2,
        &settings(CongestionStyle::Relative, CongestionMode::Port),
    );
    status.init_credits(0, 4).unwrap();
    status.init_credits(1, 4).unwrap();

    status.decrement_credit(0).unwrap();
    status.decrement_credit(0).unwrap();
    status.decrement_credit(1).unwrap();

    // (2/4 + 1/4) / 2
    assert_relative_eq!(status.status(0, 0, 0, 1), 0.375);
}

#[test]
fn credits_stop_at_the_maximum() {
    let engine = start_test(file!());
    let status = CongestionStatus::new(
        engine.top(),
        "status",
        &engine.context(),
        1,
        1,
        &settings(CongestionStyle::Relative, CongestionMode::Vc),
    );
    status.init_credits(0, 2).unwrap();
    status.increment_credit(0).unwrap();
    assert_eq!(status.credits(0), Some(2));
    assert_relative_eq!(status.status(0, 0, 0, 0), 0.0);
}

#[test]
fn underflow_is_an_invariant_violation() {
    let engine = start_test(file!());
    let status = CongestionStatus::new(
        engine.top(),
        "status",
        &engine.context(),
        2,
        1,
        &settings(CongestionStyle::Absolute, CongestionMode::Vc),
    );
    status.init_credits(1, 1).unwrap();
    status.decrement_credit(1).unwrap();

    let err = status.decrement_credit(1).unwrap_err();
    assert!(err.is_invariant());
    assert_eq!(
        format!("{err}"),
        "Invariant violated at 0.0 in top::status: credit underflow on port 1 vc 0"
    );
    assert!(status.decrement_credit(2).unwrap_err().is_invariant());
}

#[test]
fn relative_needs_finite_credits() {
    let engine = start_test(file!());
    let status = CongestionStatus::new(
        engine.top(),
        "status",
        &engine.context(),
        1,
        1,
        &settings(CongestionStyle::Relative, CongestionMode::Vc),
    );
    assert!(status.init_credits(0, UNBOUNDED_CREDITS).unwrap_err().is_config());
    assert!(status.init_credits(0, 0).unwrap_err().is_config());
}
