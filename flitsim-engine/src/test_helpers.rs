// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use flitsim_track::test_helpers::create_tracker;

use crate::engine::Engine;

/// Create an engine whose log is written to `traces/<test file name>.log`.
#[must_use]
pub fn start_test(full_filepath: &str) -> Engine {
    Engine::new(&create_tracker(full_filepath))
}
