// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Run uniform random traffic through a single router.
//!
//! See `lib.rs` for details.

use std::path::PathBuf;

use clap::Parser;
use flitsim_engine::engine::Engine;
use flitsim_engine::sim_error;
use flitsim_engine::types::SimError;
use flitsim_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use flitsim_track::{Tracker, error, info};
use sim_router::{build_platform, load_config, queue_uniform_traffic, summarise};

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Single router traffic simulation")]
struct Cli {
    /// TOML file of settings applied over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable logging to the console.
    #[arg(long, default_value = "false")]
    stdout: bool,

    /// Level of log message to display.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,

    /// Set a regular expression for which entities should have logging level
    /// set to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,

    /// Also write the log to this file.
    #[arg(long)]
    log_file: Option<String>,

    /// Level of log message written to `--log-file`.
    #[arg(long, default_value = "Debug")]
    log_file_level: log::Level,

    /// Set a regular expression for which entities should have the log file
    /// level set to `--log-file-level`.
    #[arg(long, default_value = "")]
    log_file_filter_regex: String,

    /// Tick at which to stop the simulation. Use 0 to run until completion.
    #[arg(long, default_value = "0")]
    finish_tick: u64,
}

fn build_tracker(args: &Cli) -> Result<Tracker, SimError> {
    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: args.stdout,
            level: args.stdout_level,
            filter_regex: &args.stdout_filter_regex,
            file: None,
        },
        log_file: TrackerConfig {
            enable: args.log_file.is_some(),
            level: args.log_file_level,
            filter_regex: &args.log_file_filter_regex,
            file: args.log_file.as_deref(),
        },
    };
    setup_trackers(&config).map_err(|e| SimError::Config(e.to_string()))
}

fn main() -> Result<(), SimError> {
    let args = Cli::parse();
    let config = load_config(args.config.as_deref())?;
    let tracker = build_tracker(&args)?;

    let mut engine = Engine::new(&tracker);
    let platform = build_platform(&mut engine, &config)?;
    let top = engine.top().clone();
    info!(top ;
        "{} ports, {} vcs, {} packets of {} flits per terminal, {} routing",
        config.num_ports,
        config.num_vcs,
        config.packets_per_terminal,
        config.flits_per_packet,
        config.routing.algorithm
    );

    let num_flits = queue_uniform_traffic(&platform, &config)?;
    if args.finish_tick == 0 {
        engine.run()?;
    } else {
        engine.run_until(args.finish_tick)?;
    }

    let summary = summarise(&engine, &platform);
    if args.finish_tick == 0 && summary.flits_received != num_flits {
        error!(top ; "{}/{} flits received", summary.flits_received, num_flits);
        error!(top ; "Deadlock detected at tick {}", summary.ticks);
        tracker.shutdown();
        return sim_error!("Deadlock");
    }

    info!(top ; "Received {} packets ({} flits) in {} ticks",
        summary.packets_received,
        summary.flits_received,
        summary.ticks
    );
    info!(top ; "Mean packet latency {:.2} ticks", summary.mean_packet_latency);
    info!(top ; "Router counters: {:?}", summary.counters);
    tracker.shutdown();
    Ok(())
}
