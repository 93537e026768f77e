// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Simulate a single router with a terminal on every port.
//!
//! Terminal `i` is attached to port `i`. Every terminal queues
//! `packets_per_terminal` packets, each for a uniformly random other
//! terminal on a random VC, and the simulation runs until every flit has
//! been delivered (or until a finish tick).
//!
//! The configuration is built from the defaults of [`SimRouterConfig`], an
//! optional TOML file and then `FLITSIM_`-prefixed environment variables.

use std::path::Path;
use std::rc::Rc;

use figment::Figment;
use figment::providers::Serialized;
use flitsim_engine::config_error;
use flitsim_engine::engine::Engine;
use flitsim_engine::time::ClockDomain;
use flitsim_engine::types::SimError;
use flitsim_router::router::{Router, RouterCounters};
use flitsim_router::routing::SettingsFactory;
use flitsim_router::settings::{
    ChannelSettings, RouterSettings, RoutingSettings, extract_settings, settings_figment,
};
use flitsim_router::terminal::{Terminal, connect_terminal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimRouterConfig {
    pub num_ports: usize,
    pub num_vcs: usize,

    /// Period of the core clock in ticks.
    pub core_period: u64,

    /// Period of the channel clock in ticks.
    pub channel_period: u64,

    pub packets_per_terminal: usize,
    pub flits_per_packet: usize,

    /// Seed of the traffic generator.
    pub seed: u64,

    pub router: RouterSettings,
    pub routing: RoutingSettings,
    pub channel: ChannelSettings,
}

impl Default for SimRouterConfig {
    fn default() -> Self {
        Self {
            num_ports: 4,
            num_vcs: 2,
            core_period: 1,
            channel_period: 1,
            packets_per_terminal: 16,
            flits_per_packet: 4,
            seed: 0,
            router: RouterSettings::new(1, 8),
            routing: RoutingSettings::default(),
            channel: ChannelSettings::default(),
        }
    }
}

/// Load the configuration, layering `path` (if given) and the environment
/// over the defaults.
pub fn load_config(path: Option<&Path>) -> Result<SimRouterConfig, SimError> {
    if let Some(path) = path.filter(|path| !path.exists()) {
        return config_error!("config file {} not found", path.display());
    }
    let figment = Figment::from(Serialized::defaults(SimRouterConfig::default()))
        .merge(settings_figment(path));
    extract_settings(&figment)
}

/// The router and its terminals.
pub struct Platform {
    pub router: Rc<Router>,
    pub terminals: Vec<Rc<Terminal>>,
}

/// Set the clocks of `engine` and build the router with its terminals.
pub fn build_platform(engine: &mut Engine, config: &SimRouterConfig) -> Result<Platform, SimError> {
    engine.set_cycle_time(ClockDomain::Core, config.core_period)?;
    engine.set_cycle_time(ClockDomain::Channel, config.channel_period)?;
    let context = engine.context();
    let top = engine.top();

    let settings = config.router.tailored_to(config.channel.latency);
    let factory = SettingsFactory::new(config.routing.clone());
    let router = Router::new(
        top,
        "router",
        &context,
        0,
        vec![0],
        config.num_ports,
        config.num_vcs,
        &settings,
        &factory,
    )?;

    let initial_credits = u32::try_from(settings.input_queue_depth)
        .map_err(|e| SimError::Config(e.to_string()))?;
    let terminals = (0..config.num_ports)
        .map(|port| {
            let terminal = Terminal::new(
                top,
                &format!("terminal{port}"),
                &context,
                port,
                config.num_vcs,
                initial_credits,
            );
            connect_terminal(&router, port, &terminal, &context, &config.channel)?;
            Ok(terminal)
        })
        .collect::<Result<Vec<_>, SimError>>()?;

    Ok(Platform { router, terminals })
}

/// Queue uniform random traffic on every terminal.
///
/// Returns the total number of flits queued.
pub fn queue_uniform_traffic(
    platform: &Platform,
    config: &SimRouterConfig,
) -> Result<usize, SimError> {
    let num_terminals = platform.terminals.len();
    if num_terminals < 2 {
        return config_error!("uniform traffic needs at least 2 terminals");
    }
    if config.flits_per_packet == 0 {
        return config_error!("flits_per_packet must be > 0");
    }
    let depth = platform.router.input_queue_depth();
    if config.flits_per_packet > depth {
        return config_error!(
            "packets of {} flits do not fit input queues of {depth}",
            config.flits_per_packet
        );
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut num_flits = 0;
    for terminal in &platform.terminals {
        for _ in 0..config.packets_per_terminal {
            // Never send to self
            let mut destination = rng.gen_range(0..num_terminals - 1);
            if destination >= terminal.id() {
                destination += 1;
            }
            let vc = rng.gen_range(0..config.num_vcs);
            terminal.send_packet(destination, vec![destination], config.flits_per_packet, vc)?;
            num_flits += config.flits_per_packet;
        }
    }
    Ok(num_flits)
}

/// Results of a run.
#[derive(Clone, Debug)]
pub struct Summary {
    pub ticks: u64,
    pub flits_received: usize,
    pub packets_received: usize,

    /// Mean ticks from packet creation to arrival of its tail.
    pub mean_packet_latency: f64,

    pub counters: RouterCounters,
}

#[must_use]
pub fn summarise(engine: &Engine, platform: &Platform) -> Summary {
    let mut flits_received = 0;
    let mut packets_received = 0;
    let mut total_latency = 0;
    for terminal in &platform.terminals {
        for delivery in terminal.received() {
            flits_received += 1;
            if delivery.flit.is_tail() {
                packets_received += 1;
                total_latency += delivery.tick - delivery.flit.packet().created_at();
            }
        }
    }
    let mean_packet_latency = if packets_received == 0 {
        0.0
    } else {
        total_latency as f64 / packets_received as f64
    };

    Summary {
        ticks: engine.time_now(),
        flits_received,
        packets_received,
        mean_packet_latency,
        counters: platform.router.counters(),
    }
}
