// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Settings for the router and its parts.
//!
//! All settings are plain [serde] structures. They are normally loaded with
//! [`load_settings`] which reads a TOML file and then applies any
//! `FLITSIM_`-prefixed environment variables (nested keys are separated by
//! `__`, for example `FLITSIM_TRANSFER_LATENCY=2`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use flitsim_engine::config_error;
use flitsim_engine::types::{SimError, SimResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "FLITSIM_";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionStyle {
    /// Report the number of occupied slots.
    #[default]
    Absolute,

    /// Report occupancy as a fraction of the buffer size.
    Relative,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionMode {
    /// Status of the requested output VC.
    #[default]
    Vc,

    /// Average status over all VCs of the requested output port.
    Port,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CongestionStatusSettings {
    pub style: CongestionStyle,
    pub mode: CongestionMode,
}

/// How much credit a request needs before it can be granted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// One credit per flit.
    FlitBuffer,

    /// A head flit needs credit for its whole packet.
    #[default]
    PacketBuffer,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterPolicy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    Random,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArbiterSettings {
    pub policy: ArbiterPolicy,

    /// Per-client weights for `weighted_round_robin`. Empty means all 1.
    pub weights: Vec<usize>,

    /// Seed for the `random` policy.
    pub seed: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrossbarSchedulerSettings {
    pub flow_control: FlowControl,

    /// Keep a crossbar port reserved for a packet from head to tail.
    pub packet_lock: bool,

    /// Number of request/grant/accept rounds per cycle.
    pub iterations: usize,

    pub arbiter: ArbiterSettings,
}

impl Default for CrossbarSchedulerSettings {
    fn default() -> Self {
        Self {
            flow_control: FlowControl::PacketBuffer,
            packet_lock: true,
            iterations: 1,
            arbiter: ArbiterSettings::default(),
        }
    }
}

impl CrossbarSchedulerSettings {
    pub fn validate(&self) -> SimResult {
        if self.iterations == 0 {
            return config_error!("crossbar scheduler iterations must be > 0");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrossbarSettings {
    /// Traversal time in cycles of the crossbar clock.
    pub latency: u64,
}

impl Default for CrossbarSettings {
    fn default() -> Self {
        Self { latency: 1 }
    }
}

impl CrossbarSettings {
    pub fn validate(&self) -> SimResult {
        if self.latency == 0 {
            return config_error!("crossbar latency must be > 0");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSettings {
    /// Flight time in channel cycles.
    pub latency: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { latency: 1 }
    }
}

/// Candidate filtering applied by an input queue to a routing response.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMode {
    /// Request every candidate.
    All,

    /// Keep the candidates with the fewest hops.
    #[default]
    Minimal,

    /// Fewest hops, then lowest congestion status.
    Adaptive,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingSettings {
    /// Name of the routing algorithm.
    pub algorithm: String,

    /// Cycles between a request and its response.
    pub latency: u64,

    /// Offer every permitted VC rather than one.
    pub all_vcs: bool,

    /// Use a fixed tie-break rather than the seeded generator.
    pub deterministic: bool,

    /// Fat-tree: only climb as high as the common ancestor.
    pub least_common_ancestor: bool,

    pub seed: u64,

    pub reduction: ReductionMode,

    /// Number of terminal ports per router. Zero means all ports.
    pub concentration: usize,

    /// Torus: number of routers in each dimension.
    pub dimension_widths: Vec<usize>,

    /// Fat-tree: `[down, up]` port counts of each level, leaf level first.
    pub radices: Vec<[usize; 2]>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            algorithm: "direct".to_string(),
            latency: 1,
            all_vcs: true,
            deterministic: true,
            least_common_ancestor: true,
            seed: 0,
            reduction: ReductionMode::Minimal,
            concentration: 0,
            dimension_widths: Vec::new(),
            radices: Vec::new(),
        }
    }
}

/// Settings of the router that schedules ingress to egress transfers.
///
/// Its credits are unbounded so the flow control has no effect.
fn transfer_scheduler_defaults() -> CrossbarSchedulerSettings {
    CrossbarSchedulerSettings {
        flow_control: FlowControl::FlitBuffer,
        packet_lock: false,
        ..CrossbarSchedulerSettings::default()
    }
}

/// Input queue depth derived from the latency of the input channel.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputQueueTailoring {
    /// Flits buffered per channel cycle of latency.
    pub mult: f64,
    pub min: usize,
    pub max: usize,
}

impl InputQueueTailoring {
    #[must_use]
    pub fn depth(&self, channel_latency: u64) -> usize {
        tailored_buffer_length(self.mult, self.min, self.max, channel_latency)
    }

    pub fn validate(&self) -> SimResult {
        if !self.mult.is_finite() || self.mult <= 0.0 {
            return config_error!("input_queue_tailoring.mult must be > 0, got {}", self.mult);
        }
        if self.min == 0 || self.min > self.max {
            return config_error!(
                "input_queue_tailoring needs 0 < min <= max, got min {} max {}",
                self.min,
                self.max
            );
        }
        Ok(())
    }
}

/// `ceil(channel_latency * mult)` clamped to `[min, max]`.
#[must_use]
pub fn tailored_buffer_length(mult: f64, min: usize, max: usize, channel_latency: u64) -> usize {
    let depth = (channel_latency as f64 * mult).ceil() as usize;
    depth.min(max).max(min)
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSettings {
    /// Core cycles from a granted transfer to arrival at the output queue.
    pub transfer_latency: u64,

    /// Flits buffered per input VC.
    ///
    /// Replaced by [`tailored_to`](Self::tailored_to) when
    /// `input_queue_tailoring` is set.
    pub input_queue_depth: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_queue_tailoring: Option<InputQueueTailoring>,

    #[serde(default)]
    pub congestion_status: CongestionStatusSettings,

    #[serde(default)]
    pub output_crossbar_scheduler: CrossbarSchedulerSettings,

    #[serde(default)]
    pub output_crossbar: CrossbarSettings,

    #[serde(default = "transfer_scheduler_defaults")]
    pub transfer_scheduler: CrossbarSchedulerSettings,
}

impl RouterSettings {
    /// Router settings with defaults for everything but the required values.
    #[must_use]
    pub fn new(transfer_latency: u64, input_queue_depth: usize) -> Self {
        Self {
            transfer_latency,
            input_queue_depth,
            input_queue_tailoring: None,
            congestion_status: CongestionStatusSettings::default(),
            output_crossbar_scheduler: CrossbarSchedulerSettings::default(),
            output_crossbar: CrossbarSettings::default(),
            transfer_scheduler: transfer_scheduler_defaults(),
        }
    }

    pub fn validate(&self) -> SimResult {
        if self.transfer_latency == 0 {
            return config_error!("transfer_latency must be > 0");
        }
        if self.input_queue_depth == 0 {
            return config_error!("input_queue_depth must be > 0");
        }
        if let Some(tailoring) = &self.input_queue_tailoring {
            tailoring.validate()?;
        }
        self.output_crossbar_scheduler.validate()?;
        self.transfer_scheduler.validate()?;
        self.output_crossbar.validate()
    }

    /// These settings with the input queue depth derived from
    /// `channel_latency` if tailoring is set.
    #[must_use]
    pub fn tailored_to(&self, channel_latency: u64) -> Self {
        let mut settings = self.clone();
        if let Some(tailoring) = &self.input_queue_tailoring {
            settings.input_queue_depth = tailoring.depth(channel_latency);
        }
        settings
    }
}

/// A [`Figment`] reading `path` (if given) then the environment.
#[must_use]
pub fn settings_figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Extract settings, turning any failure into a configuration error.
pub fn extract_settings<T: DeserializeOwned>(figment: &Figment) -> Result<T, SimError> {
    figment
        .extract()
        .map_err(|e| SimError::Config(e.to_string()))
}

/// Load settings from a TOML file with environment overrides.
pub fn load_settings<T: DeserializeOwned>(path: &Path) -> Result<T, SimError> {
    if !path.exists() {
        return config_error!("settings file {} not found", path.display());
    }
    extract_settings(&settings_figment(Some(path)))
}
