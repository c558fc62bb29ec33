use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::constants::{MAX_HISTORY_FRAMES, MIN_HISTORY_INTERVAL};

/// Profiler configuration recognized by the subsystem.
///
/// Out-of-range values are clamped by [`ProfilerConfig::validate`], never
/// rejected: the profiler must come up with whatever the host hands it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilerConfig {
    /// Master switch. When off, `start`/`stop` degrade to a single branch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Enable fine-grained (nested) timers.
    #[serde(default)]
    pub verbose: bool,

    /// Ticks per history frame. Minimum: 1200.
    #[serde(default = "default_history_interval")]
    pub history_interval: u64,

    /// Total ticks of history to retain. Clamped to
    /// `history_interval * MAX_HISTORY_FRAMES` unless `override_frame_cap`.
    #[serde(default = "default_history_length")]
    pub history_length: u64,

    /// Lift the hard frame cap on `history_length`.
    #[serde(default)]
    pub override_frame_cap: bool,

    /// Dot-separated config paths removed from the exported config dump.
    #[serde(default)]
    pub hidden_config_paths: Vec<String>,

    /// Omit server name, motd and icon from exported reports.
    #[serde(default)]
    pub server_name_privacy: bool,

    /// Remote collector endpoint for report uploads.
    #[serde(default = "default_collector_url")]
    pub collector_url: String,

    /// HTTP timeout for the report upload. Default: 15s.
    #[serde(default = "default_export_timeout", with = "humantime_serde")]
    pub export_timeout: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verbose: false,
            history_interval: default_history_interval(),
            history_length: default_history_length(),
            override_frame_cap: false,
            hidden_config_paths: Vec::new(),
            server_name_privacy: false,
            collector_url: default_collector_url(),
            export_timeout: default_export_timeout(),
        }
    }
}

impl ProfilerConfig {
    /// Clamps out-of-range values in place, logging each adjustment.
    pub fn validate(&mut self) {
        if self.history_interval < MIN_HISTORY_INTERVAL {
            warn!(
                history_interval = self.history_interval,
                min = MIN_HISTORY_INTERVAL,
                "history_interval below minimum, clamping",
            );
            self.history_interval = MIN_HISTORY_INTERVAL;
        }

        if self.history_length < self.history_interval {
            warn!(
                history_length = self.history_length,
                history_interval = self.history_interval,
                "history_length below one interval, clamping",
            );
            self.history_length = self.history_interval;
        }

        let cap = self.history_interval * MAX_HISTORY_FRAMES;
        if !self.override_frame_cap && self.history_length > cap {
            warn!(
                history_length = self.history_length,
                cap,
                "history_length exceeds frame cap, clamping",
            );
            self.history_length = cap;
        }
    }

    /// Number of history frames retained by the ring.
    pub fn frame_capacity(&self) -> usize {
        ((self.history_length / self.history_interval).max(1)) as usize
    }
}

fn default_true() -> bool {
    true
}

fn default_history_interval() -> u64 {
    MIN_HISTORY_INTERVAL
}

fn default_history_length() -> u64 {
    MIN_HISTORY_INTERVAL * MAX_HISTORY_FRAMES
}

fn default_collector_url() -> String {
    "https://timings.example.org/post".to_string()
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(15)
}
