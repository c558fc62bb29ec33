//! Report payload assembly and its wire schema.
//!
//! The collector consumes a fixed JSON shape: camelCase keys, dense
//! integer id tables, and positional tuples for the hot repeated rows
//! (node counters and minute reports). Tuples omit their lag tail when
//! the node never saw a violated tick, which keeps typical payloads
//! small since most nodes never lag.

use std::collections::HashMap;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::config::ProfilerConfig;
use crate::constants::REPORT_VERSION;
use crate::history::{HistorySnapshot, MinuteReport};
use crate::sysmetrics;
use crate::tick::Aggregator;
use crate::timing::node::NodeCounters;
use crate::timing::registry::Registry;

/// Host-provided server metadata embedded in every report.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub server_name: String,
    pub server_version: String,
    pub motd: String,
    pub online_mode: bool,
    /// Base64 favicon, when the host has one.
    pub icon: Option<String>,
    pub max_sessions: u32,
    /// Opaque plugin/extension listing, already JSON-shaped by the host.
    pub plugins: Value,
    pub worlds: Vec<String>,
    /// Full host config dump; filtered against `hidden_config_paths`
    /// before it leaves the process.
    pub config_dump: Value,
    /// Entity/handler type names referenced by timer names.
    pub type_names: Vec<String>,
}

/// Interns strings to dense ids in first-seen order.
#[derive(Debug, Default)]
pub struct IdTable {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl IdTable {
    pub fn get_or_assign(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }

    pub fn into_names(self) -> Vec<String> {
        self.names
    }
}

/// `[count, total]`, extended to `[count, total, lagCount, lagTotal]`
/// when any violated tick was recorded.
pub struct CountTuple(pub NodeCounters);

impl Serialize for CountTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let c = &self.0;
        let len = if c.lag_count > 0 { 4 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&c.count)?;
        seq.serialize_element(&c.total)?;
        if c.lag_count > 0 {
            seq.serialize_element(&c.lag_count)?;
            seq.serialize_element(&c.lag_total)?;
        }
        seq.end()
    }
}

/// `[groupId, timerId, count, total]` plus the optional lag tail.
pub struct NodeTuple {
    pub group_id: u32,
    pub timer_id: u32,
    pub counters: NodeCounters,
}

impl Serialize for NodeTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let c = &self.counters;
        let len = if c.lag_count > 0 { 6 } else { 4 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.group_id)?;
        seq.serialize_element(&self.timer_id)?;
        seq.serialize_element(&c.count)?;
        seq.serialize_element(&c.total)?;
        if c.lag_count > 0 {
            seq.serialize_element(&c.lag_count)?;
            seq.serialize_element(&c.lag_total)?;
        }
        seq.end()
    }
}

/// `[epoch, tps, avgPing, fullTick, tickCounts, usedMem, freeMem, load]`.
pub struct MinuteTuple(pub MinuteReport);

impl Serialize for MinuteTuple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let m = &self.0;
        let mut seq = serializer.serialize_seq(Some(8))?;
        seq.serialize_element(&m.epoch_secs)?;
        seq.serialize_element(&m.tps)?;
        seq.serialize_element(&m.avg_ping_ms)?;
        seq.serialize_element(&CountTuple(m.full_tick))?;
        seq.serialize_element(&[
            m.ticks.timed,
            m.ticks.player,
            m.ticks.entity,
            m.ticks.activated_entity,
            m.ticks.block_entity,
        ])?;
        seq.serialize_element(&m.avg_used_memory)?;
        seq.serialize_element(&m.avg_free_memory)?;
        seq.serialize_element(&m.load_avg)?;
        seq.end()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub start: i64,
    pub end: i64,
    pub total_ticks: u64,
    pub minutes: Vec<MinuteTuple>,
    pub nodes: Vec<NodeTuple>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub cpus: usize,
    pub total_memory: u64,
}

/// Timer id -> `[groupId, name]`, indexed by dense timer id.
pub struct HandlerRef {
    pub group_id: u32,
    pub name: String,
}

impl Serialize for HandlerRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.group_id)?;
        seq.serialize_element(&self.name)?;
        seq.end()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMap {
    pub groups: Vec<String>,
    pub handlers: Vec<HandlerRef>,
    pub worlds: Vec<String>,
    pub types: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub version: u32,
    /// Profiling session start, milliseconds since the Unix epoch.
    pub start: i64,
    /// Assembly time, milliseconds since the Unix epoch.
    pub end: i64,
    pub sample_time_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_mode: Option<bool>,
    pub server_version: String,
    pub max_sessions: u32,
    pub system: SystemInfo,
    pub idmap: IdMap,
    pub plugins: Value,
    pub config: Value,
    pub data: Vec<Frame>,
}

/// Builds the full payload from the closed history frames plus a live
/// capture of the still-open interval. Runs on the tick thread so every
/// counter read is a stable snapshot.
pub fn assemble(
    cfg: &ProfilerConfig,
    host: &HostInfo,
    registry: &Registry,
    aggregator: &Aggregator,
) -> ReportPayload {
    let mut groups = IdTable::default();

    // Dense timer id -> (group id, name), in registration order.
    let handlers: Vec<HandlerRef> = registry
        .all_nodes()
        .iter()
        .map(|node| HandlerRef {
            group_id: groups.get_or_assign(&node.identity().group),
            name: node.identity().name.to_string(),
        })
        .collect();

    let mut data: Vec<Frame> = aggregator
        .ring()
        .frames()
        .map(|snap| frame_from(snap, &handlers))
        .collect();
    let live = aggregator.fresh_snapshot();
    if live.total_ticks > 0 {
        data.push(frame_from(&live, &handlers));
    }

    let mut config = host.config_dump.clone();
    filter_config(&mut config, &cfg.hidden_config_paths);

    let (server, motd, icon, online_mode) = if cfg.server_name_privacy {
        (None, None, None, None)
    } else {
        (
            Some(host.server_name.clone()),
            Some(host.motd.clone()),
            host.icon.clone(),
            Some(host.online_mode),
        )
    };

    ReportPayload {
        version: REPORT_VERSION,
        start: aggregator.session_start_epoch_ms(),
        end: chrono::Utc::now().timestamp_millis(),
        sample_time_seconds: aggregator.session_elapsed().as_secs(),
        server,
        motd,
        icon,
        online_mode,
        server_version: host.server_version.clone(),
        max_sessions: host.max_sessions,
        system: SystemInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            cpus: std::thread::available_parallelism().map_or(1, |n| n.get()),
            total_memory: {
                let m = sysmetrics::memory();
                m.used + m.free
            },
        },
        idmap: IdMap {
            groups: groups.into_names(),
            handlers,
            worlds: host.worlds.clone(),
            types: host.type_names.clone(),
        },
        plugins: host.plugins.clone(),
        config,
        data,
    }
}

fn frame_from(snap: &HistorySnapshot, handlers: &[HandlerRef]) -> Frame {
    Frame {
        start: snap.start_epoch_ms,
        end: snap.end_epoch_ms,
        total_ticks: snap.total_ticks,
        minutes: snap.minutes.iter().cloned().map(MinuteTuple).collect(),
        nodes: snap
            .entries
            .iter()
            .map(|entry| NodeTuple {
                group_id: handlers
                    .get(entry.timer_id as usize)
                    .map_or(0, |h| h.group_id),
                timer_id: entry.timer_id,
                counters: entry.counters,
            })
            .collect(),
    }
}

/// Removes each dot-separated path from the config dump in place.
/// Missing paths and non-object intermediates are ignored.
pub fn filter_config(config: &mut Value, hidden_paths: &[String]) {
    for path in hidden_paths {
        remove_path(config, path);
    }
}

fn remove_path(value: &mut Value, path: &str) {
    let mut current = value;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.remove(segment);
            return;
        }
        match map.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}
