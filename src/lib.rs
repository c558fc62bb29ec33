//! In-process tick profiler for tick-driven servers.
//!
//! The host drives [`Profiler::start_tick`] / [`Profiler::stop_tick`]
//! from its tick loop and wraps units of work in timers obtained from
//! [`Profiler::timer`]. The profiler aggregates per-tick measurements
//! into minute reports and bounded interval history, and uploads
//! gzip-compressed reports to a remote collector on request.

pub mod clock;
pub mod config;
pub mod constants;
pub mod export;
pub mod history;
pub mod profiler;
pub mod sysmetrics;
pub mod tick;
pub mod timing;

pub use config::ProfilerConfig;
pub use export::payload::HostInfo;
pub use export::{ReportOutcome, Requester};
pub use history::{HistoryRing, HistorySnapshot, MinuteReport};
pub use profiler::Profiler;
pub use tick::TickSample;
pub use timing::identity::TimerIdentity;
pub use timing::node::{NodeCounters, TimingGuard, TimingNode};
