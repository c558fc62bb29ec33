//! Host memory and load sampling for minute reports.
//!
//! Reads the Linux procfs text interfaces directly; on any parse or I/O
//! failure the sample degrades to zero rather than surfacing an error
//! into tick accounting.

/// One memory sample, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySample {
    pub used: u64,
    pub free: u64,
}

/// Samples current memory usage from `/proc/meminfo`.
pub fn memory() -> MemorySample {
    let Ok(raw) = std::fs::read_to_string("/proc/meminfo") else {
        return MemorySample::default();
    };
    parse_meminfo(&raw).unwrap_or_default()
}

/// Samples the 1-minute load average from `/proc/loadavg`.
pub fn load_average() -> f64 {
    let Ok(raw) = std::fs::read_to_string("/proc/loadavg") else {
        return 0.0;
    };
    parse_loadavg(&raw).unwrap_or(0.0)
}

/// Parses `/proc/meminfo` text. Used = MemTotal - MemAvailable,
/// falling back to MemFree when MemAvailable is absent (old kernels).
fn parse_meminfo(text: &str) -> Option<MemorySample> {
    let mut total_kb = None;
    let mut available_kb = None;
    let mut free_kb = None;

    for line in text.lines() {
        let (key, rest) = line.split_once(':')?;
        let value_kb = rest
            .trim()
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());

        match key {
            "MemTotal" => total_kb = value_kb,
            "MemAvailable" => available_kb = value_kb,
            "MemFree" => free_kb = value_kb,
            _ => {}
        }

        if total_kb.is_some() && available_kb.is_some() && free_kb.is_some() {
            break;
        }
    }

    let total = total_kb? * 1024;
    let free = available_kb.or(free_kb)? * 1024;
    Some(MemorySample {
        used: total.saturating_sub(free),
        free,
    })
}

/// Parses `/proc/loadavg` text; the first field is the 1-minute average.
fn parse_loadavg(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse::<f64>().ok()
}
