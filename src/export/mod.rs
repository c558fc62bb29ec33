pub mod http;
pub mod payload;

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ProfilerConfig;
use crate::constants::{EXPORT_COOLDOWN, EXPORT_WARMUP};
use crate::tick::Aggregator;
use crate::timing::registry::Registry;

use self::payload::{HostInfo, ReportPayload};

/// Terminal result of one report request. Every requester receives
/// exactly one of these.
#[derive(Debug, Clone)]
pub enum ReportOutcome {
    /// Admission denied; nothing was assembled or sent.
    Rejected { message: String },
    /// Uploaded and accepted; `url` is the collector's viewer page.
    Success { url: String },
    /// Assembled and sent, but the collector or transport failed.
    Failure { message: String },
}

/// A party awaiting a report, usually a command sender. Requesters that
/// cannot outlive the current call (remote console sessions) opt into
/// synchronous delivery and are notified before the upload call returns.
pub trait Requester: Send + 'static {
    fn name(&self) -> &str;

    fn sync_delivery(&self) -> bool {
        false
    }

    fn notify(&self, outcome: ReportOutcome);
}

/// Queues report requests and runs the export state machine.
///
/// Admission and payload assembly happen on the tick thread inside
/// [`Pipeline::process_pending`]; only the HTTP upload leaves it, on a
/// short-lived worker thread, unless a requester demands sync delivery.
pub struct Pipeline {
    pending: Mutex<Vec<Box<dyn Requester>>>,
    last_export: Arc<Mutex<Option<Instant>>>,
    profiling_start: Mutex<Instant>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            last_export: Arc::new(Mutex::new(None)),
            profiling_start: Mutex::new(Instant::now()),
            worker: Mutex::new(None),
        }
    }

    /// Queues a requester; serviced at the end of the next tick.
    pub fn request(&self, requester: Box<dyn Requester>) {
        debug!(requester = requester.name(), "report requested");
        self.pending.lock().push(requester);
    }

    /// Restarts the warm-up window. Called when profiling state is
    /// fully reset, so young sessions never export a near-empty report.
    pub(crate) fn mark_profiling_started(&self) {
        *self.profiling_start.lock() = Instant::now();
    }

    /// Services queued requests: admission, assembly, then upload.
    /// Runs on the tick thread after tick accounting has completed.
    pub(crate) fn process_pending(
        &self,
        cfg: &ProfilerConfig,
        host: &HostInfo,
        registry: &Registry,
        aggregator: &Aggregator,
    ) {
        let mut requesters = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };

        // At most one upload in flight. Requests that arrive while the
        // worker is still posting wait for the next tick.
        {
            let mut worker = self.worker.lock();
            if let Some(handle) = worker.take() {
                if !handle.is_finished() {
                    *worker = Some(handle);
                    self.pending.lock().append(&mut requesters);
                    return;
                }
                let _ = handle.join();
            }
        }

        if let Some(message) = self.admission_rejection() {
            warn!(%message, requesters = requesters.len(), "report request rejected");
            for requester in requesters {
                requester.notify(ReportOutcome::Rejected {
                    message: message.clone(),
                });
            }
            return;
        }

        let payload = payload::assemble(cfg, host, registry, aggregator);
        let url = cfg.collector_url.clone();
        let timeout = cfg.export_timeout;
        let last_export = Arc::clone(&self.last_export);

        // Remote console requesters are gone once this call returns, so
        // any one of them forces the upload inline.
        if requesters.iter().any(|r| r.sync_delivery()) {
            upload_and_notify(&url, timeout, &payload, requesters, &last_export);
        } else {
            *self.worker.lock() = Some(std::thread::spawn(move || {
                upload_and_notify(&url, timeout, &payload, requesters, &last_export);
            }));
        }
    }

    /// Joins any in-flight upload. Pending requesters that were never
    /// serviced are dropped without notification.
    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn admission_rejection(&self) -> Option<String> {
        let profiling_elapsed = self.profiling_start.lock().elapsed();
        if profiling_elapsed < EXPORT_WARMUP {
            let wait = wait_secs(EXPORT_WARMUP, profiling_elapsed);
            return Some(format!(
                "profiler is still warming up, retry in {wait}s"
            ));
        }

        if let Some(last) = *self.last_export.lock() {
            let since_last = last.elapsed();
            if since_last < EXPORT_COOLDOWN {
                let wait = wait_secs(EXPORT_COOLDOWN, since_last);
                return Some(format!(
                    "a report was just generated, retry in {wait}s"
                ));
            }
        }

        None
    }
}

fn upload_and_notify(
    url: &str,
    timeout: Duration,
    payload: &ReportPayload,
    requesters: Vec<Box<dyn Requester>>,
    last_export: &Mutex<Option<Instant>>,
) {
    let outcome = match http::upload(url, timeout, payload) {
        Ok(viewer_url) => {
            info!(url = %viewer_url, "report uploaded");
            ReportOutcome::Success { url: viewer_url }
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "report upload failed");
            ReportOutcome::Failure {
                message: format!("{err:#}"),
            }
        }
    };

    // A failed upload still consumed a slot at the collector; the
    // cooldown runs from completion either way.
    *last_export.lock() = Some(Instant::now());

    for requester in requesters {
        requester.notify(outcome.clone());
    }
}

/// Seconds left in `window` after `elapsed`, rounded up so the advice
/// "retry in Ns" is never early.
fn wait_secs(window: Duration, elapsed: Duration) -> u64 {
    let remaining_ms = (window.as_millis() as u64).saturating_sub(elapsed.as_millis() as u64);
    remaining_ms.div_ceil(1_000)
}
