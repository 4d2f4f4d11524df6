//! Per-bin bandwidth throttle
//!
//! Instead of keeping a window of read timestamps, each bin measures how long
//! the first read of a series takes (the calibration read) and treats that
//! rate as the per-connection ceiling. Every later read is delayed so that the
//! bytes read since the series began arrive no sooner than the configured
//! minimum milliseconds per byte allows.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Calibration {
    Pending,
    InProgress,
    Valid,
}

#[derive(Debug)]
struct ThrottleState {
    ref_count: usize,
    calibration: Calibration,
    /// Observed ms/byte of the calibration read
    rate_estimate: f64,
    series_start: Option<Instant>,
    /// Bytes requested or read in this series, including reads in flight
    total_bytes: i64,
}

/// Bandwidth throttle shared by every fetch in one bin
#[derive(Debug)]
pub struct BandwidthThrottle {
    bin: String,
    state: Mutex<ThrottleState>,
    calibrated: Notify,
}

fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

impl BandwidthThrottle {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            state: Mutex::new(ThrottleState {
                ref_count: 0,
                calibration: Calibration::Pending,
                rate_estimate: 0.0,
                series_start: None,
                total_bytes: 0,
            }),
            calibrated: Notify::new(),
        }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        // Plain counters; a panic elsewhere cannot leave them half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Notes the start of a fetch in this bin
    ///
    /// The first concurrent fetch starts a new series and needs a fresh
    /// calibration read.
    pub fn begin_fetch(&self) {
        let mut state = self.lock();
        if state.ref_count == 0 {
            state.calibration = Calibration::Pending;
            state.rate_estimate = 0.0;
            state.total_bytes = 0;
            state.series_start = None;
        }
        state.ref_count += 1;
    }

    /// Notes the end of a fetch in this bin
    ///
    /// # Returns
    ///
    /// * `true` - No fetch references the bin any more
    /// * `false` - Other fetches are still in progress
    pub fn end_fetch(&self) -> bool {
        let mut state = self.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        state.ref_count == 0
    }

    /// Waits until reading `byte_count` more bytes is allowed
    ///
    /// # Arguments
    ///
    /// * `byte_count` - Size of the read about to be performed
    /// * `min_ms_per_byte` - The bin's limit; 0.0 means unrestricted
    ///
    /// # Returns
    ///
    /// A ticket that must be finished with [`ReadTicket::end_read`]. A ticket
    /// dropped unfinished counts as a read of zero bytes; if it was the
    /// calibrating one, calibration is re-opened so that waiting readers are
    /// not stranded.
    pub async fn begin_read(self: &Arc<Self>, byte_count: usize, min_ms_per_byte: f64) -> ReadTicket {
        loop {
            let notified = self.calibrated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let deadline = {
                let mut state = self.lock();
                match state.calibration {
                    Calibration::Pending => {
                        state.calibration = Calibration::InProgress;
                        state.series_start = Some(now);
                        state.total_bytes += byte_count as i64;
                        return ReadTicket::new(self.clone(), byte_count, true, now);
                    }
                    Calibration::InProgress => None,
                    Calibration::Valid => {
                        state.total_bytes += byte_count as i64;
                        let series_start = state.series_start.unwrap_or(now);
                        let desired_end =
                            series_start + millis(state.total_bytes as f64 * min_ms_per_byte);
                        let estimated = millis(state.rate_estimate * byte_count as f64);
                        Some(desired_end.checked_sub(estimated).unwrap_or(now))
                    }
                }
            };

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if deadline > now {
                        tracing::trace!(
                            "Read wait on bin '{}' of {} ms",
                            self.bin,
                            (deadline - now).as_millis()
                        );
                        sleep_until(deadline).await;
                    }
                    return ReadTicket::new(self.clone(), byte_count, false, Instant::now());
                }
            }
        }
    }

    fn finish_read(&self, requested: usize, actual: usize, calibrating: bool) {
        let now = Instant::now();
        let mut state = self.lock();
        state.total_bytes += actual as i64 - requested as i64;

        if calibrating && state.calibration == Calibration::InProgress {
            let elapsed = state
                .series_start
                .map(|start| now.saturating_duration_since(start))
                .unwrap_or_default();
            state.rate_estimate = if actual == 0 {
                0.0
            } else {
                elapsed.as_secs_f64() * 1000.0 / actual as f64
            };
            state.calibration = Calibration::Valid;
            drop(state);
            self.calibrated.notify_waiters();
        }
    }

    fn abandon_calibration(&self, requested: usize) {
        let mut state = self.lock();
        if state.calibration == Calibration::InProgress {
            state.total_bytes -= requested as i64;
            state.calibration = Calibration::Pending;
            drop(state);
            self.calibrated.notify_waiters();
        }
    }

    /// Number of fetches currently referencing the bin
    pub fn ref_count(&self) -> usize {
        self.lock().ref_count
    }

    /// Whether a calibration read has completed in the current series
    pub fn is_calibrated(&self) -> bool {
        self.lock().calibration == Calibration::Valid
    }

    /// Current rate estimate in ms/byte
    pub fn rate_estimate(&self) -> f64 {
        self.lock().rate_estimate
    }
}

/// Permission for one read, returned by [`BandwidthThrottle::begin_read`]
#[derive(Debug)]
pub struct ReadTicket {
    throttle: Arc<BandwidthThrottle>,
    requested: usize,
    calibrating: bool,
    started: Instant,
    finished: bool,
}

impl ReadTicket {
    fn new(throttle: Arc<BandwidthThrottle>, requested: usize, calibrating: bool, started: Instant) -> Self {
        Self {
            throttle,
            requested,
            calibrating,
            started,
            finished: false,
        }
    }

    /// Whether this read calibrates the bin's rate estimate
    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    /// When the read was allowed to start
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Reports how many bytes the read actually produced
    pub fn end_read(mut self, actual: usize) {
        self.finished = true;
        self.throttle
            .finish_read(self.requested, actual, self.calibrating);
    }
}

impl Drop for ReadTicket {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.calibrating {
            self.throttle.abandon_calibration(self.requested);
        } else {
            self.throttle.finish_read(self.requested, 0, false);
        }
    }
}
