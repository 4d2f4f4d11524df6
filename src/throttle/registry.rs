//! Registry of per-bin pools and throttles
//!
//! One registry is created per engine and shared by every fetch. Bins are
//! created on first reference and removed by [`ThrottleRegistry::flush_idle`]
//! once nothing refers to them. Admission of a connection that belongs to
//! several bins locks the bins' pools in name order, so two admissions can
//! never wait on each other, and either reserves a slot in every bin or in
//! none of them.

use crate::throttle::bandwidth::{BandwidthThrottle, ReadTicket};
use crate::throttle::description::ThrottleDescription;
use crate::throttle::pool::{ConnectionPool, IdleSlot, PoolDecision};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

/// Idle timeout used by periodic flushing
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle timeouts tried, in order, when the global connection limit is reached
const GLOBAL_LIMIT_FLUSH_TIMEOUTS: [Duration; 5] = [
    Duration::from_secs(64),
    Duration::from_secs(16),
    Duration::from_secs(4),
    Duration::from_secs(1),
    Duration::ZERO,
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared state of one bin
#[derive(Debug)]
pub struct Bin<T> {
    name: String,
    pool: Mutex<ConnectionPool<T>>,
    throttle: Arc<BandwidthThrottle>,
}

impl<T> Bin<T> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pool: Mutex::new(ConnectionPool::new()),
            throttle: Arc::new(BandwidthThrottle::new(name)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Snapshot of a bin's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinStats {
    pub in_use: usize,
    pub idle: usize,
    pub fetches: usize,
}

/// Counts one live connection until dropped
#[derive(Debug)]
pub struct LiveToken {
    live: Arc<AtomicUsize>,
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The connection side of a successful admission
#[derive(Debug)]
pub enum Slot<T> {
    /// An idle connection with the same binding
    Reused(T),
    /// Nothing to reuse; the caller opens a connection and keeps the token with it
    New(LiveToken),
}

/// Result of [`ThrottleRegistry::try_acquire`]
#[derive(Debug)]
pub enum Admission<T> {
    Granted { bins: BinSet<T>, slot: Slot<T> },
    /// Some bin, or the global limit, has no room; retry after a backoff
    Blocked,
    /// Some bin fetched too recently; retry after the given wait
    TooSoon(Duration),
}

/// Process-wide map from bin name to pool and throttle
#[derive(Debug)]
pub struct ThrottleRegistry<T> {
    bins: Mutex<HashMap<String, Arc<Bin<T>>>>,
    live: Arc<AtomicUsize>,
    global_limit: usize,
}

impl<T> ThrottleRegistry<T> {
    /// Creates a registry
    ///
    /// # Arguments
    ///
    /// * `global_limit` - Maximum live connections across all bins
    pub fn new(global_limit: usize) -> Self {
        Self {
            bins: Mutex::new(HashMap::new()),
            live: Arc::new(AtomicUsize::new(0)),
            global_limit: global_limit.max(1),
        }
    }

    fn bin(&self, name: &str) -> Arc<Bin<T>> {
        lock(&self.bins)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bin::new(name)))
            .clone()
    }

    /// Number of live connections
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Counts a new connection, unless the global limit is already reached
    fn try_reserve_live(&self) -> Option<LiveToken> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.global_limit).then_some(live + 1)
            })
            .ok()
            .map(|_| LiveToken {
                live: self.live.clone(),
            })
    }

    /// Tries to admit one fetch into every named bin
    ///
    /// # Arguments
    ///
    /// * `bin_names` - Every bin the connection belongs to (duplicates ignored)
    /// * `description` - Limits per bin
    /// * `matcher` - Whether an idle connection has exactly the binding wanted
    ///
    /// # Returns
    ///
    /// * `Granted` - A slot is reserved in every bin and the fetch start is recorded
    /// * `Blocked` / `TooSoon` - Nothing is reserved in any bin
    pub fn try_acquire(
        &self,
        bin_names: &[String],
        description: &ThrottleDescription,
        matcher: &dyn Fn(&T) -> bool,
    ) -> Admission<T> {
        if self.live_connections() >= self.global_limit {
            self.relieve_global_limit();
        }

        let mut names: Vec<&str> = bin_names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        let bins: Vec<Arc<Bin<T>>> = names.iter().map(|name| self.bin(name)).collect();

        let mut pools: Vec<MutexGuard<'_, ConnectionPool<T>>> =
            bins.iter().map(|bin| lock(&bin.pool)).collect();

        let mut reused: Option<T> = None;
        for index in 0..bins.len() {
            let bin = &bins[index];
            let max = description.max_open_connections(&bin.name);
            let admitted = if index == 0 {
                match pools[index].find_or_reserve(max, matcher) {
                    PoolDecision::Reused(connection) => {
                        reused = Some(connection);
                        true
                    }
                    PoolDecision::CreateNew => true,
                    PoolDecision::Blocked => false,
                }
            } else {
                pools[index].reserve(max)
            };

            if !admitted {
                tracing::debug!("Bin '{}' has no free connection", bin.name);
                Self::roll_back(&mut pools, index, reused);
                return Admission::Blocked;
            }
        }

        let slot = match reused {
            Some(connection) => Slot::Reused(connection),
            None => match self.try_reserve_live() {
                Some(token) => Slot::New(token),
                None => {
                    tracing::debug!(
                        "Global connection limit of {} reached",
                        self.global_limit
                    );
                    let reserved = pools.len();
                    Self::roll_back(&mut pools, reserved, None);
                    return Admission::Blocked;
                }
            },
        };

        let now = Instant::now();
        let wait = bins
            .iter()
            .zip(pools.iter())
            .filter_map(|(bin, pool)| {
                let min_interval = Duration::from_millis(description.min_ms_per_fetch(&bin.name));
                pool.last_fetch()
                    .map(|last| (last + min_interval).saturating_duration_since(now))
            })
            .max()
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            // dropping a new slot's token uncounts it
            let reused = match slot {
                Slot::Reused(connection) => Some(connection),
                Slot::New(_) => None,
            };
            let reserved = pools.len();
            Self::roll_back(&mut pools, reserved, reused);
            return Admission::TooSoon(wait);
        }

        for pool in pools.iter_mut() {
            pool.note_fetch_start(now);
        }
        drop(pools);

        let ms_per_byte = bins
            .iter()
            .map(|bin| description.min_ms_per_byte(&bin.name))
            .collect();

        Admission::Granted {
            bins: BinSet {
                bins,
                ms_per_byte,
                fetching: false,
                settled: false,
            },
            slot,
        }
    }

    /// Undoes the first `reserved` reservations of an admission attempt
    fn roll_back(pools: &mut [MutexGuard<'_, ConnectionPool<T>>], reserved: usize, reused: Option<T>) {
        for pool in pools[..reserved].iter_mut() {
            pool.cancel_reservation();
        }
        // A reused connection has exactly this bin set, so it was idle in all of them.
        if let Some(connection) = reused {
            let slot = Arc::new(IdleSlot::new(connection, Instant::now()));
            for pool in pools.iter_mut() {
                pool.restore_idle(slot.clone());
            }
        }
    }

    fn relieve_global_limit(&self) {
        for timeout in GLOBAL_LIMIT_FLUSH_TIMEOUTS {
            if self.live_connections() < self.global_limit {
                return;
            }
            self.flush_idle(timeout);
        }
    }

    /// Destroys idle connections older than `idle_timeout` and drops unused bins
    pub fn flush_idle(&self, idle_timeout: Duration) {
        let now = Instant::now();
        let mut bins = lock(&self.bins);
        bins.retain(|_, bin| {
            let empty = lock(&bin.pool).flush_idle(idle_timeout, now);
            // Only the map refers to it: no fetch or connection holds the bin.
            !(empty && Arc::strong_count(bin) == 1 && bin.throttle.ref_count() == 0)
        });
    }

    /// Counters for one bin, if it exists
    pub fn bin_stats(&self, name: &str) -> Option<BinStats> {
        let bin = lock(&self.bins).get(name).cloned()?;
        let pool = lock(&bin.pool);
        Some(BinStats {
            in_use: pool.in_use(),
            idle: pool.idle_count(),
            fetches: bin.throttle.ref_count(),
        })
    }

    /// Names of all bins currently tracked
    pub fn bin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.bins).keys().cloned().collect();
        names.sort();
        names
    }
}

/// The bins one admitted connection belongs to
///
/// Holds a reserved slot in every bin. Exactly one of [`BinSet::release`] or
/// [`BinSet::discard`] gives the slots back; dropping the set without either
/// discards. A fetch begun with [`BinSet::begin_fetch`] is ended on drop too.
#[derive(Debug)]
pub struct BinSet<T> {
    bins: Vec<Arc<Bin<T>>>,
    ms_per_byte: Vec<f64>,
    fetching: bool,
    settled: bool,
}

impl<T> BinSet<T> {
    /// Sorted bin names
    pub fn names(&self) -> Vec<String> {
        self.bins.iter().map(|bin| bin.name().to_string()).collect()
    }

    /// Registers a fetch with every bin's bandwidth throttle
    pub fn begin_fetch(&mut self) {
        if !self.fetching {
            for bin in &self.bins {
                bin.throttle.begin_fetch();
            }
            self.fetching = true;
        }
    }

    /// Ends the fetch registered by `begin_fetch`
    pub fn end_fetch(&mut self) {
        if self.fetching {
            for bin in &self.bins {
                bin.throttle.end_fetch();
            }
            self.fetching = false;
        }
    }

    /// Waits for every bin to allow a read of `byte_count` bytes
    pub async fn begin_read(&self, byte_count: usize) -> Vec<ReadTicket> {
        let mut tickets = Vec::with_capacity(self.bins.len());
        for (bin, ms_per_byte) in self.bins.iter().zip(&self.ms_per_byte) {
            tickets.push(bin.throttle.begin_read(byte_count, *ms_per_byte).await);
        }
        tickets
    }

    /// Reports the bytes a read produced to every bin
    pub fn end_read(tickets: Vec<ReadTicket>, actual: usize) {
        for ticket in tickets {
            ticket.end_read(actual);
        }
    }

    /// Returns the connection to every bin's idle set
    pub fn release(mut self, connection: T) {
        let slot = Arc::new(IdleSlot::new(connection, Instant::now()));
        for bin in &self.bins {
            lock(&bin.pool).release(slot.clone());
        }
        self.settled = true;
    }

    /// Gives the reserved slots back; the connection is being destroyed
    pub fn discard(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if !self.settled {
            for bin in &self.bins {
                lock(&bin.pool).cancel_reservation();
            }
            self.settled = true;
        }
    }
}

impl<T> Drop for BinSet<T> {
    fn drop(&mut self) {
        self.end_fetch();
        self.cancel();
    }
}
