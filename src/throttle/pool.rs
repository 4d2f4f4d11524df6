//! Per-bin connection pool accounting
//!
//! A pool counts the connections of its bin that are signed out (`in_use`)
//! and keeps the idle ones. A connection that belongs to several bins is idle
//! in all of them at once, so idle connections live in shared [`IdleSlot`]s:
//! whichever bin claims the slot first takes the connection, and the other
//! bins drop the empty slot the next time they look at it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

/// An idle connection shared by every bin it belongs to
#[derive(Debug)]
pub struct IdleSlot<T> {
    connection: Mutex<Option<T>>,
    since: Instant,
}

impl<T> IdleSlot<T> {
    pub fn new(connection: T, since: Instant) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
            since,
        }
    }

    /// Takes the connection out of the slot; `None` if another bin got it first
    pub fn claim(&self) -> Option<T> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn is_vacant(&self) -> bool {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    fn matches(&self, matcher: &dyn Fn(&T) -> bool) -> bool {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(matcher)
            .unwrap_or(false)
    }

    /// When the connection was returned to the pool
    pub fn since(&self) -> Instant {
        self.since
    }
}

/// Outcome of [`ConnectionPool::find_or_reserve`]
#[derive(Debug)]
pub enum PoolDecision<T> {
    /// A matching idle connection; one slot is now reserved for it
    Reused(T),
    /// No usable idle connection; one slot is reserved for a new one
    CreateNew,
    /// The bin is at its limit and nothing idle can be evicted
    Blocked,
}

/// Connection accounting for one bin
#[derive(Debug)]
pub struct ConnectionPool<T> {
    in_use: usize,
    idle: VecDeque<Arc<IdleSlot<T>>>,
    last_fetch: Option<Instant>,
}

impl<T> Default for ConnectionPool<T> {
    fn default() -> Self {
        Self {
            in_use: 0,
            idle: VecDeque::new(),
            last_fetch: None,
        }
    }
}

impl<T> ConnectionPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(&mut self) {
        self.idle.retain(|slot| !slot.is_vacant());
    }

    /// Evicts idle connections, oldest first, until the bin fits `max`
    fn make_room(&mut self, max: usize) -> bool {
        self.purge();
        while self.in_use + self.idle.len() > max {
            match self.idle.pop_front() {
                Some(slot) => {
                    drop(slot.claim());
                }
                None => return false,
            }
        }
        true
    }

    /// Reserves a slot, reusing an idle connection when one matches
    ///
    /// # Arguments
    ///
    /// * `max` - The bin's current connection limit (`None` for unlimited)
    /// * `matcher` - Whether an idle connection has the exact binding wanted
    ///
    /// # Returns
    ///
    /// * `Reused(conn)` - A matching idle connection, removed from every bin's idle set
    /// * `CreateNew` - The caller should open a connection; a non-matching idle one may have been destroyed
    /// * `Blocked` - Nothing was reserved
    pub fn find_or_reserve(&mut self, max: Option<usize>, matcher: &dyn Fn(&T) -> bool) -> PoolDecision<T> {
        let max = max.unwrap_or(usize::MAX);
        if !self.make_room(max) || self.in_use + 1 > max {
            return PoolDecision::Blocked;
        }

        while let Some(position) = self.idle.iter().position(|slot| slot.matches(matcher)) {
            if let Some(slot) = self.idle.remove(position) {
                if let Some(connection) = slot.claim() {
                    self.in_use += 1;
                    return PoolDecision::Reused(connection);
                }
            }
        }

        // The connection a new one would replace
        if let Some(slot) = self.idle.pop_front() {
            drop(slot.claim());
        }
        self.in_use += 1;
        PoolDecision::CreateNew
    }

    /// Reserves a slot without looking for a connection to reuse
    ///
    /// # Returns
    ///
    /// * `true` - The slot is reserved
    /// * `false` - The bin is at its limit; nothing was reserved
    pub fn reserve(&mut self, max: Option<usize>) -> bool {
        let max = max.unwrap_or(usize::MAX);
        self.purge();
        if self.in_use + 1 > max {
            return false;
        }
        while self.in_use + 1 + self.idle.len() > max {
            match self.idle.pop_front() {
                Some(slot) => drop(slot.claim()),
                None => break,
            }
        }
        self.in_use += 1;
        true
    }

    /// Gives back a reserved slot without returning a connection to the pool
    pub fn cancel_reservation(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Moves a connection from in use to idle
    pub fn release(&mut self, slot: Arc<IdleSlot<T>>) {
        self.in_use = self.in_use.saturating_sub(1);
        self.idle.push_back(slot);
    }

    /// Puts a reused connection's slot back after a failed admission
    pub fn restore_idle(&mut self, slot: Arc<IdleSlot<T>>) {
        self.idle.push_back(slot);
    }

    /// Destroys idle connections inactive for longer than `idle_timeout`
    ///
    /// # Returns
    ///
    /// `true` if the bin has neither idle nor in-use connections left
    pub fn flush_idle(&mut self, idle_timeout: Duration, now: Instant) -> bool {
        self.purge();
        self.idle.retain(|slot| {
            if now.saturating_duration_since(slot.since()) >= idle_timeout {
                drop(slot.claim());
                false
            } else {
                true
            }
        });
        self.idle.is_empty() && self.in_use == 0
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Idle connections that no other bin has claimed
    pub fn idle_count(&self) -> usize {
        self.idle.iter().filter(|slot| !slot.is_vacant()).count()
    }

    pub fn last_fetch(&self) -> Option<Instant> {
        self.last_fetch
    }

    /// Records the start of a fetch; earlier times never overwrite later ones
    pub fn note_fetch_start(&mut self, at: Instant) {
        if self.last_fetch.map_or(true, |last| at > last) {
            self.last_fetch = Some(at);
        }
    }
}
