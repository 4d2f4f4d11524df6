//! Event gate guards and gate names
//!
//! DNS lookups, robots fetches and login walks are each serialized process
//! wide through a named event gate. A guard owns a gate it managed to begin
//! and completes it exactly once: explicitly, or when dropped.

use crate::store::EventGate;
use std::sync::Arc;

/// Gate name serializing DNS lookups for a host
pub fn dns_event(host: &str) -> String {
    format!("webcrawler:dns:{}", host)
}

/// Gate name serializing login walks for a sequence key
pub fn session_event(sequence_key: &str) -> String {
    format!("webcrawler:session:{}", sequence_key)
}

/// Ownership of a begun event sequence
pub struct EventGuard {
    gate: Arc<dyn EventGate>,
    name: String,
    done: bool,
}

impl EventGuard {
    /// Begins the sequence `name` if nobody else owns it
    ///
    /// # Returns
    ///
    /// * `Some(EventGuard)` - The caller owns the sequence until the guard completes
    /// * `None` - Another task owns it
    pub fn try_begin(gate: &Arc<dyn EventGate>, name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if !gate.begin_event_sequence(&name) {
            tracing::debug!("Event sequence '{}' already in progress", name);
            return None;
        }
        Some(Self {
            gate: Arc::clone(gate),
            name,
            done: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Completes the sequence now
    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.gate.complete_event_sequence(&self.name);
        }
    }
}

impl Drop for EventGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for EventGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventGuard")
            .field("name", &self.name)
            .field("done", &self.done)
            .finish()
    }
}
