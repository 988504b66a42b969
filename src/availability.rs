use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::{Duration, Instant};

/// How long a device counts as present after its last advertisement.
pub const DEFAULT_PRESENCE_WINDOW: Duration = Duration::from_secs(900);

/// Whether listeners should trust the snapshot of a device.
///
/// A device is available while it has failed fewer than `retry_threshold`
/// consecutive polling cycles and is currently in radio range.
pub fn is_available(failed_update_count: u32, retry_threshold: u32, device_present: bool) -> bool {
    failed_update_count < retry_threshold && device_present
}

/// Remembers when each device was last seen advertising.
///
/// Cloning gives another handle onto the same sightings, so a scanner can record
/// while listeners query.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    window: Duration,
    sightings: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_WINDOW)
    }
}

impl PresenceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sightings: Arc::default(),
        }
    }

    /// Record an advertisement from `address` received just now.
    pub fn record(&self, address: &str) {
        self.record_at(address, Instant::now());
    }

    pub fn record_at(&self, address: &str, seen: Instant) {
        let mut sightings = self.sightings.lock().unwrap_or_else(PoisonError::into_inner);
        let last = sightings.entry(normalize(address)).or_insert(seen);
        if seen > *last {
            *last = seen;
        }
    }

    pub fn last_seen(&self, address: &str) -> Option<Instant> {
        self.sightings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(address))
            .copied()
    }

    /// Whether `address` advertised within the presence window.
    pub fn is_present(&self, address: &str) -> bool {
        self.last_seen(address)
            .is_some_and(|seen| seen.elapsed() <= self.window)
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}
