//! Malformed-Message Throttle
//!
//! Per-address budget for bad input inside a sliding time window. An address
//! that keeps sending garbage is soft-banned: its messages are silently
//! dropped until the window expires. This is abuse protection, distinct from
//! a real ban, and prevents error-reply amplification.
//!
//! Implemented as a plain map from address to (count, window expiry) with
//! lazy eviction on lookup. No background sweeper.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default bad-message budget per address per window.
pub const MAX_BAD_MESSAGES: u32 = 5;
/// Default window length.
pub const BAD_MESSAGE_WINDOW: Duration = Duration::from_secs(60);

struct BadMessageEntry {
    count: u32,
    expires_at: Instant,
}

/// Time-windowed per-address counter of malformed messages.
///
/// State machine per address: TRUSTED (count < max) until the budget is
/// spent, then THROTTLED (all messages dropped) until the window expires and
/// the entry evicts, returning the address to TRUSTED with a fresh counter.
pub struct BadMessageThrottle {
    entries: Mutex<HashMap<IpAddr, BadMessageEntry>>,
    max_bad_messages: u32,
    window: Duration,
}

impl BadMessageThrottle {
    pub fn new(max_bad_messages: u32, window: Duration) -> Self {
        BadMessageThrottle {
            entries: Mutex::new(HashMap::new()),
            max_bad_messages,
            window,
        }
    }

    /// Records one malformed message from the address.
    ///
    /// Returns true if the sender may still be answered with an error
    /// envelope, false if the budget was already spent (silent drop).
    pub fn record_bad(&self, addr: IpAddr) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        match entries.get_mut(&addr) {
            Some(entry) if entry.expires_at > now => {
                if entry.count >= self.max_bad_messages {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                // Unknown or expired: fresh window.
                entries.insert(
                    addr,
                    BadMessageEntry {
                        count: 1,
                        expires_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Whether the address is currently soft-banned. Evicts the entry when
    /// its window has expired.
    pub fn is_throttled(&self, addr: IpAddr) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();

        match entries.get(&addr) {
            Some(entry) if entry.expires_at > now => entry.count >= self.max_bad_messages,
            Some(_) => {
                entries.remove(&addr);
                false
            }
            None => false,
        }
    }

    /// Number of addresses currently tracked.
    #[allow(dead_code)]
    pub fn tracked_count(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.len()
    }
}

impl Default for BadMessageThrottle {
    fn default() -> Self {
        Self::new(MAX_BAD_MESSAGES, BAD_MESSAGE_WINDOW)
    }
}
