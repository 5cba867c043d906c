//! # Hybrid Logical Clock
//!
//! Wallet-level fields (profile, security policy) are last-write-wins
//! registers. Plain wall-clock stamps would let a device with a slow clock
//! lose an edit it made *after* seeing a newer one, so every register is
//! stamped with a hybrid logical clock instead:
//!
//! ```text
//! HlcTimestamp = (wall_ms, counter, node)          ordered lexicographically
//!
//! tick(now):     wall' = max(wall, now)
//!                counter' = (wall' == wall) ? counter + 1 : 0
//!
//! observe(r):    (wall, counter)' = max((wall, counter), (r.wall, r.counter))
//! ```
//!
//! After observing a stamp, the next `tick` orders after it whatever the
//! local physical clock says.
//!
//! `node` is the id of the device that made the edit, so two stamps are
//! never equal across devices.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A point in hybrid logical time
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlcTimestamp {
    /// Physical component, epoch milliseconds
    pub wall_ms: i64,
    /// Logical component for events sharing `wall_ms`
    pub counter: u32,
    /// Device that produced the stamp
    pub node: String,
}

impl HlcTimestamp {
    /// The smallest stamp; every real edit orders after it
    pub fn zero() -> Self {
        Self {
            wall_ms: 0,
            counter: 0,
            node: String::new(),
        }
    }
}

/// Per-wallet clock state
///
/// Tracks the greatest `(wall_ms, counter)` the wallet has produced or seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hlc {
    wall_ms: i64,
    counter: u32,
}

impl Hlc {
    /// Produce a fresh stamp for an edit made by `node` now
    pub fn tick(&mut self, node: &str) -> HlcTimestamp {
        self.tick_at(node, crate::time::now_timestamp_millis())
    }

    /// Produce a fresh stamp, reading the physical clock as `now_ms`
    pub fn tick_at(&mut self, node: &str, now_ms: i64) -> HlcTimestamp {
        if now_ms > self.wall_ms {
            self.wall_ms = now_ms;
            self.counter = 0;
        } else {
            self.counter = self.counter.saturating_add(1);
        }

        HlcTimestamp {
            wall_ms: self.wall_ms,
            counter: self.counter,
            node: node.to_string(),
        }
    }

    /// Advance past a stamp received from elsewhere
    pub fn observe(&mut self, remote: &HlcTimestamp) {
        match remote.wall_ms.cmp(&self.wall_ms) {
            Ordering::Greater => {
                self.wall_ms = remote.wall_ms;
                self.counter = remote.counter;
            }
            Ordering::Equal => self.counter = self.counter.max(remote.counter),
            Ordering::Less => {}
        }
    }

    /// Advance past another wallet's clock
    pub fn merge(&mut self, other: &Hlc) {
        if (other.wall_ms, other.counter) > (self.wall_ms, self.counter) {
            self.wall_ms = other.wall_ms;
            self.counter = other.counter;
        }
    }

    /// Greatest physical time seen
    pub fn wall_ms(&self) -> i64 {
        self.wall_ms
    }

    /// Logical counter at `wall_ms`
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// A last-write-wins register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lww<T> {
    value: T,
    stamp: HlcTimestamp,
}

impl<T> Lww<T> {
    /// A register holding `value` that any real write supersedes
    pub fn initial(value: T) -> Self {
        Self {
            value,
            stamp: HlcTimestamp::zero(),
        }
    }

    /// A register holding `value` written at `stamp`
    pub fn new(value: T, stamp: HlcTimestamp) -> Self {
        Self { value, stamp }
    }

    /// Current value
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Stamp of the current value
    pub fn stamp(&self) -> &HlcTimestamp {
        &self.stamp
    }

    /// Overwrite the value at `stamp`
    pub fn set(&mut self, value: T, stamp: HlcTimestamp) {
        self.value = value;
        self.stamp = stamp;
    }
}

impl<T: Clone> Lww<T> {
    /// The register with the greater stamp; `self` on equality
    pub fn merge(&self, other: &Self) -> Self {
        if other.stamp > self.stamp {
            other.clone()
        } else {
            self.clone()
        }
    }
}
