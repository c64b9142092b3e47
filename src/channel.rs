//! Channel state table.
//!
//! The table holds exactly [`CHANNEL_COUNT`] channels for its whole lifetime.
//! Each channel keeps the timestamp of its last accepted edge, its
//! calibration coefficient, and the most recently published voltage.
//!
//! # Synchronization
//!
//! `last_edge_time` and `current_voltage` are plain 32-bit atomics. The
//! edge handler claims the previous timestamp with a single `swap`, so two
//! edges on the same channel can never both measure from the same stale
//! value, and it publishes the voltage with `Release`. Readers load with
//! `Acquire`. A 32-bit atomic load never observes a partially written value,
//! which is the only consistency the snapshot needs per channel.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::error::{IsovError, Result};

/// Number of measurement channels on the shield.
pub const CHANNEL_COUNT: usize = 5;

/// Upper bound (exclusive) of an accepted period, in counter ticks (1 s at 1 MHz).
pub const VALID_PERIOD_MAX: u32 = 1_000_000;

/// Factory calibration coefficient shared by every channel.
pub const DEFAULT_COEFFICIENT: i64 = 7_692_308;

/// Index of a measurement channel, guaranteed to be in `0..CHANNEL_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    /// Create a channel index, rejecting anything outside the channel range.
    pub fn new(index: usize) -> Result<Self> {
        if index >= CHANNEL_COUNT {
            return Err(IsovError::InvalidChannel {
                index,
                max: CHANNEL_COUNT,
            });
        }
        Ok(Self(index as u8))
    }

    /// Iterate over every channel in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..CHANNEL_COUNT as u8).map(Self)
    }

    /// Zero-based index into the table.
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// One-based channel number as printed in snapshots (`V1`..`V5`).
    pub fn number(self) -> usize {
        self.get() + 1
    }
}

impl TryFrom<usize> for ChannelIndex {
    type Error = IsovError;

    fn try_from(index: usize) -> Result<Self> {
        Self::new(index)
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.number())
    }
}

/// State of one channel.
pub struct Channel {
    last_edge_time: AtomicU32,
    current_voltage: AtomicI32,
    coefficient: i64,
}

impl Channel {
    /// Create a channel with no edge seen yet and a zero reading.
    pub fn new(coefficient: i64) -> Self {
        Self {
            last_edge_time: AtomicU32::new(0),
            current_voltage: AtomicI32::new(0),
            coefficient,
        }
    }

    /// Timestamp of the most recent edge (0 until the first edge arrives).
    pub fn last_edge_time(&self) -> u32 {
        self.last_edge_time.load(Ordering::Acquire)
    }

    /// Latest published voltage (0 until the first valid period).
    pub fn current_voltage(&self) -> i32 {
        self.current_voltage.load(Ordering::Acquire)
    }

    /// Calibration coefficient: `voltage = coefficient / period_ticks`.
    pub fn coefficient(&self) -> i64 {
        self.coefficient
    }

    /// Record `now` as the latest edge and return the previous edge time.
    pub(crate) fn swap_edge_time(&self, now: u32) -> u32 {
        self.last_edge_time.swap(now, Ordering::AcqRel)
    }

    pub(crate) fn publish_voltage(&self, voltage: i32) {
        self.current_voltage.store(voltage, Ordering::Release);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("last_edge_time", &self.last_edge_time())
            .field("current_voltage", &self.current_voltage())
            .field("coefficient", &self.coefficient)
            .finish()
    }
}

/// Fixed table of all channels.
#[derive(Debug)]
pub struct ChannelTable {
    channels: [Channel; CHANNEL_COUNT],
}

impl ChannelTable {
    /// Create a table from per-channel calibration coefficients.
    pub fn new(coefficients: [i64; CHANNEL_COUNT]) -> Self {
        Self {
            channels: coefficients.map(Channel::new),
        }
    }

    /// Access one channel.
    pub fn channel(&self, index: ChannelIndex) -> &Channel {
        &self.channels[index.get()]
    }

    /// Read every channel's voltage.
    ///
    /// Each value is read atomically on its own; the five values together
    /// may reflect slightly different instants.
    pub fn voltages(&self) -> [i32; CHANNEL_COUNT] {
        let mut out = [0; CHANNEL_COUNT];
        for (slot, channel) in out.iter_mut().zip(&self.channels) {
            *slot = channel.current_voltage();
        }
        out
    }

    /// Iterate over `(index, channel)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelIndex, &Channel)> {
        ChannelIndex::all().zip(self.channels.iter())
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new([DEFAULT_COEFFICIENT; CHANNEL_COUNT])
    }
}
