//! Edge handler: turns a falling-edge event into a voltage.
//!
//! This runs in the edge-delivery context, so it does a fixed amount of
//! work: one atomic swap, one range check, one integer division and one
//! atomic store. It never blocks and never allocates.

use std::sync::Arc;

use tracing::trace;

use crate::channel::{ChannelIndex, ChannelTable, VALID_PERIOD_MAX};

/// Result of processing one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// The period was inside the validity window and a new voltage was published.
    Accepted {
        /// Measured period in ticks
        period: u32,
        /// Published voltage
        voltage: i32,
    },
    /// The period was zero or at least [`VALID_PERIOD_MAX`]; the voltage was held.
    Held {
        /// Measured period in ticks
        period: u32,
    },
}

impl EdgeOutcome {
    /// Measured period regardless of outcome.
    pub fn period(&self) -> u32 {
        match *self {
            Self::Accepted { period, .. } | Self::Held { period } => period,
        }
    }

    /// Whether a new voltage was published.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Elapsed ticks between two counter readings, modulo 2^32.
#[inline]
pub fn period_ticks(last_edge_time: u32, now: u32) -> u32 {
    now.wrapping_sub(last_edge_time)
}

/// Whether a period falls inside the validity window `(0, VALID_PERIOD_MAX)`.
#[inline]
pub fn is_valid_period(period: u32) -> bool {
    period > 0 && period < VALID_PERIOD_MAX
}

/// Convert a period to a voltage, or `None` if the period is outside the window.
///
/// Integer division truncates toward zero. A result beyond `i32` saturates.
#[inline]
pub fn voltage_for_period(coefficient: i64, period: u32) -> Option<i32> {
    if !is_valid_period(period) {
        return None;
    }
    let raw = coefficient / i64::from(period);
    Some(i32::try_from(raw).unwrap_or(if raw < 0 { i32::MIN } else { i32::MAX }))
}

/// Edge handler bound to a channel table.
#[derive(Debug, Clone)]
pub struct EdgeHandler {
    table: Arc<ChannelTable>,
}

impl EdgeHandler {
    /// Create a handler that updates `table`.
    pub fn new(table: Arc<ChannelTable>) -> Self {
        Self { table }
    }

    /// The table this handler writes to.
    pub fn table(&self) -> &Arc<ChannelTable> {
        &self.table
    }

    /// Process a falling edge on `channel` observed at counter value `now`.
    ///
    /// `now` always becomes the channel's last edge time. The voltage is
    /// updated only when the period since the previous edge is valid.
    pub fn on_edge(&self, channel: ChannelIndex, now: u32) -> EdgeOutcome {
        let state = self.table.channel(channel);
        let previous = state.swap_edge_time(now);
        let period = period_ticks(previous, now);

        match voltage_for_period(state.coefficient(), period) {
            Some(voltage) => {
                state.publish_voltage(voltage);
                trace!(%channel, period, voltage, "edge accepted");
                EdgeOutcome::Accepted { period, voltage }
            }
            None => {
                trace!(%channel, period, "edge held");
                EdgeOutcome::Held { period }
            }
        }
    }
}
