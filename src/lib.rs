//! # isov
//!
//! Five-channel isolated voltage measurement. Each channel's analog input
//! is converted to a pulse train by a voltage-to-frequency converter; this
//! crate timestamps the falling edges against a free-running 1 MHz counter
//! and turns the period between edges into a voltage reading.
//!
//! ## Crate Structure
//!
//! - **`channel`**: The fixed five-channel state table and the bounded `ChannelIndex`.
//! - **`edge`**: The edge handler: wraparound-safe period, validity window, division.
//! - **`counter`**: Counter sources (host clock, manual, memory-mapped hardware timer).
//! - **`edge_source`**: The edge-delivery trait, RAII subscriptions, a simulated source
//!   and a pulse-train generator.
//! - **`snapshot`**: Text rendering of all voltages and the chunked read session.
//! - **`device`**: Lifecycle (scoped wiring with unwind) and the read-only stream surface.
//! - **`config`**: Figment configuration (`config/isov.toml` + `ISOV_` environment).
//! - **`logging`**: tracing-subscriber initialization.
//! - **`error`**: The `IsovError` type.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use isov::{ChannelIndex, IsovConfig, IsovDevice, ManualCounter, SimulatedEdgeSource};
//!
//! # fn main() -> isov::Result<()> {
//! let counter = Arc::new(ManualCounter::new(0));
//! let source = SimulatedEdgeSource::new(counter.clone());
//! let device = IsovDevice::start(&IsovConfig::default(), &source)?;
//!
//! let ch1 = ChannelIndex::new(0)?;
//! source.trigger(ch1);
//! counter.set(1000);
//! source.trigger(ch1);
//!
//! let text = device.open().read_snapshot()?;
//! assert!(text.starts_with("V1=7692 "));
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod counter;
pub mod device;
pub mod edge;
pub mod edge_source;
pub mod error;
pub mod logging;
pub mod snapshot;

pub use channel::{
    Channel, ChannelIndex, ChannelTable, CHANNEL_COUNT, DEFAULT_COEFFICIENT, VALID_PERIOD_MAX,
};
pub use config::IsovConfig;
pub use counter::{CounterSource, ManualCounter, MappedCounter, MonotonicCounter};
pub use device::{IsovDevice, ReadHandle};
pub use edge::{EdgeHandler, EdgeOutcome};
pub use edge_source::{
    EdgeCallback, EdgeSource, PulseTrain, SimulatedEdgeSource, Subscription, SubscriptionSet,
};
pub use error::{IsovError, Result};
pub use snapshot::{ReadSession, Snapshot, SNAPSHOT_CAPACITY};
