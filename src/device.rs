//! Device lifecycle and the character-stream surface.
//!
//! [`IsovDevice::start`] builds the channel table and subscribes each
//! enabled channel to an [`EdgeSource`]. Every acquired subscription goes
//! into a [`SubscriptionSet`]; if a later channel fails, returning early
//! drops the set and releases what was acquired, newest first. There is no
//! partially started device to observe.
//!
//! Readers call [`IsovDevice::open`] to get a [`ReadHandle`]. Each handle
//! has its own [`ReadSession`], so concurrent readers never share an
//! in-flight snapshot. The stream is read-only; writes fail with
//! [`IsovError::InvalidOperation`].

use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{ChannelIndex, ChannelTable, CHANNEL_COUNT};
use crate::config::IsovConfig;
use crate::edge::EdgeHandler;
use crate::edge_source::{EdgeCallback, EdgeSource, SubscriptionSet};
use crate::error::{IsovError, Result};
use crate::snapshot::{ReadSession, SNAPSHOT_CAPACITY};

/// A started measurement device.
pub struct IsovDevice {
    name: String,
    table: Arc<ChannelTable>,
    handler: EdgeHandler,
    labels: [String; CHANNEL_COUNT],
    subscriptions: SubscriptionSet,
}

impl IsovDevice {
    /// Validate `config`, build the channel table and wire every enabled
    /// channel to `source`.
    pub fn start<S: EdgeSource + ?Sized>(config: &IsovConfig, source: &S) -> Result<Self> {
        config.validate()?;

        let table = Arc::new(ChannelTable::new(config.coefficients()));
        let handler = EdgeHandler::new(table.clone());

        let mut labels: [String; CHANNEL_COUNT] =
            std::array::from_fn(|i| format!("Voltage to freq {}", i + 1));
        for channel in &config.channels {
            labels[channel.index] = channel.label();
        }

        let mut subscriptions = SubscriptionSet::new();
        for channel in config.enabled_channels() {
            let index = ChannelIndex::new(channel.index)?;
            let edge = handler.clone();
            let callback: EdgeCallback = Arc::new(move |ch: ChannelIndex, now: u32| {
                edge.on_edge(ch, now);
            });

            let subscription = source.subscribe(index, callback).map_err(|e| {
                warn!(channel = %index, error = %e, acquired = subscriptions.len(), "Edge subscription failed, unwinding");
                e
            })?;

            debug!(channel = %index, gpio = ?channel.gpio, label = %labels[index.get()], "Edge source wired");
            subscriptions.push(subscription);
        }

        info!(
            name = %config.device.name,
            channels = subscriptions.len(),
            "Device started"
        );

        Ok(Self {
            name: config.device.name.clone(),
            table,
            handler,
            labels,
            subscriptions,
        })
    }

    /// Name the device was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label of a channel.
    pub fn label(&self, channel: ChannelIndex) -> &str {
        &self.labels[channel.get()]
    }

    /// Shared channel state.
    pub fn channel_table(&self) -> &Arc<ChannelTable> {
        &self.table
    }

    /// Handler the edge source invokes.
    pub fn edge_handler(&self) -> &EdgeHandler {
        &self.handler
    }

    /// Channels with a live edge subscription, in wiring order.
    pub fn wired_channels(&self) -> Vec<ChannelIndex> {
        self.subscriptions.channels()
    }

    /// Latest voltage of every channel.
    pub fn voltages(&self) -> [i32; CHANNEL_COUNT] {
        self.table.voltages()
    }

    /// Open a reader. The stream is not seekable; see [`ReadHandle::rewind`].
    pub fn open(&self) -> ReadHandle {
        debug!(name = %self.name, "Reader opened");
        ReadHandle {
            table: self.table.clone(),
            session: ReadSession::new(),
            offset: 0,
        }
    }

    /// Release every edge subscription and stop the device.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for IsovDevice {
    fn drop(&mut self) {
        info!(name = %self.name, channels = self.subscriptions.len(), "Device stopping");
    }
}

impl std::fmt::Debug for IsovDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsovDevice")
            .field("name", &self.name)
            .field("wired", &self.subscriptions.channels())
            .field("voltages", &self.voltages())
            .finish()
    }
}

/// An open reader of the voltage stream.
///
/// Implements [`io::Read`] with its own cursor; the inherent `*_at` methods
/// take a caller-managed cursor instead.
#[derive(Debug)]
pub struct ReadHandle {
    table: Arc<ChannelTable>,
    session: ReadSession,
    offset: usize,
}

impl ReadHandle {
    /// Read up to `buf.len()` bytes at `*offset` and advance it.
    ///
    /// Returns 0 at the end of a snapshot. Passing offset 0 renders fresh
    /// values.
    pub fn read_at(&mut self, offset: &mut usize, buf: &mut [u8]) -> Result<usize> {
        self.session.read(&self.table, offset, buf)
    }

    /// Writes are not supported.
    pub fn write_at(&mut self, _offset: &mut usize, _buf: &[u8]) -> Result<usize> {
        Err(IsovError::InvalidOperation)
    }

    /// Reset this handle's cursor so the next read renders fresh values.
    pub fn rewind(&mut self) {
        self.offset = 0;
    }

    /// Current cursor of the [`io::Read`] implementation.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Read one full, fresh snapshot as text (terminator stripped).
    pub fn read_snapshot(&mut self) -> Result<String> {
        self.rewind();
        let mut out = Vec::with_capacity(SNAPSHOT_CAPACITY);
        let mut chunk = [0u8; 64];
        loop {
            let mut offset = self.offset;
            let n = self.read_at(&mut offset, &mut chunk)?;
            self.offset = offset;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }

        if out.last() == Some(&0) {
            out.pop();
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl io::Read for ReadHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut offset = self.offset;
        let n = self.read_at(&mut offset, buf)?;
        self.offset = offset;
        Ok(n)
    }
}

impl io::Write for ReadHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut offset = self.offset;
        Ok(self.write_at(&mut offset, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::counter::ManualCounter;
    use crate::edge_source::SimulatedEdgeSource;
    use std::io::{Read, Write};

    fn ch(index: usize) -> ChannelIndex {
        ChannelIndex::new(index).unwrap()
    }

    fn simulated() -> (Arc<ManualCounter>, SimulatedEdgeSource) {
        let counter = Arc::new(ManualCounter::new(0));
        let source = SimulatedEdgeSource::new(counter.clone());
        (counter, source)
    }

    #[test]
    fn test_start_wires_all_enabled_channels() {
        let (_, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();

        assert_eq!(device.name(), "isov");
        assert_eq!(device.wired_channels().len(), CHANNEL_COUNT);
        for idx in ChannelIndex::all() {
            assert!(source.is_subscribed(idx));
        }
        assert_eq!(device.label(ch(0)), "Voltage to freq 1");
    }

    #[test]
    fn test_disabled_channel_is_not_wired() {
        let (_, source) = simulated();
        let mut config = IsovConfig::default();
        config.channels[2].enabled = false;

        let device = IsovDevice::start(&config, &source).unwrap();
        assert!(!source.is_subscribed(ch(2)));
        assert!(!device.wired_channels().contains(&ch(2)));
    }

    #[test]
    fn test_edges_reach_the_table() {
        let (counter, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();

        source.trigger(ch(0));
        counter.set(1000);
        source.trigger(ch(0));

        assert_eq!(device.voltages(), [7692, 0, 0, 0, 0]);
    }

    #[test]
    fn test_edge_handler_shares_device_table() {
        let (_, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();
        assert!(Arc::ptr_eq(device.edge_handler().table(), device.channel_table()));

        // Edges fed straight to the handler show up in the next snapshot.
        device.edge_handler().on_edge(ch(4), 2000);
        let text = device.open().read_snapshot().unwrap();
        assert!(text.ends_with("V5=3846 \n"));
    }

    #[test]
    fn test_partial_failure_unwinds_in_reverse() {
        let (_, source) = simulated();
        source.fail_channel(ch(3));

        let err = IsovDevice::start(&IsovConfig::default(), &source).unwrap_err();
        assert!(err.is_setup_failure());
        assert_eq!(source.release_log(), vec![ch(2), ch(1), ch(0)]);
        for idx in ChannelIndex::all() {
            assert!(!source.is_subscribed(idx));
        }
    }

    #[test]
    fn test_busy_channel_unwinds() {
        let (_, source) = simulated();
        let _other = source.subscribe(ch(1), Arc::new(|_, _| {})).unwrap();

        let err = IsovDevice::start(&IsovConfig::default(), &source).unwrap_err();
        assert!(matches!(err, IsovError::ChannelBusy { channel: 1 }));
        assert_eq!(source.release_log(), vec![ch(0)]);
        assert!(source.is_subscribed(ch(1)));
    }

    #[test]
    fn test_invalid_config_acquires_nothing() {
        let (_, source) = simulated();
        let mut config = IsovConfig::default();
        config.channels.push(ChannelConfig::with_defaults(0));

        assert!(IsovDevice::start(&config, &source).is_err());
        assert!(source.release_log().is_empty());
        assert!(!source.is_subscribed(ch(0)));
    }

    #[test]
    fn test_stop_releases_everything() {
        let (_, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();
        device.stop();

        assert_eq!(
            source.release_log(),
            vec![ch(4), ch(3), ch(2), ch(1), ch(0)]
        );
    }

    #[test]
    fn test_io_read_and_rewind() {
        let (counter, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();
        let mut reader = device.open();

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "V1=0 V2=0 V3=0 V4=0 V5=0 \n\0");
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);

        counter.set(500);
        source.trigger(ch(4));
        counter.set(1500);
        source.trigger(ch(4));

        reader.rewind();
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "V1=0 V2=0 V3=0 V4=0 V5=7692 \n\0");
    }

    #[test]
    fn test_read_snapshot_strips_terminator() {
        let (_, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();
        let mut reader = device.open();

        assert_eq!(reader.read_snapshot().unwrap(), "V1=0 V2=0 V3=0 V4=0 V5=0 \n");
        assert_eq!(reader.read_snapshot().unwrap(), "V1=0 V2=0 V3=0 V4=0 V5=0 \n");
    }

    #[test]
    fn test_write_is_rejected() {
        let (_, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();
        let mut reader = device.open();

        let mut offset = 0;
        assert!(matches!(
            reader.write_at(&mut offset, b"V1=1"),
            Err(IsovError::InvalidOperation)
        ));
        let err = reader.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_readers_have_independent_sessions() {
        let (counter, source) = simulated();
        let device = IsovDevice::start(&IsovConfig::default(), &source).unwrap();
        let mut a = device.open();
        let mut b = device.open();

        let mut a_off = 0;
        let mut head = [0u8; 3];
        a.read_at(&mut a_off, &mut head).unwrap();

        source.trigger(ch(0));
        counter.set(1000);
        source.trigger(ch(0));

        // b starts fresh and sees the new value; a finishes its old snapshot.
        assert!(b.read_snapshot().unwrap().starts_with("V1=7692 "));
        let mut rest = [0u8; 2];
        a.read_at(&mut a_off, &mut rest).unwrap();
        assert_eq!(&rest, b"0 ");
    }
}
