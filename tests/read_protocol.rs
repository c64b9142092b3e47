//! End-to-end tests of the read surface
//!
//! A device is started from a configuration file, edges are injected
//! through the simulated source, and readings are pulled through
//! `ReadHandle` the way a userspace reader would.

use isov::{ChannelIndex, IsovConfig, IsovDevice, IsovError, ManualCounter, SimulatedEdgeSource};
use std::io::{Read, Write};
use std::sync::Arc;
use tempfile::TempDir;

fn ch(index: usize) -> ChannelIndex {
    ChannelIndex::new(index).unwrap()
}

struct Rig {
    counter: Arc<ManualCounter>,
    source: SimulatedEdgeSource,
    device: IsovDevice,
}

impl Rig {
    fn start(config: &IsovConfig) -> Self {
        let counter = Arc::new(ManualCounter::new(0));
        let source = SimulatedEdgeSource::new(counter.clone());
        let device = IsovDevice::start(config, &source).unwrap();
        Self {
            counter,
            source,
            device,
        }
    }

    /// Two edges `period` ticks apart on `channel`.
    fn pulse(&self, channel: ChannelIndex, period: u32) {
        self.source.trigger(channel);
        self.counter.advance(period);
        self.source.trigger(channel);
    }
}

#[test]
fn fresh_device_reads_all_zero() {
    let rig = Rig::start(&IsovConfig::default());
    let mut reader = rig.device.open();

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, b"V1=0 V2=0 V3=0 V4=0 V5=0 \n\0");
}

#[test]
fn reference_reading_appears_on_its_channel() {
    let rig = Rig::start(&IsovConfig::default());
    rig.pulse(ch(0), 1000);

    let text = rig.device.open().read_snapshot().unwrap();
    assert_eq!(text, "V1=7692 V2=0 V3=0 V4=0 V5=0 \n");
}

#[test]
fn small_chunks_reassemble_one_snapshot() {
    let rig = Rig::start(&IsovConfig::default());
    rig.pulse(ch(1), 2000);
    rig.pulse(ch(3), 4000);

    let mut reader = rig.device.open();
    let mut offset = 0usize;
    let mut chunk = [0u8; 3];
    let mut bytes = Vec::new();

    // Edges between chunks must not leak into the snapshot being drained.
    let first = reader.read_at(&mut offset, &mut chunk).unwrap();
    bytes.extend_from_slice(&chunk[..first]);
    rig.pulse(ch(0), 1000);
    loop {
        let n = reader.read_at(&mut offset, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(bytes, b"V1=0 V2=3846 V3=0 V4=1923 V5=0 \n\0");
    assert_eq!(offset, bytes.len());

    // Rewinding picks up the edge that arrived mid-read.
    offset = 0;
    let n = reader.read_at(&mut offset, &mut [0u8; 256]).unwrap();
    assert_eq!(n, b"V1=7692 V2=3846 V3=0 V4=1923 V5=0 \n\0".len());
}

#[test]
fn drained_handle_stays_at_end_until_rewound() {
    let rig = Rig::start(&IsovConfig::default());
    let mut reader = rig.device.open();

    let mut first = String::new();
    reader.read_to_string(&mut first).unwrap();
    assert!(first.starts_with("V1=0 "));

    rig.pulse(ch(4), 1000);
    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);

    reader.rewind();
    assert_eq!(reader.position(), 0);
    let mut second = String::new();
    reader.read_to_string(&mut second).unwrap();
    assert!(second.contains("V5=7692 "));
}

#[test]
fn writes_are_rejected() {
    let rig = Rig::start(&IsovConfig::default());
    let mut reader = rig.device.open();

    let mut offset = 0usize;
    let err = reader.write_at(&mut offset, b"V1=1").unwrap_err();
    assert!(matches!(err, IsovError::InvalidOperation));
    assert_eq!(offset, 0);

    let io_err = reader.write(b"V1=1").unwrap_err();
    assert_eq!(io_err.kind(), std::io::ErrorKind::Unsupported);
}

#[test]
fn out_of_window_edges_hold_last_reading() {
    let rig = Rig::start(&IsovConfig::default());
    rig.pulse(ch(2), 1000);

    // Converter stalled for over a second: the reading is held.
    rig.counter.advance(1_500_000);
    rig.source.trigger(ch(2));
    assert_eq!(rig.device.voltages()[2], 7692);

    let text = rig.device.open().read_snapshot().unwrap();
    assert!(text.contains("V3=7692 "));
}

#[test]
fn config_file_sets_coefficients_and_wiring() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("isov.toml");
    std::fs::write(
        &path,
        r#"
[device]
name = "bench"

[[channels]]
index = 0
coefficient = 1000000

[[channels]]
index = 1
coefficient = 2000000
enabled = false
"#,
    )
    .unwrap();

    let config = IsovConfig::load_from(&path).unwrap();
    config.validate().unwrap();
    let rig = Rig::start(&config);

    assert_eq!(rig.device.name(), "bench");
    assert_eq!(rig.device.wired_channels(), vec![ch(0)]);
    assert!(!rig.source.is_subscribed(ch(1)));

    rig.pulse(ch(0), 1000);
    let text = rig.device.open().read_snapshot().unwrap();
    assert!(text.starts_with("V1=1000 V2=0 "));
}

#[test]
fn stopping_the_device_releases_every_subscription() {
    let rig = Rig::start(&IsovConfig::default());
    let Rig {
        counter,
        source,
        device,
    } = rig;

    device.stop();
    for idx in ChannelIndex::all() {
        assert!(!source.is_subscribed(idx));
    }

    // Edges after stop reach nobody.
    counter.advance(1000);
    assert!(!source.trigger(ch(0)));
}
