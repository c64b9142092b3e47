//! Free-running counter sources.
//!
//! A counter source yields a monotonically increasing tick value that wraps
//! at 2^32. One tick is one microsecond.
//!
//! - [`MonotonicCounter`] - host clock, for simulation and development
//! - [`ManualCounter`] - explicitly driven, for tests and replay
//! - [`MappedCounter`] - the BCM2708 1 MHz system timer mapped from `/dev/mem`

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, info};

use crate::config::{CounterConfig, CounterKind};
use crate::error::{IsovError, Result};

/// Source of counter timestamps.
pub trait CounterSource: Send + Sync {
    /// Current counter value in ticks, modulo 2^32.
    fn now(&self) -> u32;
}

/// Counter derived from the host's monotonic clock.
#[derive(Debug, Clone)]
pub struct MonotonicCounter {
    origin: Instant,
    start: u32,
}

impl MonotonicCounter {
    /// Counter that reads 0 now.
    pub fn new() -> Self {
        Self::with_start(0)
    }

    /// Counter that reads `start` now. Useful to exercise wraparound.
    pub fn with_start(start: u32) -> Self {
        Self {
            origin: Instant::now(),
            start,
        }
    }
}

impl Default for MonotonicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for MonotonicCounter {
    fn now(&self) -> u32 {
        // Truncation is the wrap.
        let micros = self.origin.elapsed().as_micros() as u32;
        self.start.wrapping_add(micros)
    }
}

/// Counter whose value is set by the caller.
#[derive(Debug, Default)]
pub struct ManualCounter {
    ticks: AtomicU32,
}

impl ManualCounter {
    /// Counter starting at `ticks`.
    pub fn new(ticks: u32) -> Self {
        Self {
            ticks: AtomicU32::new(ticks),
        }
    }

    /// Set the counter value.
    pub fn set(&self, ticks: u32) {
        self.ticks.store(ticks, Ordering::Release);
    }

    /// Advance by `delta` ticks, wrapping at 2^32. Returns the new value.
    pub fn advance(&self, delta: u32) -> u32 {
        self.ticks
            .fetch_add(delta, Ordering::AcqRel)
            .wrapping_add(delta)
    }
}

impl CounterSource for ManualCounter {
    fn now(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Hardware counter word mapped from physical memory.
///
/// The mapping is released when the counter is dropped.
pub struct MappedCounter {
    map: Mmap,
    path: PathBuf,
    address: u64,
}

impl MappedCounter {
    /// Map the 32-bit counter word at physical `address` through `path`
    /// (normally `/dev/mem`).
    pub fn open(path: &Path, address: u64) -> Result<Self> {
        if address % 4 != 0 {
            return Err(IsovError::InvalidConfig {
                message: format!("counter address 0x{address:X} is not 4-byte aligned"),
            });
        }

        let mapping_error = |source| IsovError::CounterMapping {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(mapping_error)?;

        // SAFETY: the mapping covers exactly the counter word, which the
        // hardware keeps valid for the life of the system. It is only read
        // through volatile loads.
        #[allow(unsafe_code)]
        let map = unsafe {
            MmapOptions::new()
                .offset(address)
                .len(std::mem::size_of::<u32>())
                .map(&file)
                .map_err(mapping_error)?
        };

        info!(path = %path.display(), address = format_args!("0x{address:08X}"), "Mapped hardware counter");

        Ok(Self {
            map,
            path: path.to_path_buf(),
            address,
        })
    }

    /// Physical address of the counter word.
    pub fn address(&self) -> u64 {
        self.address
    }
}

impl CounterSource for MappedCounter {
    fn now(&self) -> u32 {
        // SAFETY: the map is at least four bytes long and 4-byte aligned
        // (page base plus an aligned offset).
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::read_volatile(self.map.as_ptr().cast::<u32>())
        }
    }
}

impl Drop for MappedCounter {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Unmapping hardware counter");
    }
}

impl std::fmt::Debug for MappedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedCounter")
            .field("path", &self.path)
            .field("address", &format_args!("0x{:08X}", self.address))
            .finish()
    }
}

/// Open the counter source described by `config`.
pub fn open_counter(config: &CounterConfig) -> Result<Arc<dyn CounterSource>> {
    match config.kind {
        CounterKind::Monotonic => Ok(Arc::new(MonotonicCounter::new())),
        CounterKind::Mapped => {
            let counter = MappedCounter::open(&config.path, config.address()?)?;
            Ok(Arc::new(counter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_counter_wraps() {
        let counter = ManualCounter::new(u32::MAX - 5);
        assert_eq!(counter.advance(10), 4);
        assert_eq!(counter.now(), 4);

        counter.set(1234);
        assert_eq!(counter.now(), 1234);
    }

    #[test]
    fn test_monotonic_counter_advances() {
        let counter = MonotonicCounter::with_start(u32::MAX);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let now = counter.now();
        // Started at u32::MAX, so after >= 2 ms it has wrapped past zero.
        assert!(now >= 1000 && now < u32::MAX);
    }

    #[test]
    fn test_mapped_counter_rejects_unaligned_address() {
        let err = MappedCounter::open(Path::new("/dev/mem"), 0x3F00_3002).unwrap_err();
        assert!(matches!(err, IsovError::InvalidConfig { .. }));
    }

    #[test]
    fn test_mapped_counter_missing_device() {
        let err = MappedCounter::open(Path::new("/nonexistent/isov-mem"), 0x3F00_3004).unwrap_err();
        assert!(err.is_setup_failure());
    }

    #[test]
    fn test_mapped_counter_reads_file_word() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut page = vec![0u8; 4096];
        page[8..12].copy_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        file.write_all(&page).unwrap();
        file.flush().unwrap();

        let counter = MappedCounter::open(file.path(), 8).unwrap();
        assert_eq!(counter.address(), 8);
        assert_eq!(counter.now(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_open_mapped_rejects_overflowing_address() {
        let config = CounterConfig {
            kind: CounterKind::Mapped,
            base_address: u64::MAX,
            offset: 4,
            ..CounterConfig::default()
        };
        let err = open_counter(&config).err().unwrap();
        assert!(matches!(err, IsovError::InvalidConfig { .. }));
    }

    #[test]
    fn test_open_monotonic_from_config() {
        let counter = open_counter(&CounterConfig::default()).unwrap();
        let a = counter.now();
        let b = counter.now();
        assert!(b.wrapping_sub(a) < 1_000_000);
    }
}
