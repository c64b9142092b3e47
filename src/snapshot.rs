//! Snapshot renderer and chunked read sessions.
//!
//! A [`Snapshot`] is the text form of all channel voltages:
//!
//! ```text
//! V1=<v1> V2=<v2> V3=<v3> V4=<v4> V5=<v5> \n\0
//! ```
//!
//! The trailing NUL is part of the rendered length. The text lives in a
//! fixed-capacity buffer; output that would not fit is cut off rather than
//! overrunning, and the terminator always fits.
//!
//! A [`ReadSession`] serves a snapshot across several reads, driven by a
//! caller-owned byte offset. Offset 0 renders fresh values; a read at or
//! past the end returns 0 and drops the snapshot, and further reads keep
//! returning 0 until the offset is reset.

use std::fmt::{self, Write};

use tracing::debug;

use crate::channel::{ChannelTable, CHANNEL_COUNT};
use crate::error::{IsovError, Result};

/// Capacity of the snapshot text buffer in bytes, terminator included.
pub const SNAPSHOT_CAPACITY: usize = 256;

/// Rendered snapshot in a fixed-capacity buffer.
#[derive(Clone)]
pub struct Snapshot<const N: usize = SNAPSHOT_CAPACITY> {
    bytes: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> Snapshot<N> {
    /// Render `voltages` into a new snapshot.
    ///
    /// Returns [`IsovError::NoData`] if nothing could be rendered.
    pub fn render(voltages: &[i32; CHANNEL_COUNT]) -> Result<Self> {
        let mut snapshot = Self {
            bytes: [0; N],
            len: 0,
            truncated: false,
        };

        if write_voltages(&mut snapshot, voltages).is_err() {
            snapshot.truncated = true;
        }

        if N == 0 || snapshot.len == 0 {
            return Err(IsovError::NoData);
        }

        // Text is capped at N - 1 bytes, so the terminator always fits.
        snapshot.bytes[snapshot.len] = 0;
        snapshot.len += 1;

        Ok(snapshot)
    }

    /// Rendered bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Rendered text without the terminator.
    pub fn text(&self) -> &str {
        let text = &self.bytes[..self.len.saturating_sub(1)];
        // Only ASCII is ever written.
        std::str::from_utf8(text).unwrap_or_default()
    }

    /// Rendered length, terminator included.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for a successfully rendered snapshot.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the text was cut off to fit the buffer.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Copy bytes starting at `offset` into `buf`. Returns the count copied.
    pub fn copy_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(remaining) = self.as_bytes().get(offset..) else {
            return 0;
        };
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        n
    }
}

impl<const N: usize> Write for Snapshot<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N.saturating_sub(1).saturating_sub(self.len);
        let n = s.len().min(room);
        self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            return Err(fmt::Error);
        }
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for Snapshot<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("text", &self.text())
            .field("len", &self.len)
            .field("truncated", &self.truncated)
            .finish()
    }
}

fn write_voltages<W: Write>(out: &mut W, voltages: &[i32; CHANNEL_COUNT]) -> fmt::Result {
    for (i, voltage) in voltages.iter().enumerate() {
        write!(out, "V{}={} ", i + 1, voltage)?;
    }
    out.write_char('\n')
}

/// Per-reader state for the chunked read protocol.
#[derive(Debug, Default)]
pub struct ReadSession {
    snapshot: Option<Snapshot>,
}

impl ReadSession {
    /// New session with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot currently being served, if any.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Read up to `buf.len()` bytes at `*offset`, advancing `*offset`.
    ///
    /// Returns 0 once the snapshot is drained. Reset `*offset` to 0 to start
    /// a new sequence with freshly rendered values.
    pub fn read(&mut self, table: &ChannelTable, offset: &mut usize, buf: &mut [u8]) -> Result<usize> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) if *offset != 0 => snapshot,
            // Drained earlier in this sequence
            None if *offset != 0 => return Ok(0),
            _ => {
                let snapshot: Snapshot = Snapshot::render(&table.voltages())?;
                debug!(len = snapshot.len(), text = snapshot.text().trim_end(), "Rendered snapshot");
                snapshot
            }
        };

        if *offset >= snapshot.len() {
            return Ok(0);
        }

        let n = snapshot.copy_at(*offset, buf);
        *offset += n;
        self.snapshot = Some(snapshot);
        Ok(n)
    }
}
