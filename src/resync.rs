//! Push-back reader and magic-token resynchroniser.
//!
//! The reader's main loop needs to be able to "un-read" bytes after
//! detecting an embedded magic token inside a packet payload, or after
//! over-reading during a resync scan. [`PushbackReader`] wraps an arbitrary
//! [`Read`] so that already-read bytes can be prepended back onto the
//! logical input, without requiring the underlying source to be seekable
//! (it may be a pipe or stdin).

use std::io::{self, Read};

/// A byte source with a small push-back buffer in front of it.
pub struct PushbackReader<R> {
    inner: R,
    pending: Vec<u8>,
    offset: u64,
}

impl<R: Read> PushbackReader<R> {
    pub fn new(inner: R) -> Self {
        PushbackReader {
            inner,
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// Reads up to `len` bytes. Returns fewer than `len` bytes only at
    /// end-of-input; never blocks indefinitely without making progress
    /// since `Read::read` returning `0` is treated as EOF.
    pub fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);

        if !self.pending.is_empty() {
            let take = len.min(self.pending.len());
            out.extend(self.pending.drain(0..take));
        }

        while out.len() < len {
            let mut buf = vec![0u8; len - out.len()];
            let n = self.inner.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.offset += n as u64;
            out.extend_from_slice(&buf[..n]);
        }

        Ok(out)
    }

    /// Prepends `data` onto the logical input so the next `read` calls
    /// return it before any new bytes from the underlying source.
    pub fn push_back(&mut self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        let mut new_pending = data;
        new_pending.extend_from_slice(&self.pending);
        self.pending = new_pending;
    }

    /// Number of bytes consumed from the underlying source so far. Used
    /// only for diagnostics (the offsets logged on recoverable errors);
    /// it is not part of the on-disk format.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Outcome of a resynchronisation scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// The magic token was found; the reader is now positioned just past it.
    Found,
    /// End of input was reached before the magic token reappeared.
    EndOfStream,
}

/// Scans the input one byte at a time until `magic` reappears, bounding the
/// sliding window to `50 * magic.len()` bytes so a very long gap of noise
/// doesn't grow memory usage unboundedly.
pub fn resynchronise<R: Read>(
    reader: &mut PushbackReader<R>,
    magic: &[u8],
) -> io::Result<ResyncOutcome> {
    let max_window = magic.len() * 50;
    let mut window: Vec<u8> = Vec::new();

    loop {
        let chunk = reader.read(1)?;
        if chunk.is_empty() {
            return Ok(ResyncOutcome::EndOfStream);
        }
        window.push(chunk[0]);

        if window.len() >= magic.len() && &window[window.len() - magic.len()..] == magic {
            return Ok(ResyncOutcome::Found);
        }

        if window.len() > max_window {
            let keep_from = window.len() - magic.len();
            window.drain(0..keep_from);
        }
    }
}
