//! Unbounded output for probing a host's handling of oversized CGI output.

use bytes::Bytes;
use std::convert::Infallible;
use std::io::{self, Write};
use std::iter::FusedIterator;
use tracing::{debug, info};

pub const PATTERN: &[u8; 16] = b"0123456789abcdef";

/// Infinite source of identical output blocks.
///
/// The block is allocated once; every call to `next` hands out another
/// reference to the same buffer, so memory use stays flat however long the
/// sequence is consumed.
#[derive(Debug, Clone)]
pub struct StressSource {
    block: Bytes,
}

impl StressSource {
    /// `PATTERN` repeated up to `block_bytes` (rounded down to whole
    /// repetitions), followed by a newline.
    pub fn new(block_bytes: usize) -> Self {
        let repeats = (block_bytes / PATTERN.len()).max(1);
        let mut block = Vec::with_capacity(repeats * PATTERN.len() + 1);
        for _ in 0..repeats {
            block.extend_from_slice(PATTERN);
        }
        block.push(b'\n');
        Self {
            block: Bytes::from(block),
        }
    }

    pub fn block_len(&self) -> usize {
        self.block.len()
    }
}

impl Iterator for StressSource {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        Some(self.block.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

impl FusedIterator for StressSource {}

/// Write chunks from `source` to `out` forever, flushing after each one.
///
/// Only returns when a write fails, typically because the host closed the
/// pipe or is about to kill the process.
pub fn pump<I, W>(source: I, mut out: W) -> io::Result<Infallible>
where
    I: IntoIterator<Item = Bytes>,
    W: Write,
{
    let mut blocks = 0u64;
    for chunk in source {
        if let Err(e) = out.write_all(&chunk).and_then(|()| out.flush()) {
            info!(blocks, error = %e, "stress output stopped");
            return Err(e);
        }
        blocks += 1;
        debug!(blocks, "stress block written");
    }
    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stress source ended",
    ))
}
