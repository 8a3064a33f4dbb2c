//! Single-slot link buffer.

use std::io;

/// The two mutually exclusive states of a link buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Empty; the producer side may read into it.
    Fillable,
    /// Holds undelivered bytes; the consumer side may write them out.
    Drainable,
}

/// Result of a fill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The producer delivered this many bytes.
    Filled(usize),
    /// The producer reported end-of-stream. The link is now exhausted.
    EndOfStream,
}

/// Sum every byte of `data` into a running checksum.
#[inline]
pub fn checksum_of(data: &[u8]) -> u64 {
    data.iter().map(|&b| u64::from(b)).sum()
}

/// One directed hop of the pipeline.
///
/// Holds at most one chunk. Bytes are read in by the link's producer and
/// written out, possibly in several partial writes, by its consumer. A new read
/// is only accepted once every byte of the previous chunk has been written.
///
/// ```text
///   producer ──read──▶ [ data[start..start+len] ] ──write──▶ consumer
///                       checksum += every byte read
/// ```
#[derive(Debug)]
pub struct LinkBuffer {
    index: usize,
    data: Box<[u8]>,
    /// Offset of the first undelivered byte.
    start: usize,
    /// Undelivered bytes.
    len: usize,
    checksum: u64,
    bytes_in: u64,
    bytes_out: u64,
    chunks: u64,
    exhausted: bool,
}

impl LinkBuffer {
    /// Create an empty link with the given capacity.
    pub fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
            checksum: 0,
            bytes_in: 0,
            bytes_out: 0,
            chunks: 0,
            exhausted: false,
        }
    }

    /// Position of this link in the pipeline.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fixed byte capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently held.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> LinkState {
        if self.len == 0 {
            LinkState::Fillable
        } else {
            LinkState::Drainable
        }
    }

    /// True if the producer may read into this link.
    #[inline]
    pub fn is_fillable(&self) -> bool {
        self.state() == LinkState::Fillable
    }

    /// True if the consumer may write from this link.
    #[inline]
    pub fn is_drainable(&self) -> bool {
        self.state() == LinkState::Drainable
    }

    /// True once the producer has reported end-of-stream. Never reverts.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True once the link is exhausted and every byte has been written out.
    pub fn is_finished(&self) -> bool {
        self.exhausted && self.len == 0
    }

    /// Sum of every byte ever read into this link.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Total bytes read into this link.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total bytes written out of this link.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Number of non-empty reads accepted.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Undelivered bytes.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Fill the link from a producer.
    ///
    /// `read` receives the whole storage and returns how many bytes it placed
    /// at the front. Zero means end-of-stream. Errors are passed through
    /// untouched; the link is left fillable.
    pub fn fill_with<F>(&mut self, read: F) -> io::Result<FillOutcome>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        if !self.is_fillable() || self.exhausted {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = read(&mut self.data[..])?.min(self.data.len());
        if n == 0 {
            self.exhausted = true;
            return Ok(FillOutcome::EndOfStream);
        }

        self.start = 0;
        self.len = n;
        self.checksum = self.checksum.wrapping_add(checksum_of(&self.data[..n]));
        self.bytes_in += n as u64;
        self.chunks += 1;
        Ok(FillOutcome::Filled(n))
    }

    /// Drain the link into a consumer.
    ///
    /// `write` receives the undelivered bytes and returns how many it accepted.
    /// Anything it did not accept stays in the link for the next call.
    pub fn drain_with<F>(&mut self, write: F) -> io::Result<usize>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        if !self.is_drainable() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = write(self.pending())?.min(self.len);
        self.consume(n);
        Ok(n)
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        self.len -= n;
        self.bytes_out += n as u64;
        if self.len == 0 {
            self.start = 0;
        }
    }
}
