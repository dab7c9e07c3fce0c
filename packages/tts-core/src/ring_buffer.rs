//! A dynamically growing byte ring buffer sitting between the daemon socket
//! and the audio sink's pull loop.
//!
//! Unlike a fixed-capacity eviction ring, this buffer never drops data: a
//! write that would overflow the current capacity grows the backing storage
//! instead. Growth is geometric (1.5x) so a long session doesn't pay a
//! reallocation on every single chunk.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::protocol_constants::{RING_BUFFER_GROWTH_FACTOR, RING_BUFFER_INITIAL_CAPACITY};

struct Inner {
    data: VecDeque<u8>,
    capacity: usize,
    finished: bool,
    underruns: u64,
    overruns: u64,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            finished: false,
            underruns: 0,
            overruns: 0,
        }
    }

    fn grow_to_fit(&mut self, incoming: usize) {
        let needed = self.data.len() + incoming;
        if needed <= self.capacity {
            return;
        }

        let mut new_capacity = self.capacity.max(1);
        while new_capacity < needed {
            let grown = (new_capacity as f64 * RING_BUFFER_GROWTH_FACTOR).ceil() as usize;
            new_capacity = grown.max(new_capacity + 1);
        }

        self.overruns += 1;
        self.data.reserve(new_capacity - self.data.capacity());
        self.capacity = new_capacity;
    }
}

/// A growable byte ring buffer. Cheap to clone (`Arc`-backed internally via
/// callers holding a shared handle); the type itself is the shared state.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

/// Point-in-time occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingBufferStats {
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    pub finished: bool,
    pub underruns: u64,
    pub overruns: u64,
}

impl RingBufferStats {
    /// Fraction of capacity currently occupied, in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.size_bytes as f64 / self.capacity_bytes as f64
    }
}

impl RingBuffer {
    /// Creates a new buffer with the default initial capacity.
    pub fn new() -> Self {
        Self::with_capacity(RING_BUFFER_INITIAL_CAPACITY)
    }

    /// Creates a new buffer with an explicit initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::new(capacity)),
        }
    }

    /// Appends bytes to the buffer, growing it if necessary. Always accepts
    /// the full slice; the return value is the number of bytes written,
    /// which is always `data.len()`.
    pub fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        inner.grow_to_fit(data.len());
        inner.data.extend(data.iter().copied());
        data.len()
    }

    /// Reads up to `max_len` bytes, removing them from the buffer. Returns
    /// fewer bytes than requested (including zero) if the buffer holds less.
    pub fn read(&self, max_len: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        let take = max_len.min(inner.data.len());
        if take == 0 {
            if inner.data.is_empty() && !inner.finished {
                inner.underruns += 1;
            }
            return Vec::new();
        }
        inner.data.drain(..take).collect()
    }

    /// Clears all buffered data and resets the end-of-stream flag.
    ///
    /// Capacity is retained (growth only grows within a session; `clear`
    /// does not shrink it back down).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.data.clear();
        inner.finished = false;
    }

    /// Marks the buffer as finished: no more writes are expected. Existing
    /// buffered bytes may still be read until drained.
    pub fn mark_finished(&self) {
        self.inner.lock().finished = true;
    }

    /// True once `mark_finished` has been called and not yet cleared.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// True when there is no buffered data left to read.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Current occupied size in bytes.
    pub fn size(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Current backing capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Snapshot of size, capacity, and health counters.
    pub fn stats(&self) -> RingBufferStats {
        let inner = self.inner.lock();
        RingBufferStats {
            size_bytes: inner.data.len(),
            capacity_bytes: inner.capacity,
            finished: inner.finished,
            underruns: inner.underruns,
            overruns: inner.overruns,
        }
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let buf = RingBuffer::with_capacity(16);
        assert_eq!(buf.write(b"hello"), 5);
        assert_eq!(buf.read(5), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn size_equals_writes_minus_reads() {
        let buf = RingBuffer::with_capacity(64);
        buf.write(b"abcdefgh");
        buf.read(3);
        assert_eq!(buf.size(), 5);
        buf.write(b"xy");
        assert_eq!(buf.size(), 7);
    }

    #[test]
    fn clear_resets_to_empty_not_finished() {
        let buf = RingBuffer::with_capacity(16);
        buf.write(b"data");
        buf.mark_finished();
        buf.clear();
        assert_eq!(buf.size(), 0);
        assert!(!buf.is_finished());
    }

    #[test]
    fn capacity_only_grows() {
        let buf = RingBuffer::with_capacity(4);
        let initial_capacity = buf.capacity();
        buf.write(b"this write is much larger than four bytes");
        assert!(buf.capacity() > initial_capacity);
        buf.read(1000);
        // reading doesn't shrink capacity
        assert!(buf.capacity() >= initial_capacity);
    }

    #[test]
    fn a_single_chunk_larger_than_capacity_is_accepted_in_full() {
        let buf = RingBuffer::with_capacity(8);
        let big = vec![7u8; 1000];
        assert_eq!(buf.write(&big), 1000);
        assert_eq!(buf.read(1000), big);
    }

    #[test]
    fn growth_preserves_logical_order() {
        let buf = RingBuffer::with_capacity(4);
        buf.write(b"ab");
        buf.read(1); // remove 'a', leaving 'b' — forces internal movement on next grow
        buf.write(b"cdefgh"); // triggers growth
        assert_eq!(buf.read(7), b"bcdefgh");
    }

    #[test]
    fn reading_empty_unfinished_buffer_counts_an_underrun() {
        let buf = RingBuffer::with_capacity(4);
        assert_eq!(buf.read(10), Vec::<u8>::new());
        assert_eq!(buf.stats().underruns, 1);
    }

    #[test]
    fn reading_empty_finished_buffer_does_not_count_an_underrun() {
        let buf = RingBuffer::with_capacity(4);
        buf.mark_finished();
        buf.read(10);
        assert_eq!(buf.stats().underruns, 0);
    }
}
