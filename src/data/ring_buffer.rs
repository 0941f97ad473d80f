//! Fixed-capacity overwrite ring buffer over pooled storage.
//!
//! The ring absorbs bursty high-frequency samples for a single channel. Its
//! backing array of `capacity` doubles is rented from an [`ArrayPool`] when the
//! buffer is created and goes back to the pool when the buffer is dropped, so
//! the storage is released exactly once per buffer lifetime.
//!
//! # Cursor Layout
//! ```text
//!   start                 end
//!     v                    v
//! [ . a b c d e f . . . . ]      non-wrapped: size = end - start
//!
//!         end       start
//!          v          v
//! [ g h i . . . . . . a b c ]    wrapped:     size = C - (start - end)
//! ```
//!
//! `start == end` is ambiguous between empty and full, so a `full` flag
//! disambiguates it.
//!
//! # Overwrite Semantics
//! `add` never fails and never resizes. When the ring is full, `start` is
//! advanced before `end`, discarding the oldest sample (FIFO overwrite).

use crate::error::{AppResult, TelemetryError};
use std::borrow::Cow;
use telemetry_pool::{ArrayPool, PooledArray};

/// Single-channel sample ring with overwrite-on-full semantics.
pub struct RingBuffer {
    /// Pooled backing array, exactly `capacity` elements
    storage: PooledArray<f64>,

    /// Index of the oldest unread sample
    start: usize,

    /// Index one past the newest sample
    end: usize,

    /// Distinguishes full from empty when `start == end`
    full: bool,
}

impl RingBuffer {
    /// Create a ring of `capacity` samples, renting its storage from `pool`.
    ///
    /// # Example
    /// ```
    /// use plc_telemetry::data::ring_buffer::RingBuffer;
    /// use telemetry_pool::ArrayPool;
    ///
    /// let pool = ArrayPool::default();
    /// let mut rb = RingBuffer::new(4, &pool).unwrap();
    /// rb.add(1.0);
    /// assert_eq!(rb.size(), 1);
    /// ```
    pub fn new(capacity: usize, pool: &ArrayPool<f64>) -> AppResult<Self> {
        if capacity == 0 {
            return Err(TelemetryError::ZeroCapacity);
        }

        Ok(Self {
            storage: pool.rent(capacity),
            start: 0,
            end: 0,
            full: false,
        })
    }

    /// Fixed capacity chosen at creation.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of samples currently held.
    pub fn size(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.end >= self.start {
            self.end - self.start
        } else {
            self.capacity() - (self.start - self.end)
        }
    }

    /// True when no samples are buffered.
    pub fn is_empty(&self) -> bool {
        !self.full && self.start == self.end
    }

    /// True when the next add overwrites the oldest sample.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Append a sample in O(1), overwriting the oldest one when full.
    pub fn add(&mut self, value: f64) {
        let capacity = self.capacity();
        self.storage[self.end] = value;
        if self.full {
            self.start = (self.start + 1) % capacity;
        }
        self.end = (self.end + 1) % capacity;
        self.full = self.end == self.start;
    }

    /// Remove up to `count` of the oldest samples.
    ///
    /// Returns a borrowed view when the removed range is contiguous in the
    /// backing array, and a single owned concatenation when it wraps.
    pub fn remove_range(&mut self, count: usize) -> Cow<'_, [f64]> {
        let count = count.min(self.size());
        if count == 0 {
            return Cow::Borrowed(&[]);
        }

        let capacity = self.capacity();
        let from = self.start;
        let first_len = (capacity - from).min(count);

        self.start = (from + count) % capacity;
        self.full = false;

        if first_len == count {
            Cow::Borrowed(&self.storage[from..from + count])
        } else {
            let mut joined = Vec::with_capacity(count);
            joined.extend_from_slice(&self.storage[from..capacity]);
            joined.extend_from_slice(&self.storage[..count - first_len]);
            Cow::Owned(joined)
        }
    }

    /// Drop up to `count` of the oldest samples without copying them out.
    ///
    /// Returns how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        let count = count.min(self.size());
        if count > 0 {
            self.start = (self.start + count) % self.capacity();
            self.full = false;
        }
        count
    }

    /// Current contents as two slices in logical (oldest first) order.
    ///
    /// The second slice is empty unless the contents wrap.
    pub fn as_slices(&self) -> (&[f64], &[f64]) {
        if self.is_empty() {
            return (&[], &[]);
        }
        if self.end > self.start {
            (&self.storage[self.start..self.end], &[])
        } else {
            (&self.storage[self.start..], &self.storage[..self.end])
        }
    }

    /// Iterate over the current contents without removing them.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let (head, tail) = self.as_slices();
        head.iter().chain(tail).copied()
    }

    /// Discard all samples, keeping the storage.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
        self.full = false;
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (RingBuffer, ArrayPool<f64>) {
        let pool = ArrayPool::default();
        let rb = RingBuffer::new(capacity, &pool).unwrap();
        (rb, pool)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let pool = ArrayPool::default();
        assert!(matches!(
            RingBuffer::new(0, &pool),
            Err(TelemetryError::ZeroCapacity)
        ));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_size_and_contents_after_n_adds() {
        let capacity = 7;
        for n in [0usize, 1, 3, 6, 7, 8, 13, 14, 15, 100] {
            let (mut rb, _pool) = ring(capacity);
            for i in 1..=n {
                rb.add(i as f64);
            }

            let kept = n.min(capacity);
            assert_eq!(rb.size(), kept, "size after {n} adds");

            let expected: Vec<f64> = ((n - kept + 1)..=n).map(|i| i as f64).collect();
            let actual: Vec<f64> = rb.iter().collect();
            assert_eq!(actual, expected, "contents after {n} adds");
        }
    }

    #[test]
    fn test_overwrite_discards_oldest_first() {
        let (mut rb, _pool) = ring(3);
        rb.add(1.0);
        rb.add(2.0);
        rb.add(3.0);
        assert!(rb.is_full());

        rb.add(4.0);
        assert!(rb.is_full());
        assert_eq!(rb.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_remove_range_contiguous_borrows() {
        let (mut rb, _pool) = ring(8);
        for i in 1..=5 {
            rb.add(f64::from(i));
        }

        let removed = rb.remove_range(3);
        assert!(matches!(removed, Cow::Borrowed(_)));
        assert_eq!(&*removed, &[1.0, 2.0, 3.0]);
        drop(removed);

        assert_eq!(rb.size(), 2);
        assert_eq!(rb.iter().collect::<Vec<_>>(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_remove_range_wrapped_concatenates() {
        let (mut rb, _pool) = ring(4);
        for i in 1..=3 {
            rb.add(f64::from(i));
        }
        let _ = rb.remove_range(2); // start = 2
        for i in 4..=6 {
            rb.add(f64::from(i)); // end wraps to 2
        }
        assert_eq!(rb.size(), 4);
        assert!(rb.is_full());

        let removed = rb.remove_range(3);
        assert!(matches!(removed, Cow::Owned(_)));
        assert_eq!(&*removed, &[3.0, 4.0, 5.0]);
        drop(removed);

        assert_eq!(rb.size(), 1);
        assert_eq!(rb.iter().collect::<Vec<_>>(), vec![6.0]);
    }

    #[test]
    fn test_remove_range_clamps_to_size() {
        let (mut rb, _pool) = ring(4);
        rb.add(1.0);
        rb.add(2.0);

        assert_eq!(&*rb.remove_range(10), &[1.0, 2.0]);
        assert!(rb.is_empty());
        assert!(rb.remove_range(1).is_empty());
    }

    #[test]
    fn test_remove_whole_full_buffer_empties_it() {
        let (mut rb, _pool) = ring(3);
        for i in 1..=4 {
            rb.add(f64::from(i));
        }
        assert_eq!(&*rb.remove_range(3), &[2.0, 3.0, 4.0]);
        assert!(rb.is_empty());
        assert_eq!(rb.size(), 0);
    }

    #[test]
    fn test_discard_advances_past_wrap() {
        let pool = ArrayPool::default();
        let mut rb = RingBuffer::new(4, &pool).unwrap();
        for i in 1..=6 {
            rb.add(f64::from(i));
        }
        assert!(rb.is_full());

        assert_eq!(rb.discard(3), 3);
        assert_eq!(rb.iter().collect::<Vec<_>>(), vec![6.0]);
        assert_eq!(rb.discard(10), 1);
        assert!(rb.is_empty());
        assert_eq!(rb.discard(1), 0);
    }

    #[test]
    fn test_wrapped_size_formula() {
        let (mut rb, _pool) = ring(5);
        for i in 1..=4 {
            rb.add(f64::from(i));
        }
        let _ = rb.remove_range(3); // start = 3, end = 4
        rb.add(5.0); // end = 0
        rb.add(6.0); // end = 1 < start
        assert_eq!(rb.size(), 3);
        assert_eq!(rb.as_slices(), (&[4.0, 5.0][..], &[6.0][..]));
    }

    #[test]
    fn test_storage_returned_once_on_drop() {
        let pool = ArrayPool::default();
        let rb = RingBuffer::new(1000, &pool).unwrap();
        assert_eq!(pool.outstanding(), 1);

        drop(rb);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.total_returns(), 1);
    }
}
