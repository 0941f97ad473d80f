//! Size-classed array pool with RAII rental.
//!
//! # Design
//!
//! Vectors are grouped into power-of-two size classes, starting at
//! [`MIN_CLASS_LEN`] elements. Each class is a lock-free `SegQueue` of parked
//! vectors whose `len()` equals the class length exactly. A rent of `n`
//! elements is served from the smallest class that holds `n`, and the returned
//! [`PooledArray`] exposes only the first `n` elements.
//!
//! Requests larger than the biggest class are served with an exact-size
//! allocation that is simply dropped on return.
//!
//! ## Metrics
//!
//! `outstanding()` counts live rentals. Every code path that hands storage out
//! increments it and every path that takes storage back decrements it, so a
//! non-zero value after all holders are gone means a leak.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Smallest size class, in elements.
pub const MIN_CLASS_LEN: usize = 16;

/// Default cap on how many vectors each size class keeps parked.
pub const DEFAULT_MAX_PER_BUCKET: usize = 32;

const MIN_CLASS_SHIFT: u32 = MIN_CLASS_LEN.trailing_zeros();

/// Number of size classes (16 elements up to 2^(4+27) elements).
const BUCKET_COUNT: usize = 28;

/// Shared pool state, owned jointly by the pool handle and every rental.
struct ArrayPoolInner<T> {
    /// Parked vectors, one lock-free queue per size class
    buckets: Vec<SegQueue<Vec<T>>>,
    /// Parked vector count per size class (queue length is not O(1) to read)
    parked: Vec<AtomicUsize>,
    /// Cap on parked vectors per class
    max_per_bucket: usize,
    /// Live rentals
    outstanding: AtomicUsize,
    /// Metrics: total rents
    total_rents: AtomicU64,
    /// Metrics: total returns
    total_returns: AtomicU64,
}

/// Pool of reusable `Vec<T>` backing arrays.
///
/// Cloning the handle is cheap and shares the same storage.
pub struct ArrayPool<T: Copy + Default + Send + 'static> {
    inner: Arc<ArrayPoolInner<T>>,
}

impl<T: Copy + Default + Send + 'static> Clone for ArrayPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Copy + Default + Send + 'static> Default for ArrayPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_BUCKET)
    }
}

impl<T: Copy + Default + Send + 'static> fmt::Debug for ArrayPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayPool")
            .field("element", &std::any::type_name::<T>())
            .field("outstanding", &self.outstanding())
            .field("pooled", &self.pooled())
            .finish()
    }
}

/// Index of the size class able to hold `len` elements.
fn class_index(len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let class_len = len.checked_next_power_of_two()?.max(MIN_CLASS_LEN);
    let idx = (class_len.trailing_zeros() - MIN_CLASS_SHIFT) as usize;
    (idx < BUCKET_COUNT).then_some(idx)
}

fn class_len(idx: usize) -> usize {
    MIN_CLASS_LEN << idx
}

impl<T: Copy + Default + Send + 'static> ArrayPool<T> {
    /// Create an empty pool that parks at most `max_per_bucket` vectors per size class.
    #[must_use]
    pub fn new(max_per_bucket: usize) -> Self {
        Self {
            inner: Arc::new(ArrayPoolInner {
                buckets: (0..BUCKET_COUNT).map(|_| SegQueue::new()).collect(),
                parked: (0..BUCKET_COUNT).map(|_| AtomicUsize::new(0)).collect(),
                max_per_bucket,
                outstanding: AtomicUsize::new(0),
                total_rents: AtomicU64::new(0),
                total_returns: AtomicU64::new(0),
            }),
        }
    }

    /// Rent an array of exactly `len` logical elements, all `T::default()`.
    ///
    /// Never blocks: a miss allocates a fresh vector of the size class.
    #[must_use]
    pub fn rent(&self, len: usize) -> PooledArray<T> {
        let inner = &self.inner;
        let storage = match class_index(len) {
            Some(idx) => match inner.buckets[idx].pop() {
                Some(vec) => {
                    inner.parked[idx].fetch_sub(1, Ordering::Relaxed);
                    trace!(len, class_len = vec.len(), "ArrayPool hit");
                    vec
                }
                None => {
                    debug!(
                        element = std::any::type_name::<T>(),
                        len,
                        class_len = class_len(idx),
                        "ArrayPool miss, allocating"
                    );
                    vec![T::default(); class_len(idx)]
                }
            },
            None => vec![T::default(); len],
        };

        inner.outstanding.fetch_add(1, Ordering::Relaxed);
        inner.total_rents.fetch_add(1, Ordering::Relaxed);

        PooledArray {
            storage: Some(storage),
            len,
            pool: Arc::clone(inner),
        }
    }

    /// Rent an array and fill it with a copy of `src`.
    #[must_use]
    pub fn rent_copy(&self, src: &[T]) -> PooledArray<T> {
        let mut array = self.rent(src.len());
        array.as_mut_slice().copy_from_slice(src);
        array
    }

    /// Number of rentals not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Relaxed)
    }

    /// Number of vectors currently parked for reuse.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.inner
            .parked
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    /// Total number of rents since pool creation.
    #[must_use]
    pub fn total_rents(&self) -> u64 {
        self.inner.total_rents.load(Ordering::Relaxed)
    }

    /// Total number of returns since pool creation.
    #[must_use]
    pub fn total_returns(&self) -> u64 {
        self.inner.total_returns.load(Ordering::Relaxed)
    }
}

impl<T: Copy + Default + Send + 'static> ArrayPoolInner<T> {
    fn mark_returned(&self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.total_returns.fetch_add(1, Ordering::Relaxed);
    }

    /// Park a vector for reuse, or drop it if its class is full.
    fn release(&self, mut vec: Vec<T>) {
        self.mark_returned();

        let Some(idx) = class_index(vec.len()) else {
            return;
        };
        // Only exact class-length vectors are parked; oversize rents are dropped.
        if class_len(idx) != vec.len() {
            return;
        }
        if self.parked[idx].fetch_add(1, Ordering::Relaxed) >= self.max_per_bucket {
            self.parked[idx].fetch_sub(1, Ordering::Relaxed);
            return;
        }

        // Reset so stale samples never reach the next holder
        vec.fill(T::default());
        self.buckets[idx].push(vec);
    }
}

/// An array rented from an [`ArrayPool`], returned automatically on drop.
///
/// Derefs to the first `len()` elements of the backing storage.
pub struct PooledArray<T: Copy + Default + Send + 'static> {
    /// Backing storage (Option so `into_vec` can take it before drop runs)
    storage: Option<Vec<T>>,
    /// Logical length (may be < storage length)
    len: usize,
    /// Pool to return the storage to
    pool: Arc<ArrayPoolInner<T>>,
}

impl<T: Copy + Default + Send + 'static> PooledArray<T> {
    /// Logical length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the logical range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the backing storage (the size class).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.as_ref().map_or(0, Vec::len)
    }

    /// The logical elements.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            Some(vec) => &vec[..self.len],
            None => &[],
        }
    }

    /// Mutable access to the logical elements.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.storage {
            Some(vec) => &mut vec[..self.len],
            None => &mut [],
        }
    }

    /// Shorten the logical range. Has no effect if `len` is not smaller.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Detach the storage from the pool and return it as a plain vector.
    ///
    /// The rental counts as returned; the vector is not parked.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<T> {
        let mut vec = self.storage.take().unwrap_or_default();
        vec.truncate(self.len);
        self.pool.mark_returned();
        vec
    }
}

impl<T: Copy + Default + Send + 'static> Deref for PooledArray<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T: Copy + Default + Send + 'static> DerefMut for PooledArray<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T: Copy + Default + Send + 'static> AsRef<[T]> for PooledArray<T> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Copy + Default + Send + fmt::Debug + 'static> fmt::Debug for PooledArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledArray")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T: Copy + Default + Send + 'static> Drop for PooledArray<T> {
    fn drop(&mut self) {
        if let Some(vec) = self.storage.take() {
            self.pool.release(vec);
        }
    }
}
