//! Reusable array pool for telemetry sample storage.
//!
//! Sampling channels need large `f64` arrays twice in their lifetime: once for
//! the ring buffer that absorbs incoming samples, and once more when the full
//! history is reloaded for export. Both are rented from an [`ArrayPool`] so
//! that repeated capture/export cycles reuse the same allocations instead of
//! hammering the allocator with multi-megabyte vectors.
//!
//! # Ownership Model
//!
//! Renting hands out a [`PooledArray`], an RAII guard that owns the backing
//! `Vec<T>` until it is dropped. The storage is returned to the pool from
//! `Drop`, which runs exactly once, so a double return or a use after return
//! cannot be expressed in safe code. Pools are explicit values passed to
//! their users; there is no process-wide shared pool.
//!
//! ```text
//! 1. ArrayPool::rent(len) pops a vector of the matching size class
//!    (or allocates one on a miss, the pool never blocks)
//! 2. PooledArray derefs to exactly `len` elements, all T::default()
//! 3. Holder writes samples through DerefMut
//! 4. PooledArray dropped -> vector reset to T::default() and parked
//! ```
//!
//! # Example
//!
//! ```
//! use telemetry_pool::ArrayPool;
//!
//! let pool: ArrayPool<f64> = ArrayPool::default();
//!
//! let mut samples = pool.rent(1000);
//! samples[0] = 42.0;
//! assert_eq!(samples.len(), 1000);
//! assert_eq!(pool.outstanding(), 1);
//!
//! // Return to pool automatically when dropped
//! drop(samples);
//! assert_eq!(pool.outstanding(), 0);
//! ```

pub mod array_pool;

pub use array_pool::{ArrayPool, PooledArray, DEFAULT_MAX_PER_BUCKET};
