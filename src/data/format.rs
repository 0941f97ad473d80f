//! Culture-invariant sample formatting shared by the spill log and CSV export.
//!
//! Values are written with Rust's shortest round-trip representation (`{:?}`
//! for `f64`), so `str::parse::<f64>` recovers the exact bits. NaN and the
//! infinities come out as `NaN`, `inf` and `-inf`, which also parse back.

use bytes::BytesMut;
use std::fmt::Write;

/// Append `value` to `out` without a separator.
#[inline]
pub fn push_sample(out: &mut BytesMut, value: f64) {
    // Writing into BytesMut only fails on allocation failure, which aborts anyway.
    let _ = write!(out, "{value:?}");
}

/// Parse one spilled or exported sample, accepting a trailing `\r`.
pub fn parse_sample(line: &[u8]) -> Option<f64> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line).ok()?.parse().ok()
}
