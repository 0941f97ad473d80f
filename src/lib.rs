//! # PLC Telemetry Core Library
//!
//! Capture and export pipeline for high-rate controller telemetry. Samples
//! land in fixed-capacity ring buffers, are spilled to per-channel logs on disk
//! so memory never grows with capture length, and are reconstructed in full
//! when exported to CSV or MATLAB level-5 `.mat` files.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (`TelemetryConfig`) with capture
//!   and export defaults and timestamped export names.
//! - **`data`**: The pipeline proper: `RingBuffer`, spill-capable `Channel`,
//!   `ChannelRegistry`, and the CSV and MAT writers.
//! - **`error`**: The `TelemetryError` enum shared by every module.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`source`**: The `SampleSource` trait and the capture loop that feeds a
//!   registry.
//!
//! Pooled backing arrays come from the `telemetry-pool` workspace crate.

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod source;

pub use error::{AppResult, TelemetryError};
