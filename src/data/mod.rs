//! Capture buffers, spill channels and export writers.
pub mod channel;
pub mod csv_export;
pub mod export;
pub mod format;
pub mod mat;
pub mod registry;
pub mod ring_buffer;

pub use channel::{Channel, ChannelHistory, ChannelPools, ChannelSettings};
pub use export::{ExportFormat, ExportSeries};
pub use registry::{ChannelRegistry, LoadedChannels};
pub use ring_buffer::RingBuffer;
