//! Multi-channel registry: fast (spilling) channels and slow (in-memory) logs.
//!
//! The registry owns the sample pools and hands them to every channel it
//! creates, so tests and independent captures never share storage.
//!
//! # Namespaces
//! - **fast**: [`Channel`]s with a ring buffer and spill log, for high-rate
//!   symbols. Each sits behind its own `tokio::sync::Mutex`, giving one writer
//!   per channel while different channels progress independently.
//! - **slow**: plain growable sequences for low-rate symbols.
//!
//! The two namespaces are independent; the same name may appear in both.
//! Registering a name twice within one namespace is rejected.
//!
//! # Export Flow
//! ```text
//! load_all()  -> LoadedChannels (one ChannelHistory per fast channel,
//!                each with its own data_length, registration order)
//! export()    -> <base>.csv / <base>.mat
//! ```

use crate::data::channel::{Channel, ChannelHistory, ChannelPools, ChannelSettings};
use crate::data::export::{self, ExportFormat, ExportSeries};
use crate::error::{AppResult, TelemetryError};
use futures::future::try_join_all;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Shared handle to a fast channel.
pub type ChannelHandle = Arc<Mutex<Channel>>;

struct FastEntry {
    name: String,
    channel: ChannelHandle,
}

/// One reloaded channel.
#[derive(Debug)]
pub struct LoadedChannel {
    /// Channel name
    pub name: String,
    /// Reloaded samples
    pub history: ChannelHistory,
}

/// Reloaded channels in registration order.
#[derive(Debug, Default)]
pub struct LoadedChannels {
    channels: Vec<LoadedChannel>,
}

impl LoadedChannels {
    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channel was loaded.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// History of the named channel.
    pub fn get(&self, name: &str) -> Option<&ChannelHistory> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.history)
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &LoadedChannel> {
        self.channels.iter()
    }

    /// Each channel's recovered samples, trimmed to its own `data_length`.
    pub fn series(&self) -> Vec<ExportSeries<'_>> {
        self.channels
            .iter()
            .map(|c| ExportSeries {
                name: &c.name,
                values: c.history.samples(),
            })
            .collect()
    }

    /// Shortest `data_length` across channels (0 when empty).
    pub fn min_length(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.history.data_length)
            .min()
            .unwrap_or(0)
    }
}

/// Name-keyed registry of fast channels and slow logs.
pub struct ChannelRegistry {
    settings: ChannelSettings,
    pools: ChannelPools,
    fast: Vec<FastEntry>,
    fast_index: HashMap<String, usize>,
    slow: SyncMutex<Vec<(String, Vec<f64>)>>,
    slow_index: HashMap<String, usize>,
}

impl ChannelRegistry {
    /// Create an empty registry with its own pools.
    pub fn new(settings: ChannelSettings) -> Self {
        Self::with_pools(settings, ChannelPools::default())
    }

    /// Create an empty registry sharing existing pools.
    pub fn with_pools(settings: ChannelSettings, pools: ChannelPools) -> Self {
        Self {
            settings,
            pools,
            fast: Vec::new(),
            fast_index: HashMap::new(),
            slow: SyncMutex::new(Vec::new()),
            slow_index: HashMap::new(),
        }
    }

    /// Settings applied to new fast channels.
    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Pools shared by all fast channels.
    pub fn pools(&self) -> &ChannelPools {
        &self.pools
    }

    /// Register a fast (spill-capable) channel.
    pub fn register_fast(&mut self, name: &str) -> AppResult<ChannelHandle> {
        if self.fast_index.contains_key(name) {
            return Err(TelemetryError::DuplicateChannel(name.to_string()));
        }

        let channel = Arc::new(Mutex::new(Channel::new(name, &self.settings, &self.pools)?));
        self.fast_index.insert(name.to_string(), self.fast.len());
        self.fast.push(FastEntry {
            name: name.to_string(),
            channel: Arc::clone(&channel),
        });

        info!(channel = name, capacity = self.settings.capacity, "Registered fast channel");
        Ok(channel)
    }

    /// Register a slow (in-memory) log.
    pub fn register_slow(&mut self, name: &str) -> AppResult<()> {
        if self.slow_index.contains_key(name) {
            return Err(TelemetryError::DuplicateChannel(name.to_string()));
        }

        let mut slow = self.slow.lock();
        self.slow_index.insert(name.to_string(), slow.len());
        slow.push((name.to_string(), Vec::new()));

        info!(channel = name, "Registered slow log");
        Ok(())
    }

    /// Handle to a fast channel, for drivers that feed it directly.
    pub fn channel(&self, name: &str) -> Option<ChannelHandle> {
        self.fast_index
            .get(name)
            .map(|idx| Arc::clone(&self.fast[*idx].channel))
    }

    /// Fast channel names in registration order.
    pub fn fast_names(&self) -> impl Iterator<Item = &str> {
        self.fast.iter().map(|e| e.name.as_str())
    }

    /// Slow log names in registration order.
    pub fn slow_names(&self) -> Vec<String> {
        self.slow.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of fast channels.
    pub fn fast_len(&self) -> usize {
        self.fast.len()
    }

    /// Append a sample to a fast channel, waiting for any in-flight spill of
    /// that channel to finish first.
    pub async fn add_sample(&self, name: &str, value: f64) -> AppResult<()> {
        let idx = self
            .fast_index
            .get(name)
            .ok_or_else(|| TelemetryError::UnknownChannel(name.to_string()))?;
        self.fast[*idx].channel.lock().await.add(value).await
    }

    /// Append a sample to a slow log.
    pub fn add_slow_sample(&self, name: &str, value: f64) -> AppResult<()> {
        let idx = self
            .slow_index
            .get(name)
            .ok_or_else(|| TelemetryError::UnknownChannel(name.to_string()))?;
        self.slow.lock()[*idx].1.push(value);
        Ok(())
    }

    /// Reload every fast channel's full history, concurrently across channels.
    ///
    /// Each result keeps its own `data_length`; no common length is assumed.
    pub async fn load_all(&self) -> AppResult<LoadedChannels> {
        let loads = self.fast.iter().map(|entry| async move {
            let history = entry.channel.lock().await.load_full_history().await?;
            Ok::<_, TelemetryError>(LoadedChannel {
                name: entry.name.clone(),
                history,
            })
        });
        let channels = try_join_all(loads).await?;

        debug!(channels = channels.len(), "Reloaded all fast channels");
        Ok(LoadedChannels { channels })
    }

    /// Copy the slow logs into pooled arrays for export.
    pub fn slow_snapshot(&self) -> LoadedChannels {
        let slow = self.slow.lock();
        let channels = slow
            .iter()
            .map(|(name, values)| LoadedChannel {
                name: name.clone(),
                history: ChannelHistory {
                    values: self.pools.samples.rent_copy(values),
                    data_length: values.len(),
                },
            })
            .collect();
        LoadedChannels { channels }
    }

    /// Export reloaded data to `<base>.<ext>` for each requested format.
    ///
    /// CSV rows are bounded by the shortest channel (and by `row_limit` if
    /// given); MAT variables keep each channel's own length.
    pub async fn export(
        &self,
        data: &LoadedChannels,
        base: &Path,
        formats: &[ExportFormat],
        row_limit: Option<usize>,
    ) -> AppResult<Vec<PathBuf>> {
        export::export_series(&data.series(), base, formats, row_limit).await
    }

    /// Delete every fast channel's spill log. Returns how many files existed.
    pub async fn delete_all_backing_files(&self) -> AppResult<usize> {
        let mut deleted = 0;
        for entry in &self.fast {
            if entry.channel.lock().await.delete_backing_file().await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Drop all fast channels, returning their ring storage to the pool.
    ///
    /// Spill logs stay on disk; call
    /// [`delete_all_backing_files`](Self::delete_all_backing_files) first to
    /// remove them.
    pub fn remove_all_channels(&mut self) {
        debug!(channels = self.fast.len(), "Removing all fast channels");
        self.fast.clear();
        self.fast_index.clear();
    }

    /// Drop every slow log.
    pub fn remove_all_slow(&mut self) {
        self.slow.lock().clear();
        self.slow_index.clear();
    }
}
