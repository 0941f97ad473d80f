//! Spill-capable telemetry channel.
//!
//! A `Channel` owns one [`RingBuffer`] and an append-only spill log on disk.
//! Every time the ring reaches half of its capacity the buffered samples are
//! streamed to the log, so memory stays bounded to `capacity` samples no matter
//! how long sampling runs. On export the full history is rebuilt from the log
//! plus whatever is still resident in the ring.
//!
//! # Spill Log Format
//! ```text
//! <spill_dir>/_<name>.csv
//!   1.0\n
//!   2.5\n
//!   ...
//! ```
//! One value per line, shortest round-trip formatting (see [`format`]).
//!
//! The log belongs to one channel lifetime. The first spill truncates whatever
//! an earlier channel of the same name left behind, and a reload before that
//! first spill ignores the file entirely.
//!
//! # Failed Spills
//! Samples stay in the ring until their append has completed. A failed or
//! timed-out append leaves the channel as it was, and every later `add`
//! retries the spill. Each append first cuts the log back to the last
//! committed length, so a write torn by a timeout never leaves a half line.
//!
//! # Concurrency
//! All mutating operations take `&mut self`, so a new `add` cannot overlap an
//! in-flight spill of the same channel. Callers sharing a channel wrap it in a
//! mutex (see [`ChannelRegistry`](crate::data::registry::ChannelRegistry)).

use crate::data::format;
use crate::data::ring_buffer::RingBuffer;
use crate::error::{AppResult, TelemetryError};
use bytes::BytesMut;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_pool::{ArrayPool, PooledArray};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Size of each read when streaming a spill log back in.
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Default disk timeout for a single spill.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Pools shared by every channel of a registry.
#[derive(Clone, Debug, Default)]
pub struct ChannelPools {
    /// Ring storage and reloaded histories
    pub samples: ArrayPool<f64>,
    /// Read chunks used while streaming spill logs
    pub bytes: ArrayPool<u8>,
}

/// Per-channel capture settings.
#[derive(Clone, Debug)]
pub struct ChannelSettings {
    /// Ring buffer capacity in samples
    pub capacity: usize,
    /// Directory holding the spill logs
    pub spill_dir: PathBuf,
    /// Timeout applied to each spill append
    pub io_timeout: Duration,
}

impl ChannelSettings {
    /// Settings with the default I/O timeout.
    pub fn new(capacity: usize, spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            capacity,
            spill_dir: spill_dir.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Override the per-spill timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

/// Spill log file name for a channel: `_<name>.csv`.
///
/// Path separators, characters Windows rejects in file names, and control
/// characters are replaced with `_`, so the log always lands directly inside
/// the spill directory.
pub fn spill_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("_{safe}.csv")
}

/// Full history of a channel, rebuilt for export.
#[derive(Debug)]
pub struct ChannelHistory {
    /// Pooled array sized to the expected sample count; entries past
    /// `data_length` repeat the last recovered value.
    pub values: PooledArray<f64>,
    /// Number of samples actually recovered
    pub data_length: usize,
}

impl ChannelHistory {
    /// The recovered samples, without padding.
    pub fn samples(&self) -> &[f64] {
        &self.values[..self.data_length]
    }
}

/// A named, independently buffered time series.
pub struct Channel {
    name: String,
    ring: RingBuffer,
    /// Samples ever added (corrected downward if a reload comes up short)
    data_length: usize,
    backing_path: PathBuf,
    io_timeout: Duration,
    pools: ChannelPools,
    spill_dir_ready: bool,
    spills: u64,
    /// Bytes of the log written by this channel, `None` before the first spill
    committed: Option<u64>,
    /// An append failed after the last commit and may have left a torn tail
    torn: bool,
}

impl Channel {
    /// Create a channel, renting its ring storage from `pools.samples`.
    pub fn new(name: &str, settings: &ChannelSettings, pools: &ChannelPools) -> AppResult<Self> {
        let ring = RingBuffer::new(settings.capacity, &pools.samples)?;
        let backing_path = settings.spill_dir.join(spill_file_name(name));

        debug!(
            channel = name,
            capacity = settings.capacity,
            path = %backing_path.display(),
            "Channel created"
        );

        Ok(Self {
            name: name.to_string(),
            ring,
            data_length: 0,
            backing_path,
            io_timeout: settings.io_timeout,
            pools: pools.clone(),
            spill_dir_ready: false,
            spills: 0,
            committed: None,
            torn: false,
        })
    }

    /// Channel (symbol) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cumulative count of samples ever added.
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Samples currently resident in the ring.
    pub fn buffered(&self) -> usize {
        self.ring.size()
    }

    /// Ring capacity in samples.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Location of the spill log.
    pub fn backing_path(&self) -> &Path {
        &self.backing_path
    }

    /// Number of completed spills.
    pub fn spill_count(&self) -> u64 {
        self.spills
    }

    /// Append one sample, spilling the buffered half to disk when due.
    ///
    /// A spill failure is returned to the caller after the sample itself has
    /// been recorded. The unspilled samples stay buffered and the next `add`
    /// retries, so nothing is lost unless failures persist until the ring
    /// starts overwriting.
    pub async fn add(&mut self, value: f64) -> AppResult<()> {
        self.ring.add(value);
        self.data_length += 1;

        if self.ring.size() * 2 >= self.ring.capacity() {
            self.spill().await?;
        }
        Ok(())
    }

    async fn spill(&mut self) -> AppResult<()> {
        if !self.spill_dir_ready {
            if let Some(dir) = self.backing_path.parent() {
                fs::create_dir_all(dir).await?;
            }
            self.spill_dir_ready = true;
        }

        let count = self.ring.size();
        debug!(
            channel = %self.name,
            count,
            path = %self.backing_path.display(),
            "Buffer is half full, spilling to file"
        );

        let mut chunk = BytesMut::with_capacity(count * 24);
        for value in self.ring.iter() {
            format::push_sample(&mut chunk, value);
            chunk.extend_from_slice(b"\n");
        }

        let offset = self.committed.unwrap_or(0);
        let append = append_chunk(&self.backing_path, offset, &chunk);
        match tokio::time::timeout(self.io_timeout, append).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.torn = true;
                warn!(
                    channel = %self.name,
                    error = %e,
                    buffered = count,
                    "Spill failed, samples kept in memory"
                );
                return Err(e.into());
            }
            Err(_) => {
                self.torn = true;
                warn!(
                    channel = %self.name,
                    timeout_ms = self.io_timeout.as_millis(),
                    buffered = count,
                    "Spill timed out, samples kept in memory"
                );
                return Err(TelemetryError::IoTimeout {
                    path: self.backing_path.display().to_string(),
                    timeout: self.io_timeout,
                });
            }
        }

        self.ring.discard(count);
        self.committed = Some(offset + chunk.len() as u64);
        self.torn = false;
        self.spills += 1;
        Ok(())
    }

    /// Rebuild the full history: spill log contents followed by the samples
    /// still resident in the ring.
    ///
    /// - A missing spill log counts as an empty log, as does any file present
    ///   before this channel's first spill.
    /// - Unparseable lines are logged and recorded as `0.0`.
    /// - Values beyond `data_length` are ignored.
    /// - If fewer than `data_length` values are recovered, `data_length` is
    ///   corrected downward and the remaining entries repeat the last value.
    pub async fn load_full_history(&mut self) -> AppResult<ChannelHistory> {
        let expected = self.data_length;
        let mut values = self.pools.samples.rent(expected);

        let mut filled = match self.committed {
            None => {
                debug!(channel = %self.name, "Nothing spilled yet, history is in memory only");
                0
            }
            Some(committed) => match File::open(&self.backing_path).await {
                Ok(file) => {
                    // A torn tail past the last commit is not part of the history
                    let limit = if self.torn { committed } else { u64::MAX };
                    read_spill_log(
                        file.take(limit),
                        &mut values,
                        &self.pools.bytes,
                        &self.name,
                        &self.backing_path,
                    )
                    .await?
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(channel = %self.name, "Spill log missing, history is in memory only");
                    0
                }
                Err(e) => return Err(e.into()),
            },
        };

        for value in self.ring.iter() {
            if filled >= values.len() {
                break;
            }
            values[filled] = value;
            filled += 1;
        }

        if filled < expected {
            warn!(
                channel = %self.name,
                expected,
                actual = filled,
                "Recovered fewer samples than were added, correcting data length"
            );
            self.data_length = filled;
        }

        if filled > 0 {
            let last = values[filled - 1];
            values[filled..].fill(last);
        }

        info!(
            channel = %self.name,
            path = %self.backing_path.display(),
            ideal = expected,
            actual = filled,
            "Retrieved full history"
        );

        Ok(ChannelHistory {
            values,
            data_length: self.data_length,
        })
    }

    /// Delete the spill log. Returns whether a file was removed.
    ///
    /// Later spills start a fresh log.
    pub async fn delete_backing_file(&mut self) -> AppResult<bool> {
        if self.committed.is_some() {
            self.committed = Some(0);
            self.torn = false;
        }
        match fs::remove_file(&self.backing_path).await {
            Ok(()) => {
                info!(path = %self.backing_path.display(), "Deleted spill log");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the spill log and release the ring storage.
    pub async fn teardown(mut self) -> AppResult<()> {
        self.delete_backing_file().await?;
        debug!(channel = %self.name, "Channel torn down");
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("data_length", &self.data_length)
            .field("ring", &self.ring)
            .field("backing_path", &self.backing_path)
            .finish()
    }
}

/// Write `chunk` at `offset`, cutting off anything already past it.
///
/// With `offset == 0` this discards a log left by an earlier channel.
async fn append_chunk(path: &Path, offset: u64, chunk: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(chunk).await?;
    file.flush().await
}

/// Stream a spill log into `out`, returning how many entries were filled.
///
/// Lines can straddle chunk reads; the incomplete tail of each chunk is carried
/// over in `pending` until its newline arrives.
async fn read_spill_log<R: AsyncRead + Unpin>(
    mut file: R,
    out: &mut [f64],
    byte_pool: &ArrayPool<u8>,
    channel: &str,
    path: &Path,
) -> AppResult<usize> {
    let mut chunk = byte_pool.rent(READ_CHUNK_BYTES);
    let mut pending: Vec<u8> = Vec::with_capacity(256);
    let mut index = 0;

    let mut store = |line: &[u8], index: &mut usize| -> bool {
        if *index >= out.len() {
            return false;
        }
        out[*index] = format::parse_sample(line).unwrap_or_else(|| {
            warn!(
                channel,
                line = %String::from_utf8_lossy(line),
                path = %path.display(),
                "Failed to parse line, recording 0.0"
            );
            0.0
        });
        *index += 1;
        true
    };

    loop {
        let read = file.read(chunk.as_mut_slice()).await?;
        if read == 0 {
            break;
        }

        let mut rest = &chunk[..read];
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let keep_going = if pending.is_empty() {
                store(&rest[..pos], &mut index)
            } else {
                pending.extend_from_slice(&rest[..pos]);
                let stored = store(&pending, &mut index);
                pending.clear();
                stored
            };
            if !keep_going {
                return Ok(index);
            }
            rest = &rest[pos + 1..];
        }
        pending.extend_from_slice(rest);
    }

    if !pending.is_empty() {
        store(&pending, &mut index);
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn setup(capacity: usize) -> (tempfile::TempDir, ChannelSettings, ChannelPools) {
        let dir = tempfile::tempdir().unwrap();
        let settings = ChannelSettings::new(capacity, dir.path());
        (dir, settings, ChannelPools::default())
    }

    async fn line_count(path: &Path) -> usize {
        fs::read_to_string(path).await.unwrap().lines().count()
    }

    #[test]
    fn test_spill_file_name() {
        assert_eq!(spill_file_name("MAIN.fVelocity"), "_MAIN.fVelocity.csv");
        assert_eq!(spill_file_name("a/b\\c"), "_a_b_c.csv");
        assert_eq!(spill_file_name("PLC1:Axis*?"), "_PLC1_Axis__.csv");
        assert_eq!(spill_file_name("a<b>|\"c\""), "_a_b___c_.csv");
        assert_eq!(spill_file_name("Task[1].Cycle"), "_Task[1].Cycle.csv");
    }

    #[tokio::test]
    async fn test_spill_triggers_at_half_capacity() {
        let (_dir, settings, pools) = setup(10);
        let mut channel = Channel::new("speed", &settings, &pools).unwrap();

        for i in 1..=4 {
            channel.add(f64::from(i)).await.unwrap();
        }
        assert_eq!(channel.buffered(), 4);
        assert!(!channel.backing_path().exists());

        channel.add(5.0).await.unwrap();
        assert_eq!(channel.buffered(), 0);
        assert_eq!(channel.spill_count(), 1);
        assert_eq!(line_count(channel.backing_path()).await, 5);
        assert_eq!(channel.data_length(), 5);
    }

    #[tokio::test]
    async fn test_full_history_round_trip_across_spills() {
        let (_dir, settings, pools) = setup(10);
        let mut channel = Channel::new("pos", &settings, &pools).unwrap();

        let n = 23;
        for i in 1..=n {
            channel.add(f64::from(i)).await.unwrap();
        }
        assert_eq!(channel.spill_count(), 4);
        assert_eq!(channel.buffered(), 3);

        let history = channel.load_full_history().await.unwrap();
        let expected: Vec<f64> = (1..=n).map(f64::from).collect();
        assert_eq!(history.data_length, n as usize);
        assert_eq!(history.samples(), expected.as_slice());

        // Reload is non-destructive
        assert_eq!(channel.buffered(), 3);
    }

    #[tokio::test]
    async fn test_large_history_crosses_read_chunks() {
        let (_dir, settings, pools) = setup(1000);
        let mut channel = Channel::new("big", &settings, &pools).unwrap();

        let n = 50_000u32;
        for i in 0..n {
            channel.add(f64::from(i) * 0.001 + 1.0 / 3.0).await.unwrap();
        }
        let size = fs::metadata(channel.backing_path()).await.unwrap().len();
        assert!(size > 2 * READ_CHUNK_BYTES as u64);

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.data_length, n as usize);
        for (i, value) in history.samples().iter().enumerate() {
            assert_eq!(*value, i as f64 * 0.001 + 1.0 / 3.0);
        }
    }

    #[tokio::test]
    async fn test_missing_file_and_no_samples_is_empty() {
        let (_dir, settings, pools) = setup(10);
        let mut channel = Channel::new("idle", &settings, &pools).unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.data_length, 0);
        assert!(history.samples().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_returns_resident_samples() {
        let (_dir, settings, pools) = setup(10);
        let mut channel = Channel::new("short", &settings, &pools).unwrap();
        channel.add(1.5).await.unwrap();
        channel.add(2.5).await.unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.samples(), &[1.5, 2.5]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unparseable_line_recorded_as_zero() {
        let (_dir, settings, pools) = setup(4);
        let mut channel = Channel::new("bad", &settings, &pools).unwrap();
        for i in 1..=4 {
            channel.add(f64::from(i)).await.unwrap();
        }
        fs::write(channel.backing_path(), "1\nbogus\n3\n4\n")
            .await
            .unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.samples(), &[1.0, 0.0, 3.0, 4.0]);
        assert!(logs_contain("Failed to parse line"));
    }

    #[tokio::test]
    async fn test_short_file_corrects_length_and_pads() {
        let (_dir, settings, pools) = setup(4);
        let mut channel = Channel::new("lag", &settings, &pools).unwrap();
        for i in 1..=8 {
            channel.add(f64::from(i)).await.unwrap();
        }
        assert_eq!(channel.buffered(), 0);
        fs::write(channel.backing_path(), "1\n2\n3\n").await.unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.data_length, 3);
        assert_eq!(channel.data_length(), 3);
        assert_eq!(&history.values[..], &[1.0, 2.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0]);
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_last_line() {
        let (_dir, settings, pools) = setup(4);
        let mut channel = Channel::new("crlf", &settings, &pools).unwrap();
        for i in 1..=4 {
            channel.add(f64::from(i)).await.unwrap();
        }
        fs::write(channel.backing_path(), "10\r\n20\r\n30\r\n40").await.unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.samples(), &[10.0, 20.0, 30.0, 40.0]);
    }

    #[tokio::test]
    async fn test_extra_lines_beyond_data_length_ignored() {
        let (_dir, settings, pools) = setup(4);
        let mut channel = Channel::new("extra", &settings, &pools).unwrap();
        for i in 1..=2 {
            channel.add(f64::from(i)).await.unwrap();
        }
        fs::write(channel.backing_path(), "1\n2\n99\n100\n").await.unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.data_length, 2);
        assert_eq!(history.samples(), &[1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_stale_log_from_earlier_channel_is_ignored() {
        let (_dir, settings, pools) = setup(4);
        let path = settings.spill_dir.join(spill_file_name("reuse"));
        fs::write(&path, "100\n200\n300\n").await.unwrap();

        let mut channel = Channel::new("reuse", &settings, &pools).unwrap();
        channel.add(1.0).await.unwrap();
        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.samples(), &[1.0]);
        drop(history);

        // First spill replaces the stale contents
        for i in 2..=4 {
            channel.add(f64::from(i)).await.unwrap();
        }
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "1.0\n2.0\n3.0\n4.0\n");
        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.samples(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_failed_spill_keeps_samples_for_retry() {
        let (_dir, settings, pools) = setup(4);
        let mut channel = Channel::new("blocked", &settings, &pools).unwrap();
        fs::create_dir(channel.backing_path()).await.unwrap();

        channel.add(1.0).await.unwrap();
        let err = channel.add(2.0).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Io(_)));
        assert_eq!(channel.data_length(), 2);
        assert_eq!(channel.buffered(), 2);
        assert_eq!(channel.spill_count(), 0);

        fs::remove_dir(channel.backing_path()).await.unwrap();
        channel.add(3.0).await.unwrap();
        assert_eq!(channel.buffered(), 0);
        channel.add(4.0).await.unwrap();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.data_length, 4);
        assert_eq!(history.samples(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_spill_cuts_bytes_past_last_commit() {
        let (_dir, settings, pools) = setup(4);
        let mut channel = Channel::new("tail", &settings, &pools).unwrap();
        channel.add(1.0).await.unwrap();
        channel.add(2.0).await.unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(channel.backing_path())
            .await
            .unwrap();
        file.write_all(b"9.87").await.unwrap();
        drop(file);

        channel.add(3.0).await.unwrap();
        channel.add(4.0).await.unwrap();
        assert_eq!(
            fs::read_to_string(channel.backing_path()).await.unwrap(),
            "1.0\n2.0\n3.0\n4.0\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spill_timeout_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let settings =
            ChannelSettings::new(4, dir.path()).with_io_timeout(Duration::from_millis(50));
        let pools = ChannelPools::default();
        let mut channel = Channel::new("stall", &settings, &pools).unwrap();

        // Opening a FIFO for writing blocks until a reader shows up
        let path = channel.backing_path().to_path_buf();
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());

        channel.add(1.0).await.unwrap();
        let err = channel.add(2.0).await.unwrap_err();
        assert!(matches!(err, TelemetryError::IoTimeout { .. }));
        assert!(err.is_recoverable());
        assert_eq!(channel.data_length(), 2);
        assert_eq!(channel.buffered(), 2);

        // Release the stalled writer, then replace the FIFO with a regular log
        let fifo = path.clone();
        tokio::task::spawn_blocking(move || std::fs::File::open(fifo))
            .await
            .unwrap()
            .unwrap();
        fs::remove_file(&path).await.unwrap();

        channel.add(3.0).await.unwrap();
        channel.add(4.0).await.unwrap();
        let history = channel.load_full_history().await.unwrap();
        assert_eq!(history.data_length, 4);
        assert_eq!(history.samples(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_delete_backing_file_is_idempotent() {
        let (_dir, settings, pools) = setup(2);
        let mut channel = Channel::new("del", &settings, &pools).unwrap();
        channel.add(1.0).await.unwrap();
        assert!(channel.backing_path().exists());

        assert!(channel.delete_backing_file().await.unwrap());
        assert!(!channel.delete_backing_file().await.unwrap());
    }

    #[tokio::test]
    async fn test_teardown_releases_pooled_storage() {
        let (_dir, settings, pools) = setup(8);
        let mut channel = Channel::new("tear", &settings, &pools).unwrap();
        for i in 0..20 {
            channel.add(f64::from(i)).await.unwrap();
        }
        let path = channel.backing_path().to_path_buf();

        let history = channel.load_full_history().await.unwrap();
        assert_eq!(pools.samples.outstanding(), 2);
        drop(history);

        channel.teardown().await.unwrap();
        assert!(!path.exists());
        assert_eq!(pools.samples.outstanding(), 0);
        assert_eq!(pools.bytes.outstanding(), 0);
    }
}
