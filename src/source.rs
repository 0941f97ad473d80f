//! Sample sources and the capture loop.
//!
//! The controller connection is abstracted as a [`SampleSource`] that yields
//! one batch of `(symbol, value)` pairs per tick. [`run_capture`] feeds those
//! batches into a [`ChannelRegistry`], awaiting every add (and therefore every
//! spill) before pulling the next tick.

use crate::data::registry::ChannelRegistry;
use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

/// One tick of samples: symbol name and value.
pub type Tick = Vec<(String, f64)>;

/// Anything that produces samples tick by tick.
#[async_trait]
pub trait SampleSource: Send {
    /// Next batch of samples, or `None` once the source is exhausted.
    async fn next_tick(&mut self) -> Option<Tick>;
}

/// Which registry namespace a capture loop writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Spill-capable channels
    Fast,
    /// In-memory slow logs
    Slow,
}

/// Deterministic waveform generator for demos and tests.
///
/// Even-indexed channels carry a sine, odd-indexed channels a ramp.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    names: Vec<String>,
    ticks: u64,
    tick: u64,
}

impl SyntheticSource {
    /// Source over `names` that stops after `ticks` ticks.
    pub fn new<I, S>(names: I, ticks: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ticks,
            tick: 0,
        }
    }

    /// Value channel `index` takes at `tick`.
    pub fn value_at(index: usize, tick: u64) -> f64 {
        let t = tick as f64;
        if index % 2 == 0 {
            (t * 0.01 + index as f64).sin()
        } else {
            t * index as f64 * 0.5
        }
    }
}

#[async_trait]
impl SampleSource for SyntheticSource {
    async fn next_tick(&mut self) -> Option<Tick> {
        if self.tick >= self.ticks {
            return None;
        }
        let tick = self.tick;
        self.tick += 1;

        Some(
            self.names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), Self::value_at(i, tick)))
                .collect(),
        )
    }
}

/// Drain `source` into `registry`, pacing ticks by `period` when given.
///
/// Returns the number of ticks recorded. The first error (unknown channel,
/// failed spill) stops the loop.
#[instrument(skip(registry, source))]
pub async fn run_capture<S>(
    registry: &ChannelRegistry,
    source: &mut S,
    period: Option<Duration>,
    namespace: Namespace,
) -> AppResult<u64>
where
    S: SampleSource + ?Sized,
{
    let mut pacing = period.map(|p| {
        let mut timer = interval(p);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    let mut ticks = 0u64;
    while let Some(samples) = source.next_tick().await {
        if let Some(timer) = pacing.as_mut() {
            timer.tick().await;
        }
        for (name, value) in samples {
            match namespace {
                Namespace::Fast => registry.add_sample(&name, value).await?,
                Namespace::Slow => registry.add_slow_sample(&name, value)?,
            }
        }
        ticks += 1;
        if ticks % 10_000 == 0 {
            debug!(ticks, "Capture progress");
        }
    }

    info!(ticks, "Capture finished");
    Ok(ticks)
}
