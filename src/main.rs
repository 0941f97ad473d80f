//! CLI entry point for plc-telemetry
//!
//! Provides a command-line interface for:
//! - Running a capture from the synthetic source and exporting it
//! - Inspecting a `.mat` file written by the exporter
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! plc-telemetry capture --ticks 20000 --channels MAIN.fPosition,MAIN.fVelocity
//! plc-telemetry inspect logs/log_quick_2ms_20240309140507.mat
//! plc-telemetry config --config config/telemetry.toml
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use plc_telemetry::config::{TelemetryConfig, DEFAULT_CONFIG_PATH};
use plc_telemetry::data::mat;
use plc_telemetry::data::registry::ChannelRegistry;
use plc_telemetry::logging;
use plc_telemetry::source::{run_capture, Namespace, SyntheticSource};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "plc-telemetry")]
#[command(about = "High-rate PLC telemetry capture with spill-to-disk buffering", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture synthetic telemetry and export it
    Capture {
        /// Fast channels, comma separated
        #[arg(
            long,
            value_delimiter = ',',
            default_value = "MAIN.fPosition,MAIN.fVelocity,TwinCAT_SystemInfoVarList._TaskInfo[1].CycleTime"
        )]
        channels: Vec<String>,

        /// Slow channels, comma separated
        #[arg(long, value_delimiter = ',', default_value = "MAIN.fTemperature")]
        slow_channels: Vec<String>,

        /// Number of fast ticks to capture
        #[arg(long, default_value_t = 5000)]
        ticks: u64,

        /// Number of slow ticks to capture
        #[arg(long, default_value_t = 3)]
        slow_ticks: u64,

        /// Pace ticks at the configured periods instead of running flat out
        #[arg(long)]
        paced: bool,

        /// Keep the spill logs after export
        #[arg(long)]
        keep_spill: bool,
    },

    /// List the variables stored in a .mat file
    Inspect {
        /// Path to the .mat file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TelemetryConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Capture {
            channels,
            slow_channels,
            ticks,
            slow_ticks,
            paced,
            keep_spill,
        } => {
            capture(
                &config,
                channels,
                slow_channels,
                ticks,
                slow_ticks,
                paced,
                keep_spill,
            )
            .await
        }
        Commands::Inspect { file } => inspect(file).await,
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn capture(
    config: &TelemetryConfig,
    channels: Vec<String>,
    slow_channels: Vec<String>,
    ticks: u64,
    slow_ticks: u64,
    paced: bool,
    keep_spill: bool,
) -> Result<()> {
    let mut registry = ChannelRegistry::new(config.capture.channel_settings());
    for name in &channels {
        registry.register_fast(name)?;
    }
    for name in &slow_channels {
        registry.register_slow(name)?;
    }

    info!(
        app = %config.application.name,
        fast = channels.len(),
        slow = slow_channels.len(),
        capacity = config.capture.buffer_capacity,
        "Starting capture"
    );

    let mut fast_source = SyntheticSource::new(channels, ticks);
    let mut slow_source = SyntheticSource::new(slow_channels, slow_ticks);
    let (quick_period, slow_period) = if paced {
        (
            Some(config.capture.quick_period()),
            Some(config.capture.slow_period()),
        )
    } else {
        (None, None)
    };

    tokio::try_join!(
        run_capture(&registry, &mut fast_source, quick_period, Namespace::Fast),
        run_capture(&registry, &mut slow_source, slow_period, Namespace::Slow),
    )?;

    let now = Local::now();
    let formats = &config.export.file_types;
    let row_limit = config.export.row_limit;

    let quick = registry.load_all().await?;
    if quick.min_length() == 0 && !quick.is_empty() {
        warn!("At least one fast channel recorded no samples");
    }
    let quick_files = registry
        .export(&quick, &config.quick_export_base(now), formats, row_limit)
        .await?;
    drop(quick);

    let slow = registry.slow_snapshot();
    let slow_files = if slow.is_empty() {
        Vec::new()
    } else {
        registry
            .export(&slow, &config.slow_export_base(now), formats, row_limit)
            .await?
    };

    if !keep_spill {
        registry.delete_all_backing_files().await?;
    }
    registry.remove_all_channels();
    registry.remove_all_slow();

    for path in quick_files.iter().chain(&slow_files) {
        println!("{}", path.display());
    }
    Ok(())
}

async fn inspect(file: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let header = mat::read_header(&bytes)?;
    println!("{}", header.description);

    for matrix in mat::read_matrices(&bytes)? {
        let first = matrix.values.first().copied().unwrap_or(f64::NAN);
        let last = matrix.values.last().copied().unwrap_or(f64::NAN);
        println!(
            "{:<40} {}x{}  first={first:?} last={last:?}",
            matrix.name, matrix.rows, matrix.cols
        );
    }
    Ok(())
}
