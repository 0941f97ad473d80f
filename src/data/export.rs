//! Export format dispatch.
//!
//! Given a set of named series and a base path (no extension), writes one file
//! per requested format: `<base>.csv` and/or `<base>.mat`.
//!
//! | format | reconciliation                                  |
//! |--------|-------------------------------------------------|
//! | csv    | all columns truncated to the shortest series    |
//! | mat    | each series keeps its own length (`len x 1`)    |

use crate::data::csv_export;
use crate::data::mat::{sanitize_name, MatWriter};
use crate::error::{AppResult, TelemetryError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

/// Write buffer size for export files.
const EXPORT_BUFFER_BYTES: usize = 64 * 1024;

/// A named series borrowed for export.
#[derive(Debug, Clone, Copy)]
pub struct ExportSeries<'a> {
    /// Channel name
    pub name: &'a str,
    /// Samples in order
    pub values: &'a [f64],
}

/// Supported export file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated text, one row per sample index
    Csv,
    /// MATLAB level-5 binary matrix file
    Mat,
}

impl ExportFormat {
    /// Every supported format.
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Csv, ExportFormat::Mat];

    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Mat => "mat",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "mat" => Ok(ExportFormat::Mat),
            _ => Err(TelemetryError::UnknownFormat(s.to_string())),
        }
    }
}

/// `<base>.<ext>`, appending rather than replacing any dot already in `base`.
pub fn export_path(base: &Path, format: ExportFormat) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(".");
    path.push(format.extension());
    PathBuf::from(path)
}

/// Write `series` once per distinct format in `formats`.
///
/// Returns the paths written, in request order. A failure aborts the export;
/// files already written are left in place.
pub async fn export_series(
    series: &[ExportSeries<'_>],
    base: &Path,
    formats: &[ExportFormat],
    row_limit: Option<usize>,
) -> AppResult<Vec<PathBuf>> {
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut written = Vec::new();
    let mut seen = HashSet::new();
    for format in formats.iter().copied() {
        if !seen.insert(format) {
            continue;
        }
        let path = export_path(base, format);
        match format {
            ExportFormat::Csv => export_csv(series, &path, row_limit).await?,
            ExportFormat::Mat => export_mat(series, &path).await?,
        }
        written.push(path);
    }
    Ok(written)
}

async fn export_csv(
    series: &[ExportSeries<'_>],
    path: &Path,
    row_limit: Option<usize>,
) -> AppResult<()> {
    let file = File::create(path).await?;
    let mut writer = BufWriter::with_capacity(EXPORT_BUFFER_BYTES, file);
    let rows = csv_export::write_csv(&mut writer, series, row_limit).await?;
    writer.flush().await?;

    info!(
        path = %path.display(),
        channels = series.len(),
        rows,
        "CSV export written"
    );
    Ok(())
}

async fn export_mat(series: &[ExportSeries<'_>], path: &Path) -> AppResult<()> {
    let file = File::create(path).await?;
    let mut writer = MatWriter::new(BufWriter::with_capacity(EXPORT_BUFFER_BYTES, file));
    writer.write_header().await?;

    let mut names = HashSet::new();
    for s in series {
        let name = sanitize_name(s.name);
        if !names.insert(name.clone()) {
            warn!(
                channel = s.name,
                variable = %name,
                "Sanitized name collides with an earlier channel; MATLAB keeps the last one"
            );
        }
        writer
            .write_matrix(&name, s.values, s.values.len(), 1)
            .await?;
    }
    writer.finish().await?;

    info!(path = %path.display(), channels = series.len(), "MAT export written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_tags() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(" MAT ".parse::<ExportFormat>().unwrap(), ExportFormat::Mat);
        assert!(matches!(
            "xlsx".parse::<ExportFormat>(),
            Err(TelemetryError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_export_path_appends_extension() {
        let base = Path::new("/data/log_quick_2ms.v1");
        assert_eq!(
            export_path(base, ExportFormat::Csv),
            PathBuf::from("/data/log_quick_2ms.v1.csv")
        );
        assert_eq!(export_path(base, ExportFormat::Mat).extension().unwrap(), "mat");
    }

    #[tokio::test]
    async fn test_duplicate_formats_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nested").join("out");
        let values = [1.0, 2.0];
        let series = [ExportSeries {
            name: "a",
            values: &values,
        }];

        let written = export_series(
            &series,
            &base,
            &[ExportFormat::Csv, ExportFormat::Csv, ExportFormat::Mat],
            None,
        )
        .await
        .unwrap();

        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn test_no_formats_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let written = export_series(&[], &dir.path().join("none"), &[], None)
            .await
            .unwrap();
        assert!(written.is_empty());
    }
}
