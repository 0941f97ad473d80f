//! Row-oriented CSV export of multiple channels.
//!
//! Output is one header line of comma-joined channel names, then one line per
//! sample index. Rows are assembled one at a time in a reused buffer and
//! written straight through to the sink, so export cost stays linear in the
//! number of rows.
//!
//! Channels of unequal length are reconciled by truncating every column to
//! the shortest one, keeping the table rectangular.

use crate::data::export::ExportSeries;
use crate::data::format;
use crate::error::AppResult;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Initial capacity of the reused row buffer.
const ROW_BUFFER_BYTES: usize = 4096;

/// Number of rows a CSV export of `series` will contain.
///
/// The shortest series bounds the row count; `row_limit` can only lower it.
pub fn common_length(series: &[ExportSeries<'_>], row_limit: Option<usize>) -> usize {
    let shortest = series.iter().map(|s| s.values.len()).min().unwrap_or(0);
    row_limit.map_or(shortest, |limit| limit.min(shortest))
}

fn push_name(row: &mut BytesMut, name: &str) {
    if name.contains([',', '"', '\n', '\r']) {
        row.put_u8(b'"');
        row.put_slice(name.replace('"', "\"\"").as_bytes());
        row.put_u8(b'"');
    } else {
        row.put_slice(name.as_bytes());
    }
}

/// Write `series` as CSV to `writer`. Returns the number of data rows written.
pub async fn write_csv<W>(
    writer: &mut W,
    series: &[ExportSeries<'_>],
    row_limit: Option<usize>,
) -> AppResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let rows = common_length(series, row_limit);
    if series.iter().any(|s| s.values.len() != rows) {
        debug!(
            rows,
            longest = series.iter().map(|s| s.values.len()).max().unwrap_or(0),
            "Truncating channels to common length for CSV"
        );
    }

    let mut row = BytesMut::with_capacity(ROW_BUFFER_BYTES);
    for (col, s) in series.iter().enumerate() {
        if col > 0 {
            row.put_u8(b',');
        }
        push_name(&mut row, s.name);
    }
    row.put_u8(b'\n');
    writer.write_all(&row).await?;

    for i in 0..rows {
        row.clear();
        for (col, s) in series.iter().enumerate() {
            if col > 0 {
                row.put_u8(b',');
            }
            format::push_sample(&mut row, s.values[i]);
        }
        row.put_u8(b'\n');
        writer.write_all(&row).await?;
    }

    Ok(rows)
}
