//! Minimal MATLAB level-5 MAT-file encoder (and a reader for its own output).
//!
//! Only what channel export needs is supported: uncompressed, real,
//! double-precision 2-D arrays, little-endian throughout.
//!
//! # File Layout
//! ```text
//! [128-byte header] [matrix element]*
//!
//! Header:
//!   0..116   ASCII description, zero padded
//!   116..124 subsystem data offset (zero)
//!   124..126 version 0x0100, stored little-endian: [0x00, 0x01]
//!   126..128 endian indicator "IM"
//!
//! Matrix element:
//!   tag      miMATRIX (14)  | payload length
//!   flags    miUINT32 (6)   | 8 | mxDOUBLE_CLASS (6) | 0
//!   dims     miINT32  (5)   | 8 | rows | cols
//!   name     miINT8   (1)   | n | ASCII bytes, zero padded to 8
//!   data     miDOUBLE (9)   | rows*cols*8 | f64 values
//! ```
//!
//! The outer payload length is not derivable from nested prefixes while
//! streaming, so it is computed up front by [`matrix_payload_len`].

use crate::error::{AppResult, TelemetryError};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Local};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Size of the file header in bytes.
pub const HEADER_LEN: usize = 128;

/// Bytes of the header reserved for the description text.
pub const DESCRIPTION_LEN: usize = 116;

/// Version bytes as written at offset 124 (0x0100 in little-endian order).
pub const VERSION_BYTES: [u8; 2] = [0x00, 0x01];

/// Endian indicator at offset 126 for little-endian files.
pub const ENDIAN_INDICATOR: [u8; 2] = *b"IM";

/// Data type tag: 8-bit signed integers.
pub const MI_INT8: u32 = 1;
/// Data type tag: 32-bit signed integers.
pub const MI_INT32: u32 = 5;
/// Data type tag: 32-bit unsigned integers.
pub const MI_UINT32: u32 = 6;
/// Data type tag: IEEE 754 doubles.
pub const MI_DOUBLE: u32 = 9;
/// Data type tag: matrix element.
pub const MI_MATRIX: u32 = 14;
/// Array class: double precision.
pub const MX_DOUBLE_CLASS: u32 = 6;

const TAG_LEN: u64 = 8;

/// Values converted per write when streaming the data subelement.
const DATA_CHUNK_VALUES: usize = 8 * 1024;

/// TwinCAT task-info prefix, shortened to `Task` in variable names.
const TASK_INFO_PREFIX: &str = "TwinCAT_SystemInfoVarList._TaskInfo[1].";

/// Round `len` up to the next multiple of 8.
fn padded(len: u64) -> u64 {
    (len + 7) & !7
}

/// Map a channel name to a legal MAT variable name.
///
/// `.`, `[`, `]` and non-ASCII characters become `_`; the TwinCAT task-info
/// prefix is shortened to `Task` first.
pub fn sanitize_name(name: &str) -> String {
    name.replace(TASK_INFO_PREFIX, "Task")
        .chars()
        .map(|c| match c {
            '.' | '[' | ']' => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect()
}

/// Default header description, e.g.
/// `MATLAB 5.0 MAT-file, Platform: linux, Created on: Sun Oct 18 09:30:00 2026`.
pub fn default_description(now: DateTime<Local>) -> String {
    format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created on: {}",
        std::env::consts::OS,
        now.format("%a %b %d %H:%M:%S %Y")
    )
}

/// Build the 128-byte file header. Descriptions longer than 116 bytes are cut.
pub fn header_bytes(description: &str) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    let text = description.as_bytes();
    let len = text.len().min(DESCRIPTION_LEN);
    header[..len].copy_from_slice(&text[..len]);
    header[124..126].copy_from_slice(&VERSION_BYTES);
    header[126..128].copy_from_slice(&ENDIAN_INDICATOR);
    header
}

/// Payload length of a matrix element: the four subelements including their
/// own tags, each payload padded to a multiple of 8.
///
/// Returns `None` if the size overflows `u64`.
pub fn matrix_payload_len(name_len: usize, rows: usize, cols: usize) -> Option<u64> {
    let data_len = (rows as u64).checked_mul(cols as u64)?.checked_mul(8)?;
    let flags = TAG_LEN + 8;
    let dims = TAG_LEN + 8;
    let name = TAG_LEN + padded(name_len as u64);
    let data = TAG_LEN.checked_add(padded(data_len))?;
    (flags + dims + name).checked_add(data)
}

/// Streaming MAT-file writer over any async sink.
pub struct MatWriter<W> {
    inner: W,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> MatWriter<W> {
    /// Wrap a sink. Nothing is written until [`write_header`](Self::write_header).
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            scratch: BytesMut::with_capacity(DATA_CHUNK_VALUES * 8),
        }
    }

    /// Write the header with the default description.
    pub async fn write_header(&mut self) -> AppResult<()> {
        self.write_header_with(&default_description(Local::now()))
            .await
    }

    /// Write the header with a custom description (truncated to 116 bytes).
    pub async fn write_header_with(&mut self, description: &str) -> AppResult<()> {
        self.inner.write_all(&header_bytes(description)).await?;
        Ok(())
    }

    /// Write one named `rows x cols` double matrix (column-major `values`).
    pub async fn write_matrix(
        &mut self,
        name: &str,
        values: &[f64],
        rows: usize,
        cols: usize,
    ) -> AppResult<()> {
        if rows.checked_mul(cols) != Some(values.len()) {
            return Err(TelemetryError::DimensionMismatch {
                name: name.to_string(),
                len: values.len(),
                rows,
                cols,
            });
        }
        if !name.is_ascii() {
            return Err(TelemetryError::InvalidMatrixName(name.to_string()));
        }

        let too_large = |bytes: u64| TelemetryError::MatrixTooLarge {
            name: name.to_string(),
            bytes,
        };
        let total = matrix_payload_len(name.len(), rows, cols).ok_or_else(|| too_large(u64::MAX))?;
        let total32 = u32::try_from(total).map_err(|_| too_large(total))?;
        let rows32 = i32::try_from(rows).map_err(|_| too_large(total))?;
        let cols32 = i32::try_from(cols).map_err(|_| too_large(total))?;
        let name_len = name.len() as u64;
        let data_len = values.len() as u64 * 8;

        let buf = &mut self.scratch;
        buf.clear();
        put_tag(buf, MI_MATRIX, total32);

        put_tag(buf, MI_UINT32, 8);
        buf.put_u32_le(MX_DOUBLE_CLASS);
        buf.put_u32_le(0);

        put_tag(buf, MI_INT32, 8);
        buf.put_i32_le(rows32);
        buf.put_i32_le(cols32);

        put_tag(buf, MI_INT8, name_len as u32);
        buf.put_slice(name.as_bytes());
        buf.put_bytes(0, (padded(name_len) - name_len) as usize);

        put_tag(buf, MI_DOUBLE, data_len as u32);
        self.inner.write_all(&self.scratch).await?;

        for chunk in values.chunks(DATA_CHUNK_VALUES) {
            self.scratch.clear();
            for value in chunk {
                self.scratch.put_f64_le(*value);
            }
            self.inner.write_all(&self.scratch).await?;
        }

        let data_pad = (padded(data_len) - data_len) as usize;
        if data_pad > 0 {
            self.inner.write_all(&[0u8; 8][..data_pad]).await?;
        }
        Ok(())
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Flush and hand back the underlying sink.
    pub async fn finish(mut self) -> AppResult<W> {
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

fn put_tag(buf: &mut BytesMut, data_type: u32, len: u32) {
    buf.put_u32_le(data_type);
    buf.put_u32_le(len);
}

/// Header fields of a MAT file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatHeader {
    /// Descriptive text, trailing padding stripped
    pub description: String,
    /// Version bytes as stored
    pub version: [u8; 2],
    /// Endian indicator as stored
    pub endian: [u8; 2],
}

/// One decoded matrix element.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixInfo {
    /// Variable name
    pub name: String,
    /// Array class from the flags subelement
    pub class: u32,
    /// Row count
    pub rows: usize,
    /// Column count
    pub cols: usize,
    /// Real part, column-major
    pub values: Vec<f64>,
    /// Payload length declared in the element tag
    pub declared_len: u32,
    /// Byte offset of the element tag in the file
    pub offset: usize,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> AppResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                TelemetryError::MalformedMat(format!(
                    "truncated at offset {} (needed {len} bytes)",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> AppResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn tag(&mut self, expected: u32, what: &str) -> AppResult<u32> {
        let data_type = self.u32()?;
        if data_type != expected {
            return Err(TelemetryError::MalformedMat(format!(
                "{what}: expected type {expected}, found {data_type}"
            )));
        }
        self.u32()
    }

    fn skip_padding(&mut self, len: u32) -> AppResult<()> {
        let pad = padded(u64::from(len)) - u64::from(len);
        self.take(pad as usize).map(|_| ())
    }
}

/// Parse and validate the 128-byte header.
pub fn read_header(bytes: &[u8]) -> AppResult<MatHeader> {
    if bytes.len() < HEADER_LEN {
        return Err(TelemetryError::MalformedMat(format!(
            "file is {} bytes, shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    let endian = [bytes[126], bytes[127]];
    if endian != ENDIAN_INDICATOR {
        return Err(TelemetryError::MalformedMat(format!(
            "unsupported endian indicator {:?}",
            String::from_utf8_lossy(&endian)
        )));
    }
    let description = String::from_utf8_lossy(&bytes[..DESCRIPTION_LEN])
        .trim_end_matches(['\0', ' '])
        .to_string();

    Ok(MatHeader {
        description,
        version: [bytes[124], bytes[125]],
        endian,
    })
}

/// Decode every double matrix element of a file produced by [`MatWriter`].
///
/// Each element's declared length is checked against the bytes its
/// subelements actually occupy.
pub fn read_matrices(bytes: &[u8]) -> AppResult<Vec<MatrixInfo>> {
    read_header(bytes)?;

    let mut cursor = Cursor {
        bytes,
        pos: HEADER_LEN,
    };
    let mut matrices = Vec::new();

    while cursor.pos < bytes.len() {
        let offset = cursor.pos;
        let declared_len = cursor.tag(MI_MATRIX, "element")?;
        let body_start = cursor.pos;

        cursor.tag(MI_UINT32, "array flags")?;
        let class = cursor.u32()?;
        cursor.u32()?;

        let dims_len = cursor.tag(MI_INT32, "dimensions")?;
        if dims_len != 8 {
            return Err(TelemetryError::MalformedMat(format!(
                "only 2-D arrays are supported, found {} dimensions",
                dims_len / 4
            )));
        }
        let rows = cursor.u32()? as usize;
        let cols = cursor.u32()? as usize;

        let name_len = cursor.tag(MI_INT8, "array name")?;
        let name = String::from_utf8_lossy(cursor.take(name_len as usize)?).into_owned();
        cursor.skip_padding(name_len)?;

        let data_len = cursor.tag(MI_DOUBLE, "real part")?;
        let values = cursor
            .take(data_len as usize)?
            .chunks_exact(8)
            .map(|raw| {
                f64::from_le_bytes([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7]])
            })
            .collect::<Vec<_>>();
        cursor.skip_padding(data_len)?;

        let actual_len = cursor.pos - body_start;
        if actual_len as u64 != u64::from(declared_len) {
            return Err(TelemetryError::MalformedMat(format!(
                "element '{name}' declares {declared_len} bytes but occupies {actual_len}"
            )));
        }
        if values.len() != rows * cols {
            return Err(TelemetryError::MalformedMat(format!(
                "element '{name}' has {} values for {rows}x{cols}",
                values.len()
            )));
        }

        matrices.push(MatrixInfo {
            name,
            class,
            rows,
            cols,
            values,
            declared_len,
            offset,
        });
    }

    Ok(matrices)
}
