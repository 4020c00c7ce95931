//! Concurrent stream reader.
//!
//! A reader opens its own handle to a file that a [`StreamWriter`] may still
//! be appending to. The record count is recomputed from the file size on
//! every call and only whole records are ever decoded, so the reader needs
//! no coordination with the writer.
//!
//! [`StreamWriter`]: crate::StreamWriter

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use perfusion_core::{Geometry, PerfusionError, Result, TIMESTAMP_BYTES};
use tracing::debug;

use crate::codec::{Record, RecordCodec};
use crate::header::StreamHeader;

/// Position of a consumer in a growing stream.
///
/// A cursor remembers the last timestamp it delivered and, once it has read
/// from a file, the index of the next record. Successive
/// [`StreamReader::read_since`] calls therefore return each record once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last_timestamp_ms: Option<i32>,
    next_index: Option<u64>,
}

impl Cursor {
    /// Cursor positioned before the first record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor that skips every record stamped at or before `timestamp_ms`.
    pub fn after(timestamp_ms: i32) -> Self {
        Self {
            last_timestamp_ms: Some(timestamp_ms),
            next_index: None,
        }
    }

    /// Timestamp of the last record delivered through this cursor.
    pub fn last_timestamp_ms(&self) -> Option<i32> {
        self.last_timestamp_ms
    }

    pub fn next_index(&self) -> Option<u64> {
        self.next_index
    }
}

/// Read-only view of one stream output file.
#[derive(Debug)]
pub struct StreamReader {
    path: PathBuf,
    file: Mutex<File>,
    header: StreamHeader,
    header_len: u64,
    codec: RecordCodec,
}

impl StreamReader {
    /// Open `path`, adopting the geometry its header declares.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let (header, header_len) = {
            let mut buffered = BufReader::new(&mut file);
            StreamHeader::parse(&mut buffered)?
        };
        let codec = RecordCodec::new(header.geometry.clone());

        debug!(
            path = %path.display(),
            geometry = %header.geometry,
            header_len,
            "Stream file opened for reading"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            header,
            header_len,
            codec,
        })
    }

    /// Open `path` and fail with `ConfigMismatch` unless its geometry is
    /// compatible with `expected`.
    pub fn open_expecting(path: impl AsRef<Path>, expected: &Geometry) -> Result<Self> {
        let reader = Self::open(path)?;
        if !expected.is_compatible_with(reader.geometry()) {
            return Err(PerfusionError::ConfigMismatch {
                path: reader.path.clone(),
                expected: expected.clone(),
                found: reader.geometry().clone(),
            });
        }
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    pub fn geometry(&self) -> &Geometry {
        &self.header.geometry
    }

    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    pub fn record_size_bytes(&self) -> usize {
        self.codec.record_size_bytes()
    }

    /// Number of complete records currently in the file.
    pub fn record_count(&self) -> Result<u64> {
        let len = self.file.lock().metadata()?.len();
        Ok(len.saturating_sub(self.header_len) / self.codec.record_size_bytes() as u64)
    }

    /// Up to `count` records starting at index `start`, clamped to the
    /// records present.
    pub fn read_range(&self, start: u64, count: u64) -> Result<Vec<Record>> {
        let total = self.record_count()?;
        self.read_clamped(start, count, total)
    }

    /// The newest record, or `None` for an empty stream.
    pub fn read_latest(&self) -> Result<Option<Record>> {
        let total = self.record_count()?;
        if total == 0 {
            return Ok(None);
        }
        Ok(self.read_clamped(total - 1, 1, total)?.pop())
    }

    /// The newest `n` records, oldest first.
    pub fn read_last(&self, n: u64) -> Result<Vec<Record>> {
        let total = self.record_count()?;
        self.read_clamped(total.saturating_sub(n), n, total)
    }

    /// Every record stamped strictly after `last_timestamp_ms`.
    pub fn records_after(&self, last_timestamp_ms: i32) -> Result<Vec<Record>> {
        let total = self.record_count()?;
        let start = self.first_index_after(last_timestamp_ms, total)?;
        self.read_clamped(start, total - start, total)
    }

    /// Records the cursor has not seen yet; advances the cursor.
    ///
    /// Returns an empty vector when nothing new has been appended.
    pub fn read_since(&self, cursor: &mut Cursor) -> Result<Vec<Record>> {
        let total = self.record_count()?;
        let start = match (cursor.next_index, cursor.last_timestamp_ms) {
            (Some(index), _) => index,
            (None, Some(ts)) => self.first_index_after(ts, total)?,
            (None, None) => 0,
        };
        if start >= total {
            cursor.next_index = Some(start.min(total));
            return Ok(Vec::new());
        }

        let records = self.read_clamped(start, total - start, total)?;
        cursor.next_index = Some(total);
        if let Some(last) = records.last() {
            cursor.last_timestamp_ms = Some(last.timestamp_ms);
        }
        Ok(records)
    }

    /// Records covering the last `span_ms` of the stream, decimated to at
    /// most `max_points` evenly spaced records.
    ///
    /// A `span_ms` of zero or less means the whole stream. A `max_points` of
    /// zero disables decimation. The newest record is always included.
    pub fn read_window(&self, span_ms: i32, max_points: usize) -> Result<Vec<Record>> {
        let total = self.record_count()?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let start = if span_ms > 0 {
            let newest = self.timestamp_at(total - 1)?;
            let threshold = newest.saturating_sub(span_ms);
            self.first_index_after(threshold.saturating_sub(1), total)?
        } else {
            0
        };

        let records = self.read_clamped(start, total - start, total)?;
        if max_points == 0 || records.len() <= max_points {
            return Ok(records);
        }
        Ok(decimate(records, max_points))
    }

    /// Element `index` of each record in `start..start + count`, with its
    /// timestamp.
    pub fn read_variable(&self, start: u64, count: u64, index: usize) -> Result<Vec<(i32, f64)>> {
        let spt = self.geometry().samples_per_timestamp();
        if index >= spt {
            return Err(PerfusionError::Configuration(format!(
                "variable index {index} out of range for {spt} samples per timestamp"
            )));
        }
        Ok(self
            .read_range(start, count)?
            .into_iter()
            .filter_map(|r| r.value(index).map(|v| (r.timestamp_ms, v)))
            .collect())
    }

    /// Like [`read_variable`](Self::read_variable), addressing the variable
    /// by its header name.
    pub fn read_named(&self, start: u64, count: u64, name: &str) -> Result<Vec<(i32, f64)>> {
        let index = self.geometry().variable_index(name).ok_or_else(|| {
            PerfusionError::Configuration(format!(
                "stream '{}' has no variable '{name}'",
                self.header.stream
            ))
        })?;
        self.read_variable(start, count, index)
    }

    fn read_clamped(&self, start: u64, count: u64, total: u64) -> Result<Vec<Record>> {
        if start >= total || count == 0 {
            return Ok(Vec::new());
        }
        let count = count.min(total - start);
        let bytes = self.read_bytes(start, count)?;
        Ok(self.codec.decode_all(&bytes))
    }

    fn read_bytes(&self, start: u64, count: u64) -> Result<Vec<u8>> {
        let record_size = self.codec.record_size_bytes() as u64;
        let mut buf = vec![0u8; (count * record_size) as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.header_len + start * record_size))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn timestamp_at(&self, index: u64) -> Result<i32> {
        let record_size = self.codec.record_size_bytes() as u64;
        let mut prefix = [0u8; TIMESTAMP_BYTES];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.header_len + index * record_size))?;
        file.read_exact(&mut prefix)?;
        Ok(i32::from_ne_bytes(prefix))
    }

    /// Index of the first record stamped after `timestamp_ms`, searching the
    /// first `total` records. Timestamps are non-decreasing.
    fn first_index_after(&self, timestamp_ms: i32, total: u64) -> Result<u64> {
        let (mut lo, mut hi) = (0u64, total);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.timestamp_at(mid)? <= timestamp_ms {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

/// Keep `max_points` records at evenly spaced indices, first and last
/// included.
fn decimate(records: Vec<Record>, max_points: usize) -> Vec<Record> {
    let n = records.len();
    if max_points == 1 {
        return records.into_iter().last().into_iter().collect();
    }
    let step = (n - 1) as f64 / (max_points - 1) as f64;
    let mut wanted = (0..max_points)
        .map(|i| ((i as f64 * step).round() as usize).min(n - 1))
        .peekable();

    let mut out = Vec::with_capacity(max_points);
    for (i, record) in records.into_iter().enumerate() {
        let mut take = false;
        while wanted.peek() == Some(&i) {
            wanted.next();
            take = true;
        }
        if take {
            out.push(record);
        }
    }
    out
}
