//! Append-only stream writer.
//!
//! One writer owns one output file for the lifetime of an acquisition run.
//! The header is written and flushed inside [`StreamWriter::open`]; every
//! [`StreamWriter::append`] then adds whole records with a single write
//! followed by a flush, so a concurrent [`StreamReader`](crate::StreamReader)
//! never needs to coordinate with it. Readers only trust
//! `(file_size - header_len) / record_size` records, which makes a write that
//! is still in flight invisible to them.
//!
//! If a write fails part way, the file is cut back to its last committed
//! length so later records stay aligned.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use perfusion_core::{Geometry, PerfusionError, Result, SampleBuffer};
use tracing::{info, warn};

use crate::codec::RecordCodec;
use crate::header::StreamHeader;

/// Snapshot of a writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records persisted.
    pub records_written: u64,
    /// Bytes persisted, header included.
    pub bytes_written: u64,
    /// Successful `append` calls.
    pub batches_written: u64,
    /// Appends that failed in the storage layer.
    pub write_errors: u64,
}

/// Live counters of a writer, shareable with other threads.
#[derive(Debug, Default)]
pub struct WriterCounters {
    records_written: AtomicU64,
    bytes_written: AtomicU64,
    batches_written: AtomicU64,
    write_errors: AtomicU64,
}

impl WriterCounters {
    pub fn snapshot(&self) -> WriterStats {
        WriterStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Storage behind an open writer.
trait RecordSink: Write + Seek + Send {
    /// Cut the storage back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl RecordSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

struct OpenFile {
    path: PathBuf,
    file: Box<dyn RecordSink>,
    header: StreamHeader,
    codec: RecordCodec,
    /// File length after the last successful append.
    committed_len: u64,
    last_timestamp_ms: Option<i32>,
    scratch: BytesMut,
}

/// Sole appender of one stream output file.
pub struct StreamWriter {
    name: String,
    open: Option<OpenFile>,
    counters: Arc<WriterCounters>,
}

impl StreamWriter {
    /// A closed writer for the output called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: None,
            counters: Arc::new(WriterCounters::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.open.as_ref().map(|o| o.path.as_path())
    }

    pub fn header(&self) -> Option<&StreamHeader> {
        self.open.as_ref().map(|o| &o.header)
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.open.as_ref().map(|o| &o.header.geometry)
    }

    /// Timestamp of the last persisted record.
    pub fn last_timestamp_ms(&self) -> Option<i32> {
        self.open.as_ref().and_then(|o| o.last_timestamp_ms)
    }

    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }

    /// Counters that stay readable after the writer moves to another thread.
    pub fn counters(&self) -> Arc<WriterCounters> {
        Arc::clone(&self.counters)
    }

    /// Create (or truncate) `path` and write `header`.
    ///
    /// Parent directories are created as needed. When this returns, the
    /// header is on disk and readers may open the file.
    pub fn open(&mut self, path: impl AsRef<Path>, header: StreamHeader) -> Result<()> {
        let path = path.as_ref();
        if let Some(open) = &self.open {
            return Err(PerfusionError::AlreadyOpen(open.path.clone()));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        self.attach(path, Box::new(file), header)
    }

    /// Write `header` to a fresh sink and start appending after it.
    fn attach(
        &mut self,
        path: &Path,
        mut file: Box<dyn RecordSink>,
        header: StreamHeader,
    ) -> Result<()> {
        let text = header.to_text();
        file.write_all(text.as_bytes())?;
        file.flush()?;

        let header_len = text.len() as u64;
        self.counters
            .bytes_written
            .fetch_add(header_len, Ordering::Relaxed);

        info!(
            output = %self.name,
            path = %path.display(),
            geometry = %header.geometry,
            "Stream file opened"
        );

        self.open = Some(OpenFile {
            path: path.to_path_buf(),
            file,
            codec: RecordCodec::new(header.geometry.clone()),
            header,
            committed_len: header_len,
            last_timestamp_ms: None,
            scratch: BytesMut::new(),
        });
        Ok(())
    }

    /// Append `values` as `values.len() / samples_per_timestamp` records.
    ///
    /// The first record is stamped `timestamp_ms`; each following one is
    /// stamped one record period later: `K * sampling_period_ms` for
    /// `Samples(K)`, one sampling period otherwise. Returns the number of
    /// records written. An empty buffer writes nothing.
    pub fn append(&mut self, timestamp_ms: i32, values: &SampleBuffer) -> Result<usize> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| PerfusionError::NotOpen(self.name.clone()))?;

        if values.is_empty() {
            return Ok(0);
        }
        if let Some(last) = open.last_timestamp_ms {
            if timestamp_ms < last {
                return Err(PerfusionError::OutOfOrder {
                    last,
                    found: timestamp_ms,
                });
            }
        }

        let step_ms = open
            .header
            .sampling_period_ms
            .saturating_mul(open.header.geometry.sampling_periods_per_record());
        let step_ms = i32::try_from(step_ms).unwrap_or(i32::MAX);

        open.scratch.clear();
        let records = open
            .codec
            .encode_batch(&mut open.scratch, timestamp_ms, step_ms, values)?;

        if let Err(e) = write_committed(open) {
            self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
            warn!(output = %self.name, error = %e, "Append failed");
            return Err(e.into());
        }

        let last = timestamp_ms.saturating_add(step_ms.saturating_mul(records as i32 - 1));
        open.last_timestamp_ms = Some(last);

        let bytes = open.scratch.len() as u64;
        self.counters
            .records_written
            .fetch_add(records as u64, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(bytes, Ordering::Relaxed);
        self.counters.batches_written.fetch_add(1, Ordering::Relaxed);
        Ok(records)
    }

    /// Flush and release the file. Closing a closed writer does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        open.file.flush()?;
        open.file.sync()?;
        info!(
            output = %self.name,
            path = %open.path.display(),
            records = self.counters.records_written.load(Ordering::Relaxed),
            "Stream file closed"
        );
        Ok(())
    }
}

/// Write the scratch buffer; on failure, cut the file back to its committed
/// length so no partial record survives.
fn write_committed(open: &mut OpenFile) -> io::Result<()> {
    let result = open
        .file
        .write_all(&open.scratch)
        .and_then(|()| open.file.flush());

    match result {
        Ok(()) => {
            open.committed_len += open.scratch.len() as u64;
            Ok(())
        }
        Err(e) => {
            let rollback = open
                .file
                .truncate(open.committed_len)
                .and_then(|()| open.file.seek(SeekFrom::Start(open.committed_len)));
            if let Err(rollback_err) = rollback {
                warn!(
                    path = %open.path.display(),
                    error = %rollback_err,
                    "Could not truncate partial append"
                );
            }
            Err(e)
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(output = %self.name, error = %e, "Failed to close stream file on drop");
        }
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("name", &self.name)
            .field("path", &self.path())
            .field("stats", &self.stats())
            .finish()
    }
}
