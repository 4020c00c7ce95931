//! Fixed-size binary records.
//!
//! A record is `int32 timestamp_ms` followed by `samples_per_timestamp`
//! elements, all in the host's native byte order with no padding. Files are
//! not portable across endianness.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use perfusion_core::{Geometry, PerfusionError, Result, SampleBuffer, TIMESTAMP_BYTES};

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp_ms: i32,
    pub values: SampleBuffer,
}

impl Record {
    /// Element `index` of the record promoted to `f64`.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get_f64(index)
    }
}

/// Encodes and decodes records of one geometry.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    geometry: Geometry,
    record_size: usize,
}

impl RecordCodec {
    pub fn new(geometry: Geometry) -> Self {
        let record_size = geometry.record_size_bytes();
        Self {
            geometry,
            record_size,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn record_size_bytes(&self) -> usize {
        self.record_size
    }

    /// Encode exactly one record.
    pub fn encode(&self, timestamp_ms: i32, values: &SampleBuffer) -> Result<Bytes> {
        self.check_type(values)?;
        let spt = self.geometry.samples_per_timestamp();
        if values.len() != spt {
            return Err(PerfusionError::RecordLength {
                expected: spt,
                found: values.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(self.record_size);
        buf.put_i32_ne(timestamp_ms);
        values.put_range(&mut buf, 0, spt);
        Ok(buf.freeze())
    }

    /// Encode `values` as consecutive records into `buf`.
    ///
    /// Record `j` is stamped `first_timestamp_ms + j * step_ms`. Returns the
    /// number of records encoded.
    pub fn encode_batch(
        &self,
        buf: &mut BytesMut,
        first_timestamp_ms: i32,
        step_ms: i32,
        values: &SampleBuffer,
    ) -> Result<usize> {
        self.check_type(values)?;
        let spt = self.geometry.samples_per_timestamp();
        if values.len() % spt != 0 {
            return Err(PerfusionError::RecordLength {
                expected: spt,
                found: values.len(),
            });
        }

        let records = values.len() / spt;
        buf.reserve(records * self.record_size);
        let mut timestamp = first_timestamp_ms;
        for j in 0..records {
            buf.put_i32_ne(timestamp);
            values.put_range(buf, j * spt, spt);
            timestamp = timestamp.saturating_add(step_ms);
        }
        Ok(records)
    }

    /// Decode one record from exactly `record_size_bytes()` bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record> {
        if bytes.len() != self.record_size {
            return Err(PerfusionError::RecordLength {
                expected: self.record_size,
                found: bytes.len(),
            });
        }
        let mut buf = bytes;
        let timestamp_ms = buf.get_i32_ne();
        let values = SampleBuffer::read_from(
            &mut buf,
            self.geometry.dtype,
            self.geometry.samples_per_timestamp(),
        );
        Ok(Record {
            timestamp_ms,
            values,
        })
    }

    /// Decode every whole record in `bytes`; a trailing partial record is
    /// ignored.
    pub fn decode_all(&self, bytes: &[u8]) -> Vec<Record> {
        bytes
            .chunks_exact(self.record_size)
            .filter_map(|chunk| self.decode(chunk).ok())
            .collect()
    }

    /// Timestamp prefix of an encoded record.
    pub fn timestamp_of(bytes: &[u8]) -> Option<i32> {
        let mut prefix = bytes.get(..TIMESTAMP_BYTES)?;
        Some(prefix.get_i32_ne())
    }

    fn check_type(&self, values: &SampleBuffer) -> Result<()> {
        if values.dtype() != self.geometry.dtype {
            return Err(PerfusionError::DataTypeMismatch {
                expected: self.geometry.dtype,
                found: values.dtype(),
            });
        }
        Ok(())
    }
}
