//! Element types and typed sample storage.
//!
//! Samples keep the element type the hardware produced them in. Derived
//! computations (RMS, averages, integrals) promote explicitly to `float64`
//! through [`SampleBuffer::to_f64`]; nothing widens implicitly.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{PerfusionError, Result};

/// Element type of a stream's samples.
///
/// The names match the `Data Format:` header line (`int16`, `float32`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "uint16")]
    U16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
}

impl DataType {
    /// Width of one element in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Header name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::I16 => "int16",
            DataType::U16 => "uint16",
            DataType::I32 => "int32",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = PerfusionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "int16" => Ok(DataType::I16),
            "uint16" => Ok(DataType::U16),
            "int32" => Ok(DataType::I32),
            "float32" => Ok(DataType::F32),
            "float64" => Ok(DataType::F64),
            other => Err(PerfusionError::InvalidHeader(format!(
                "unknown data format '{other}'"
            ))),
        }
    }
}

/// Typed, contiguous sample storage.
///
/// One variant per [`DataType`], so a buffer always carries its element type
/// and encodes at the native width of that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleBuffer {
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Applies the same expression to whichever vector a buffer holds.
macro_rules! each_variant {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            SampleBuffer::I16($v) => $body,
            SampleBuffer::U16($v) => $body,
            SampleBuffer::I32($v) => $body,
            SampleBuffer::F32($v) => $body,
            SampleBuffer::F64($v) => $body,
        }
    };
}

impl SampleBuffer {
    /// Empty buffer of the given type with room for `capacity` samples.
    pub fn with_capacity(dtype: DataType, capacity: usize) -> Self {
        match dtype {
            DataType::I16 => SampleBuffer::I16(Vec::with_capacity(capacity)),
            DataType::U16 => SampleBuffer::U16(Vec::with_capacity(capacity)),
            DataType::I32 => SampleBuffer::I32(Vec::with_capacity(capacity)),
            DataType::F32 => SampleBuffer::F32(Vec::with_capacity(capacity)),
            DataType::F64 => SampleBuffer::F64(Vec::with_capacity(capacity)),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            SampleBuffer::I16(_) => DataType::I16,
            SampleBuffer::U16(_) => DataType::U16,
            SampleBuffer::I32(_) => DataType::I32,
            SampleBuffer::F32(_) => DataType::F32,
            SampleBuffer::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all samples, keeping the allocation.
    pub fn clear(&mut self) {
        each_variant!(self, v => v.clear())
    }

    /// Sample `index` promoted to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        each_variant!(self, v => v.get(index).map(|&x| f64::from(x)))
    }

    /// Last sample promoted to `f64`.
    pub fn last_f64(&self) -> Option<f64> {
        self.len().checked_sub(1).and_then(|i| self.get_f64(i))
    }

    /// View as `f64`, borrowing when the buffer already is `float64`.
    pub fn to_f64(&self) -> Cow<'_, [f64]> {
        match self {
            SampleBuffer::F64(v) => Cow::Borrowed(v.as_slice()),
            other => Cow::Owned(
                each_variant!(other, v => v.iter().map(|&x| f64::from(x)).collect()),
            ),
        }
    }

    /// Append the samples of `other`, which must be of the same type.
    pub fn extend_from(&mut self, other: &SampleBuffer) -> Result<()> {
        match (self, other) {
            (SampleBuffer::I16(a), SampleBuffer::I16(b)) => a.extend_from_slice(b),
            (SampleBuffer::U16(a), SampleBuffer::U16(b)) => a.extend_from_slice(b),
            (SampleBuffer::I32(a), SampleBuffer::I32(b)) => a.extend_from_slice(b),
            (SampleBuffer::F32(a), SampleBuffer::F32(b)) => a.extend_from_slice(b),
            (SampleBuffer::F64(a), SampleBuffer::F64(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(PerfusionError::DataTypeMismatch {
                    expected: a.dtype(),
                    found: b.dtype(),
                })
            }
        }
        Ok(())
    }

    /// Encode `start..start + count` in native byte order.
    pub fn put_range(&self, buf: &mut impl BufMut, start: usize, count: usize) {
        let end = start + count;
        match self {
            SampleBuffer::I16(v) => v[start..end].iter().for_each(|&x| buf.put_i16_ne(x)),
            SampleBuffer::U16(v) => v[start..end].iter().for_each(|&x| buf.put_u16_ne(x)),
            SampleBuffer::I32(v) => v[start..end].iter().for_each(|&x| buf.put_i32_ne(x)),
            SampleBuffer::F32(v) => v[start..end].iter().for_each(|&x| buf.put_f32_ne(x)),
            SampleBuffer::F64(v) => v[start..end].iter().for_each(|&x| buf.put_f64_ne(x)),
        }
    }

    /// Decode `count` native-order elements of `dtype` from `buf`.
    ///
    /// The caller guarantees `buf` holds at least `count * dtype.size_bytes()`
    /// bytes.
    pub fn read_from(buf: &mut impl Buf, dtype: DataType, count: usize) -> SampleBuffer {
        match dtype {
            DataType::I16 => SampleBuffer::I16((0..count).map(|_| buf.get_i16_ne()).collect()),
            DataType::U16 => SampleBuffer::U16((0..count).map(|_| buf.get_u16_ne()).collect()),
            DataType::I32 => SampleBuffer::I32((0..count).map(|_| buf.get_i32_ne()).collect()),
            DataType::F32 => SampleBuffer::F32((0..count).map(|_| buf.get_f32_ne()).collect()),
            DataType::F64 => SampleBuffer::F64((0..count).map(|_| buf.get_f64_ne()).collect()),
        }
    }
}

impl From<Vec<f64>> for SampleBuffer {
    fn from(v: Vec<f64>) -> Self {
        SampleBuffer::F64(v)
    }
}

impl From<Vec<f32>> for SampleBuffer {
    fn from(v: Vec<f32>) -> Self {
        SampleBuffer::F32(v)
    }
}

impl From<Vec<i16>> for SampleBuffer {
    fn from(v: Vec<i16>) -> Self {
        SampleBuffer::I16(v)
    }
}

impl From<Vec<u16>> for SampleBuffer {
    fn from(v: Vec<u16>) -> Self {
        SampleBuffer::U16(v)
    }
}

impl From<Vec<i32>> for SampleBuffer {
    fn from(v: Vec<i32>) -> Self {
        SampleBuffer::I32(v)
    }
}
