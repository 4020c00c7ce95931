//! Record geometry.
//!
//! A geometry fixes the byte length of every record in a file:
//!
//! ```text
//! record = int32 timestamp_ms | samples_per_timestamp x element
//! ```
//!
//! Three layouts exist. [`RecordLayout::Point`] stores one element per
//! timestamp, [`RecordLayout::Samples`] stores K raw samples acquired under
//! one timestamp, and [`RecordLayout::Variables`] stores one instrument packet
//! of named fields (e.g. the 18 blood-gas values), each addressable by index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::DataType;

/// Width of the timestamp that prefixes every record.
pub const TIMESTAMP_BYTES: usize = std::mem::size_of::<i32>();

/// How the elements of one record are organised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordLayout {
    /// One element per timestamp.
    Point,
    /// K elements per timestamp, K fixed when the stream opens.
    Samples(usize),
    /// One element per named variable.
    Variables(Vec<String>),
}

impl RecordLayout {
    /// Layout for `samples_per_timestamp` unnamed samples.
    pub fn for_samples(samples_per_timestamp: usize) -> Self {
        if samples_per_timestamp == 1 {
            RecordLayout::Point
        } else {
            RecordLayout::Samples(samples_per_timestamp)
        }
    }

    pub fn samples_per_timestamp(&self) -> usize {
        match self {
            RecordLayout::Point => 1,
            RecordLayout::Samples(k) => *k,
            RecordLayout::Variables(names) => names.len(),
        }
    }
}

/// Element type plus layout: everything needed to size and decode a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub dtype: DataType,
    pub layout: RecordLayout,
}

impl Geometry {
    pub fn new(dtype: DataType, layout: RecordLayout) -> Self {
        Self { dtype, layout }
    }

    /// Single element per timestamp.
    pub fn point(dtype: DataType) -> Self {
        Self::new(dtype, RecordLayout::Point)
    }

    pub fn samples_per_timestamp(&self) -> usize {
        self.layout.samples_per_timestamp()
    }

    /// Sampling periods covered by one record.
    ///
    /// K for `Samples(K)`, whose elements are K consecutive samples. A
    /// `Variables` record is one instrument packet, so it spans a single
    /// period like a `Point`.
    pub fn sampling_periods_per_record(&self) -> u64 {
        match self.layout {
            RecordLayout::Samples(k) => k as u64,
            RecordLayout::Point | RecordLayout::Variables(_) => 1,
        }
    }

    /// Bytes of sample payload per record (timestamp excluded).
    pub fn payload_bytes(&self) -> usize {
        self.samples_per_timestamp() * self.dtype.size_bytes()
    }

    /// Bytes per record, timestamp included.
    pub fn record_size_bytes(&self) -> usize {
        TIMESTAMP_BYTES + self.payload_bytes()
    }

    /// Same layout, different element type. Used by strategies that promote.
    pub fn with_dtype(&self, dtype: DataType) -> Self {
        Self::new(dtype, self.layout.clone())
    }

    /// Whether records of `other` can be decoded as records of `self`.
    ///
    /// Element type and samples per timestamp must agree. Variable names are
    /// only compared when both sides name their variables.
    pub fn is_compatible_with(&self, other: &Geometry) -> bool {
        if self.dtype != other.dtype
            || self.samples_per_timestamp() != other.samples_per_timestamp()
        {
            return false;
        }
        match (self.variable_names(), other.variable_names()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Names of the variables, when the layout has them.
    pub fn variable_names(&self) -> Option<&[String]> {
        match &self.layout {
            RecordLayout::Variables(names) => Some(names),
            _ => None,
        }
    }

    /// Index of a named variable.
    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variable_names()
            .and_then(|names| names.iter().position(|n| n == name))
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.dtype, self.samples_per_timestamp())?;
        if let RecordLayout::Variables(names) = &self.layout {
            write!(f, " [{}]", names.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periods_per_record() {
        let names: Vec<String> = (0..18).map(|i| format!("v{i}")).collect();
        assert_eq!(Geometry::point(DataType::F32).sampling_periods_per_record(), 1);
        assert_eq!(
            Geometry::new(DataType::I16, RecordLayout::Samples(4)).sampling_periods_per_record(),
            4
        );
        assert_eq!(
            Geometry::new(DataType::F64, RecordLayout::Variables(names)).sampling_periods_per_record(),
            1
        );
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(Geometry::point(DataType::F32).record_size_bytes(), 8);
        assert_eq!(
            Geometry::new(DataType::I16, RecordLayout::Samples(10)).record_size_bytes(),
            24
        );

        let names = (0..18).map(|i| format!("v{i}")).collect();
        let gas = Geometry::new(DataType::F64, RecordLayout::Variables(names));
        assert_eq!(gas.record_size_bytes(), 4 + 18 * 8);
        assert_eq!(gas.variable_index("v17"), Some(17));
        assert_eq!(gas.variable_index("missing"), None);
    }

    #[test]
    fn test_for_samples_collapses_single_to_point() {
        assert_eq!(RecordLayout::for_samples(1), RecordLayout::Point);
        assert_eq!(RecordLayout::for_samples(4), RecordLayout::Samples(4));
    }

    #[test]
    fn test_compatibility() {
        let point = Geometry::point(DataType::F32);
        assert!(point.is_compatible_with(&Geometry::new(DataType::F32, RecordLayout::Samples(1))));
        assert!(!point.is_compatible_with(&Geometry::new(DataType::F32, RecordLayout::Samples(2))));
        assert!(!point.is_compatible_with(&Geometry::point(DataType::F64)));

        let named = Geometry::new(DataType::F64, RecordLayout::Variables(vec!["a".into(), "b".into()]));
        let renamed = Geometry::new(DataType::F64, RecordLayout::Variables(vec!["a".into(), "c".into()]));
        assert!(named.is_compatible_with(&Geometry::new(DataType::F64, RecordLayout::Samples(2))));
        assert!(!named.is_compatible_with(&renamed));
    }

    #[test]
    fn test_with_dtype_keeps_layout() {
        let raw = Geometry::new(DataType::U16, RecordLayout::Samples(5));
        let promoted = raw.with_dtype(DataType::F64);
        assert_eq!(promoted.samples_per_timestamp(), 5);
        assert_eq!(promoted.record_size_bytes(), 4 + 40);
    }
}
