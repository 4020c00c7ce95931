//! Persistence for perfusion streams.
//!
//! Each stream output lives in its own file: a text header followed by
//! fixed-size binary records. A single [`StreamWriter`] appends to a file
//! while any number of [`StreamReader`]s read it concurrently.
//!
//! ```no_run
//! use perfusion_core::{DataType, Geometry, SampleBuffer};
//! use perfusion_storage::{Cursor, StreamHeader, StreamReader, StreamWriter};
//!
//! # fn main() -> perfusion_core::Result<()> {
//! let header = StreamHeader::new("Flow", "Raw", "ml/min", Geometry::point(DataType::F32))
//!     .with_sampling_period_ms(100);
//! let mut writer = StreamWriter::new("Raw");
//! writer.open("data/Flow_Raw.dat", header)?;
//! writer.append(0, &SampleBuffer::F32(vec![1.5]))?;
//!
//! let reader = StreamReader::open("data/Flow_Raw.dat")?;
//! let mut cursor = Cursor::new();
//! let fresh = reader.read_since(&mut cursor)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod header;
pub mod reader;
pub mod writer;

pub use codec::{Record, RecordCodec};
pub use header::{StreamHeader, DATA_EXTENSION, FILE_FORMAT_VERSION};
pub use reader::{Cursor, StreamReader};
pub use writer::{StreamWriter, WriterCounters, WriterStats};

use std::path::{Path, PathBuf};

/// File for output `output` of stream `stream` under `dir`.
pub fn output_path(dir: &Path, stream: &str, output: &str) -> PathBuf {
    dir.join(format!("{stream}_{output}.{DATA_EXTENSION}"))
}
