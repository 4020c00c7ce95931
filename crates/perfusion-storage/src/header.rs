//! Text header written once at the start of every stream file.
//!
//! The header is a run of `Key: value` lines terminated by an empty line.
//! Binary records follow immediately after the terminator:
//!
//! ```text
//! File Format: 3
//! Stream: Arterial Flow
//! Output: RMS
//! Unit: ml/min
//! Data Format: float64
//! Samples Per Timestamp: 1
//! Bytes Per Timestamp: 4
//! Sampling Period (ms): 100
//! Start of Acquisition: 2026-10-19_14:03:11
//! Acquisition Epoch (ms): 1792418591000
//! Algorithm: RMS
//! Window Length: 5
//!
//! <records...>
//! ```
//!
//! Unknown keys are ignored so newer writers stay readable. Multi-variable
//! streams add a `Variables:` line with comma-separated names.

use std::fmt::Write as _;
use std::io::BufRead;

use perfusion_core::limits::MAX_HEADER_BYTES;
use perfusion_core::{DataType, Geometry, PerfusionError, RecordLayout, Result, StreamClock};

/// Version written by this crate.
pub const FILE_FORMAT_VERSION: u32 = 3;

/// Extension of stream data files.
pub const DATA_EXTENSION: &str = "dat";

/// Format of the `Start of Acquisition` stamp.
pub const START_STAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

const KEY_VERSION: &str = "File Format";
const KEY_STREAM: &str = "Stream";
const KEY_OUTPUT: &str = "Output";
const KEY_UNIT: &str = "Unit";
const KEY_DATA_FORMAT: &str = "Data Format";
const KEY_SAMPLES: &str = "Samples Per Timestamp";
const KEY_TS_BYTES: &str = "Bytes Per Timestamp";
const KEY_PERIOD: &str = "Sampling Period (ms)";
const KEY_START: &str = "Start of Acquisition";
const KEY_EPOCH: &str = "Acquisition Epoch (ms)";
const KEY_ALGORITHM: &str = "Algorithm";
const KEY_WINDOW: &str = "Window Length";
const KEY_VARIABLES: &str = "Variables";

/// Parsed or to-be-written header of one stream output file.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    pub version: u32,
    /// Stream (sensor) name.
    pub stream: String,
    /// Strategy output name, e.g. `Raw` or `RMS`.
    pub output: String,
    pub unit: String,
    pub geometry: Geometry,
    pub sampling_period_ms: u64,
    /// Wall-clock start, formatted with [`START_STAMP_FORMAT`].
    pub started_at: String,
    pub epoch_unix_ms: i64,
    pub algorithm: Option<String>,
    pub window_len: Option<usize>,
}

impl StreamHeader {
    pub fn new(
        stream: impl Into<String>,
        output: impl Into<String>,
        unit: impl Into<String>,
        geometry: Geometry,
    ) -> Self {
        Self {
            version: FILE_FORMAT_VERSION,
            stream: stream.into(),
            output: output.into(),
            unit: unit.into(),
            geometry,
            sampling_period_ms: 0,
            started_at: String::new(),
            epoch_unix_ms: 0,
            algorithm: None,
            window_len: None,
        }
    }

    pub fn with_sampling_period_ms(mut self, period_ms: u64) -> Self {
        self.sampling_period_ms = period_ms;
        self
    }

    /// Stamp the header with the stream's epoch.
    pub fn with_clock(mut self, clock: &StreamClock) -> Self {
        self.started_at = clock.started_at().format(START_STAMP_FORMAT).to_string();
        self.epoch_unix_ms = clock.epoch_unix_ms();
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>, window_len: Option<usize>) -> Self {
        self.algorithm = Some(algorithm.into());
        self.window_len = window_len;
        self
    }

    /// Render the header, terminator included.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &dyn std::fmt::Display| {
            let _ = writeln!(out, "{key}: {value}");
        };
        line(KEY_VERSION, &self.version);
        line(KEY_STREAM, &self.stream);
        line(KEY_OUTPUT, &self.output);
        line(KEY_UNIT, &self.unit);
        line(KEY_DATA_FORMAT, &self.geometry.dtype);
        line(KEY_SAMPLES, &self.geometry.samples_per_timestamp());
        line(KEY_TS_BYTES, &perfusion_core::TIMESTAMP_BYTES);
        line(KEY_PERIOD, &self.sampling_period_ms);
        line(KEY_START, &self.started_at);
        line(KEY_EPOCH, &self.epoch_unix_ms);
        if let Some(algorithm) = &self.algorithm {
            line(KEY_ALGORITHM, algorithm);
        }
        if let Some(window_len) = self.window_len {
            line(KEY_WINDOW, &window_len);
        }
        if let Some(names) = self.geometry.variable_names() {
            line(KEY_VARIABLES, &names.join(","));
        }
        out.push('\n');
        out
    }

    /// Parse a header from the start of a stream file.
    ///
    /// Returns the header and its length in bytes, terminator included, which
    /// is where the first record starts.
    pub fn parse(reader: &mut impl BufRead) -> Result<(Self, u64)> {
        let mut consumed = 0usize;
        let mut line = String::new();
        let mut fields: Vec<(String, String)> = Vec::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 || !line.ends_with('\n') {
                return Err(PerfusionError::InvalidHeader(
                    "header is incomplete (no terminating blank line)".into(),
                ));
            }
            consumed += n;
            if consumed > MAX_HEADER_BYTES {
                return Err(PerfusionError::InvalidHeader(format!(
                    "header exceeds {MAX_HEADER_BYTES} bytes"
                )));
            }

            let content = line.trim_end_matches(['\n', '\r']);
            if content.is_empty() {
                break;
            }
            let (key, value) = content.split_once(':').ok_or_else(|| {
                PerfusionError::InvalidHeader(format!("malformed header line '{content}'"))
            })?;
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }

        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| PerfusionError::InvalidHeader(format!("missing '{key}'")))
        };

        let version: u32 = parse_number(KEY_VERSION, require(KEY_VERSION)?)?;
        if version > FILE_FORMAT_VERSION {
            return Err(PerfusionError::InvalidHeader(format!(
                "unsupported file format {version} (newest known is {FILE_FORMAT_VERSION})"
            )));
        }

        if let Some(ts_bytes) = get(KEY_TS_BYTES) {
            let ts_bytes: usize = parse_number(KEY_TS_BYTES, ts_bytes)?;
            if ts_bytes != perfusion_core::TIMESTAMP_BYTES {
                return Err(PerfusionError::InvalidHeader(format!(
                    "unsupported timestamp width {ts_bytes}"
                )));
            }
        }

        let dtype: DataType = require(KEY_DATA_FORMAT)?.parse()?;
        let samples: usize = parse_number(KEY_SAMPLES, require(KEY_SAMPLES)?)?;
        if samples == 0 {
            return Err(PerfusionError::InvalidHeader(
                "samples per timestamp must be at least 1".into(),
            ));
        }

        let layout = match get(KEY_VARIABLES) {
            Some(list) => {
                let names: Vec<String> = list.split(',').map(|n| n.trim().to_string()).collect();
                if names.len() != samples {
                    return Err(PerfusionError::InvalidHeader(format!(
                        "{} variables named but {samples} samples per timestamp",
                        names.len()
                    )));
                }
                RecordLayout::Variables(names)
            }
            None => RecordLayout::for_samples(samples),
        };

        let header = StreamHeader {
            version,
            stream: require(KEY_STREAM)?.to_string(),
            output: get(KEY_OUTPUT).unwrap_or_default().to_string(),
            unit: get(KEY_UNIT).unwrap_or_default().to_string(),
            geometry: Geometry::new(dtype, layout),
            sampling_period_ms: parse_number(KEY_PERIOD, require(KEY_PERIOD)?)?,
            started_at: get(KEY_START).unwrap_or_default().to_string(),
            epoch_unix_ms: get(KEY_EPOCH)
                .map(|v| parse_number(KEY_EPOCH, v))
                .transpose()?
                .unwrap_or(0),
            algorithm: get(KEY_ALGORITHM).map(str::to_string),
            window_len: get(KEY_WINDOW)
                .map(|v| parse_number(KEY_WINDOW, v))
                .transpose()?,
        };

        Ok((header, consumed as u64))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PerfusionError::InvalidHeader(format!("'{key}' has invalid value '{value}'")))
}
