//! Sources that derive a stream from other streams' persisted outputs.
//!
//! A calculated sensor never talks to the producer. It opens its own reader
//! on the producer's output file and consumes records as they appear, so it
//! can run on its own thread at its own cadence like any hardware source.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use perfusion_core::{Batch, DataType, Geometry, HardwareSource, SampleBuffer, StreamClock};
use perfusion_storage::{Record, StreamReader};
use tracing::{debug, warn};

/// Records scanned per read while looking for the matching divisor.
const DIVISOR_SCAN_CHUNK: u64 = 64;

/// A reader opened on first use, since the producer may not have created
/// its file yet.
#[derive(Debug)]
struct LazyReader {
    path: PathBuf,
    geometry: Geometry,
    reader: Option<StreamReader>,
}

impl LazyReader {
    fn new(path: PathBuf, geometry: Geometry) -> Self {
        Self {
            path,
            geometry,
            reader: None,
        }
    }

    fn get(&mut self, owner: &str) -> Option<&StreamReader> {
        if self.reader.is_none() {
            match StreamReader::open_expecting(&self.path, &self.geometry) {
                Ok(reader) => self.reader = Some(reader),
                Err(e) => {
                    debug!(source = owner, path = %self.path.display(), error = %e, "Input not readable yet");
                    return None;
                }
            }
        }
        self.reader.as_ref()
    }

    fn reset(&mut self) {
        self.reader = None;
    }
}

/// Replays another stream's output as a hardware source.
///
/// Each batch carries up to `samples_per_calc` unread records, concatenated
/// and stamped with the first record's timestamp.
#[derive(Debug)]
pub struct ReaderSource {
    name: String,
    input: LazyReader,
    sampling_period_ms: u64,
    samples_per_calc: usize,
    next_index: u64,
    started: bool,
}

impl ReaderSource {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        geometry: Geometry,
        sampling_period_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            input: LazyReader::new(path.into(), geometry),
            sampling_period_ms,
            samples_per_calc: 1,
            next_index: 0,
            started: false,
        }
    }

    /// Records gathered into one batch.
    pub fn with_samples_per_calc(mut self, samples_per_calc: usize) -> Self {
        self.samples_per_calc = samples_per_calc.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.input.path
    }

    /// Index of the next record to consume.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

impl HardwareSource for ReaderSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        self.input.geometry.clone()
    }

    fn sampling_period_ms(&self) -> u64 {
        self.sampling_period_ms
    }

    fn cycle_period_ms(&self) -> u64 {
        self.sampling_period_ms * self.samples_per_calc as u64
    }

    fn start(&mut self, _clock: &StreamClock) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn get_data(&mut self) -> Option<Batch> {
        if !self.started {
            return None;
        }
        let reader = self.input.get(&self.name)?;
        let records = match reader.read_range(self.next_index, self.samples_per_calc as u64) {
            Ok(records) => records,
            Err(e) => {
                warn!(source = %self.name, error = %e, "Failed to read input");
                return None;
            }
        };
        let first = records.first()?;
        let timestamp_ms = first.timestamp_ms;

        let mut values = SampleBuffer::with_capacity(
            self.input.geometry.dtype,
            records.len() * self.input.geometry.samples_per_timestamp(),
        );
        for record in &records {
            if let Err(e) = values.extend_from(&record.values) {
                warn!(source = %self.name, error = %e, "Input record has the wrong type");
                return None;
            }
        }
        self.next_index += records.len() as u64;
        Some(Batch {
            timestamp_ms,
            values,
        })
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn rewind(&mut self) {
        self.input.reset();
        self.next_index = 0;
    }
}

/// Element-wise quotient of two streams, e.g. flow over pressure.
///
/// The two inputs come from streams with their own epochs, so records are
/// aligned on absolute time: header epoch plus record timestamp. Every
/// dividend record is paired with the newest divisor record at or before it;
/// dividend records older than the first divisor record use that first
/// record. While the divisor has no records at all the dividend is left
/// unread. A single-value divisor is applied to every dividend value.
/// Division follows IEEE semantics, so a zero divisor yields an infinity or
/// NaN.
#[derive(Debug)]
pub struct DivisionSource {
    name: String,
    dividend: LazyReader,
    divisor: LazyReader,
    sampling_period_ms: u64,
    next_dividend: u64,
    next_divisor: u64,
    current_divisor: Option<Record>,
    started: bool,
}

impl DivisionSource {
    /// Fails when the divisor carries neither one value nor as many values
    /// per timestamp as the dividend.
    pub fn new(
        name: impl Into<String>,
        dividend: (PathBuf, Geometry),
        divisor: (PathBuf, Geometry),
        sampling_period_ms: u64,
    ) -> Result<Self> {
        let name = name.into();
        let (n, d) = (
            dividend.1.samples_per_timestamp(),
            divisor.1.samples_per_timestamp(),
        );
        if d != 1 && d != n {
            bail!(
                "division '{name}': divisor has {d} values per timestamp, dividend has {n}"
            );
        }
        Ok(Self {
            name,
            dividend: LazyReader::new(dividend.0, dividend.1),
            divisor: LazyReader::new(divisor.0, divisor.1),
            sampling_period_ms,
            next_dividend: 0,
            next_divisor: 0,
            current_divisor: None,
            started: false,
        })
    }

    /// Advance to the newest divisor record at or before `target`, in Unix
    /// milliseconds. Falls back to the first divisor record when all of them
    /// are later.
    fn catch_up_divisor(&mut self, target: i64) -> Option<&Record> {
        let reader = self.divisor.get(&self.name)?;
        let epoch = reader.header().epoch_unix_ms;
        loop {
            let chunk = match reader.read_range(self.next_divisor, DIVISOR_SCAN_CHUNK) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(source = %self.name, error = %e, "Failed to read divisor");
                    break;
                }
            };
            let full = chunk.len() as u64 == DIVISOR_SCAN_CHUNK;
            let mut advanced_past = false;
            for record in chunk {
                if epoch + i64::from(record.timestamp_ms) > target {
                    if self.current_divisor.is_none() {
                        self.next_divisor += 1;
                        self.current_divisor = Some(record);
                    }
                    advanced_past = true;
                    break;
                }
                self.next_divisor += 1;
                self.current_divisor = Some(record);
            }
            if advanced_past || !full {
                break;
            }
        }
        self.current_divisor.as_ref()
    }
}

impl HardwareSource for DivisionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        self.dividend.geometry.with_dtype(DataType::F64)
    }

    fn sampling_period_ms(&self) -> u64 {
        self.sampling_period_ms
    }

    fn start(&mut self, _clock: &StreamClock) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn get_data(&mut self) -> Option<Batch> {
        if !self.started {
            return None;
        }
        let reader = self.dividend.get(&self.name)?;
        let epoch = reader.header().epoch_unix_ms;
        let numerator = match reader.read_range(self.next_dividend, 1) {
            Ok(mut records) => records.pop()?,
            Err(e) => {
                warn!(source = %self.name, error = %e, "Failed to read dividend");
                return None;
            }
        };

        let timestamp_ms = numerator.timestamp_ms;
        let denominator = self
            .catch_up_divisor(epoch + i64::from(timestamp_ms))?
            .values
            .to_f64()
            .into_owned();
        self.next_dividend += 1;

        let quotient: Vec<f64> = numerator
            .values
            .to_f64()
            .iter()
            .enumerate()
            .map(|(i, n)| n / denominator[if denominator.len() == 1 { 0 } else { i }])
            .collect();
        Some(Batch::new(timestamp_ms, quotient))
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn rewind(&mut self) {
        self.dividend.reset();
        self.divisor.reset();
        self.next_dividend = 0;
        self.next_divisor = 0;
        self.current_divisor = None;
    }
}
