//! Processing strategies.
//!
//! A strategy is a named, stateful transform over batches. The set of
//! strategies is closed: configuration selects one of the [`StrategyKind`]
//! variants and processing dispatches with a `match`.
//!
//! | Kind | Output | Output type |
//! |------|--------|-------------|
//! | `pass_through` | input unchanged | input type |
//! | `rms` | `sqrt(sum of squares of last W / W)` | `float64` |
//! | `moving_average` | `sum of last W / W` | `float64` |
//! | `running_sum` | cumulative `x - offset` after calibration | `float64` |
//!
//! Every output has the same number of values as its input. Samples are
//! processed in order; multi-variable streams keep one window per variable,
//! all other layouts one window for the whole stream.

pub mod window;

pub use window::CircularWindow;

use perfusion_core::{Batch, DataType, Geometry, SampleBuffer};
use serde::{Deserialize, Serialize};
use tracing::info;

/// The closed set of processing algorithms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Identity transform; keeps a trailing window for display.
    PassThrough,
    /// Rolling root-mean-square.
    Rms,
    /// Rolling arithmetic mean.
    MovingAverage,
    /// Volume by flow: integrates the input after estimating a zero offset.
    RunningSum {
        /// Length of the offset calibration at the start of each epoch.
        #[serde(default = "default_calibration_seconds")]
        calibration_seconds: f64,
    },
}

fn default_calibration_seconds() -> f64 {
    1.0
}

impl StrategyKind {
    /// Algorithm name written to file headers.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::PassThrough => "PassThrough",
            StrategyKind::Rms => "RMS",
            StrategyKind::MovingAverage => "MovingAverage",
            StrategyKind::RunningSum { .. } => "VolumeByFlow",
        }
    }

    /// Element type produced for input of type `input`.
    pub fn output_dtype(&self, input: DataType) -> DataType {
        match self {
            StrategyKind::PassThrough => input,
            _ => DataType::F64,
        }
    }
}

/// One `[[sensors.strategies]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Output name; also the file suffix (`{sensor}_{name}.dat`).
    pub name: String,
    #[serde(flatten)]
    pub kind: StrategyKind,
    #[serde(default = "default_window_len")]
    pub window_len: usize,
    /// Output of an earlier strategy to read instead of the raw batch.
    #[serde(default)]
    pub input: Option<String>,
    /// Whether the output gets its own file.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_window_len() -> usize {
    1
}

fn default_persist() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, kind: StrategyKind, window_len: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            window_len,
            input: None,
            persist: true,
        }
    }

    pub fn pass_through(name: impl Into<String>) -> Self {
        Self::new(name, StrategyKind::PassThrough, 1)
    }

    pub fn rms(name: impl Into<String>, window_len: usize) -> Self {
        Self::new(name, StrategyKind::Rms, window_len)
    }

    pub fn moving_average(name: impl Into<String>, window_len: usize) -> Self {
        Self::new(name, StrategyKind::MovingAverage, window_len)
    }

    pub fn running_sum(name: impl Into<String>, window_len: usize, calibration_seconds: f64) -> Self {
        Self::new(
            name,
            StrategyKind::RunningSum {
                calibration_seconds,
            },
            window_len,
        )
    }

    /// Read the output of `input` instead of the raw batch.
    pub fn chained_to(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Keep the output in memory only.
    pub fn in_memory(mut self) -> Self {
        self.persist = false;
        self
    }
}

#[derive(Debug, Clone)]
struct Lane {
    /// Inputs (moving average) or squared inputs (RMS).
    window: CircularWindow,
    /// Trailing outputs, for display.
    recent: CircularWindow,
    seen: u64,
    calibration_sum: f64,
    offset: f64,
    total: f64,
}

impl Lane {
    fn new(window_len: usize) -> Self {
        Self {
            window: CircularWindow::new(window_len),
            recent: CircularWindow::new(window_len),
            seen: 0,
            calibration_sum: 0.0,
            offset: 0.0,
            total: 0.0,
        }
    }

    fn clear(&mut self) {
        self.window.clear();
        self.recent.clear();
        self.seen = 0;
        self.calibration_sum = 0.0;
        self.offset = 0.0;
        self.total = 0.0;
    }
}

/// A configured strategy with its rolling state.
#[derive(Debug, Clone)]
pub struct Strategy {
    name: String,
    kind: StrategyKind,
    window_len: usize,
    lanes: Vec<Lane>,
    calibration_samples: u64,
}

impl Strategy {
    pub fn new(name: impl Into<String>, kind: StrategyKind, window_len: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            window_len,
            lanes: vec![Lane::new(window_len)],
            calibration_samples: 0,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.name.clone(), config.kind.clone(), config.window_len)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Geometry of this strategy's output for input of geometry `input`.
    pub fn output_geometry(&self, input: &Geometry) -> Geometry {
        input.with_dtype(self.kind.output_dtype(input.dtype))
    }

    /// Size the rolling state for `input` and the stream's sampling period.
    pub(crate) fn bind(&mut self, input: &Geometry, sampling_period_ms: u64) {
        let lanes = input.variable_names().map_or(1, <[String]>::len).max(1);
        self.lanes = (0..lanes).map(|_| Lane::new(self.window_len)).collect();
        if let StrategyKind::RunningSum {
            calibration_seconds,
        } = self.kind
        {
            let period = sampling_period_ms.max(1) as f64;
            self.calibration_samples = (calibration_seconds.max(0.0) * 1000.0 / period) as u64;
        }
    }

    /// Transform `batch`. The output has the input's timestamp and
    /// cardinality; an empty batch yields an empty batch.
    pub fn process(&mut self, batch: &Batch) -> Batch {
        let lanes = self.lanes.len();

        if let StrategyKind::PassThrough = self.kind {
            for (i, x) in batch.values.to_f64().iter().enumerate() {
                self.lanes[i % lanes].recent.push(*x);
            }
            return batch.clone();
        }

        let input = batch.values.to_f64();
        let mut out = Vec::with_capacity(input.len());
        for (i, &x) in input.iter().enumerate() {
            let y = self.step(i % lanes, x);
            self.lanes[i % lanes].recent.push(y);
            out.push(y);
        }
        Batch {
            timestamp_ms: batch.timestamp_ms,
            values: SampleBuffer::F64(out),
        }
    }

    fn step(&mut self, lane: usize, x: f64) -> f64 {
        let width = self.window_len.max(1) as f64;
        let calibration_samples = self.calibration_samples;
        let lane_index = lane;
        let lane = &mut self.lanes[lane];

        match self.kind {
            StrategyKind::PassThrough => x,
            StrategyKind::Rms => {
                lane.window.push(x * x);
                (lane.window.sum().max(0.0) / width).sqrt()
            }
            StrategyKind::MovingAverage => {
                lane.window.push(x);
                lane.window.sum() / width
            }
            StrategyKind::RunningSum { .. } => {
                if lane.seen < calibration_samples {
                    lane.seen += 1;
                    lane.calibration_sum += x;
                    if lane.seen == calibration_samples {
                        lane.offset = lane.calibration_sum / calibration_samples as f64;
                        info!(
                            strategy = %self.name,
                            lane = lane_index,
                            offset = lane.offset,
                            "Calibration complete"
                        );
                    }
                    x
                } else {
                    lane.total += x - lane.offset;
                    lane.total
                }
            }
        }
    }

    /// Trailing outputs of the first lane, oldest first.
    pub fn window_snapshot(&self) -> Vec<f64> {
        self.lane_snapshot(0).unwrap_or_default()
    }

    /// Trailing outputs of one lane (one variable of a multi-variable stream).
    pub fn lane_snapshot(&self, lane: usize) -> Option<Vec<f64>> {
        self.lanes.get(lane).map(|l| l.recent.snapshot())
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Whether a running sum is still estimating its offset.
    pub fn is_calibrating(&self) -> bool {
        matches!(self.kind, StrategyKind::RunningSum { .. })
            && self.lanes.iter().any(|l| l.seen < self.calibration_samples)
    }

    /// Zero offset estimated by a running sum, once calibrated.
    pub fn calibration_offset(&self, lane: usize) -> Option<f64> {
        match self.kind {
            StrategyKind::RunningSum { .. } => self
                .lanes
                .get(lane)
                .filter(|l| l.seen >= self.calibration_samples)
                .map(|l| l.offset),
            _ => None,
        }
    }

    /// Clear rolling state for a new epoch. Buffers keep their allocation.
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.clear();
        }
    }
}
