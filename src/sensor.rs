//! Stream controller: one sensor, its strategy chain and its acquisition thread.
//!
//! ```text
//!   Created ──open──▶ Opened ──start──▶ Running ──stop──▶ Stopped
//!      ▲                 │                 ▲                 │
//!      │                 └──────close──────┼─────────────────┤
//!      └───────open───── Closed ◀──────────┴─────start───────┘
//! ```
//!
//! While running, the chain and the hardware source are owned by the
//! acquisition thread, which is the only mutator of strategy state and the
//! only appender to the output files. `stop` halts the thread and takes them
//! back, so no lock is held on the steady-state path. Readers use their own
//! file handles through [`SensorStream::reader`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use perfusion_core::limits::{DEFAULT_CYCLE_PERIOD, MAX_BATCHES_PER_CYCLE, MIN_CYCLE_PERIOD};
use perfusion_core::{
    Geometry, HaltToken, HardwareSource, PerfusionError, Result, StreamClock,
};
use perfusion_storage::{output_path, StreamHeader, StreamReader, WriterCounters, WriterStats};
use tracing::{debug, error, info, warn};

use crate::chain::StrategyChain;
use crate::strategy::{StrategyConfig, StrategyKind};

/// Immutable description of a stream, known before `open`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    pub name: String,
    pub unit: String,
    pub sampling_period_ms: u64,
    pub geometry: Geometry,
}

impl StreamMetadata {
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        sampling_period_ms: u64,
        geometry: Geometry,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            sampling_period_ms,
            geometry,
        }
    }

    /// Metadata matching what `source` produces.
    pub fn for_source(source: &dyn HardwareSource, unit: impl Into<String>) -> Self {
        Self::new(
            source.name(),
            unit,
            source.sampling_period_ms(),
            source.geometry(),
        )
    }
}

/// Lifecycle state of a [`SensorStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Opened,
    Running,
    Stopped,
    Closed,
}

impl StreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Created => "created",
            StreamState::Opened => "opened",
            StreamState::Running => "running",
            StreamState::Stopped => "stopped",
            StreamState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted output of an opened stream.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub name: String,
    pub path: PathBuf,
    pub geometry: Geometry,
    pub counters: Arc<WriterCounters>,
}

/// State that moves into the acquisition thread and back.
struct Parts {
    chain: StrategyChain,
    source: Box<dyn HardwareSource>,
}

/// Controller for one sensor stream.
pub struct SensorStream {
    meta: StreamMetadata,
    output_dir: PathBuf,
    stop_sentinel: Option<f64>,
    state: StreamState,
    /// `None` while the acquisition thread owns them, or after it panicked.
    parts: Option<Parts>,
    worker: Option<JoinHandle<Parts>>,
    halt: HaltToken,
    clock: Option<StreamClock>,
    outputs: Vec<OutputInfo>,
}

impl SensorStream {
    /// New stream in the `Created` state.
    ///
    /// Fails with `Configuration` when `source` produces batches that do not
    /// fit `meta.geometry`.
    pub fn new(
        meta: StreamMetadata,
        source: Box<dyn HardwareSource>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let produced = source.geometry();
        if !meta.geometry.is_compatible_with(&produced) {
            return Err(PerfusionError::Configuration(format!(
                "stream '{}' expects {} but hardware '{}' produces {}",
                meta.name,
                meta.geometry,
                source.name(),
                produced
            )));
        }

        let chain = StrategyChain::new(meta.geometry.clone(), meta.sampling_period_ms);
        Ok(Self {
            meta,
            output_dir: output_dir.into(),
            stop_sentinel: None,
            state: StreamState::Created,
            parts: Some(Parts { chain, source }),
            worker: None,
            halt: HaltToken::new(),
            clock: None,
            outputs: Vec::new(),
        })
    }

    /// Halt acquisition after routing a batch whose last value is `sentinel`.
    pub fn with_stop_sentinel(mut self, sentinel: Option<f64>) -> Self {
        self.stop_sentinel = sentinel;
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.meta
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Current state. A stream whose acquisition thread ended on its own
    /// (end-of-run sentinel) reports `Stopped`.
    pub fn state(&self) -> StreamState {
        match (self.state, &self.worker) {
            (StreamState::Running, Some(worker)) if worker.is_finished() => StreamState::Stopped,
            (state, _) => state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == StreamState::Running
    }

    /// Epoch of the current acquisition, set by `open`.
    pub fn clock(&self) -> Option<&StreamClock> {
        self.clock.as_ref()
    }

    /// Attach a strategy. Only allowed before `open` or after `close`.
    pub fn add_strategy(&mut self, config: &StrategyConfig) -> Result<()> {
        let state = self.state();
        if !matches!(state, StreamState::Created | StreamState::Closed) {
            return Err(PerfusionError::InvalidState {
                state: state.as_str(),
                operation: "add a strategy to",
            });
        }
        self.parts_mut("add a strategy to")?.chain.add_config(config)
    }

    /// The strategy chain, while the acquisition thread does not hold it.
    pub fn chain(&self) -> Option<&StrategyChain> {
        self.parts.as_ref().map(|p| &p.chain)
    }

    /// Start a new epoch and open one file per persisted output.
    ///
    /// Files are truncated. If any writer fails to open, those opened so far
    /// are closed again and the stream stays in its previous state.
    pub fn open(&mut self) -> Result<()> {
        match self.state() {
            StreamState::Created | StreamState::Closed => {}
            StreamState::Opened => return Ok(()),
            state => {
                return Err(PerfusionError::InvalidState {
                    state: state.as_str(),
                    operation: "open",
                })
            }
        }

        let clock = StreamClock::start();
        let meta = self.meta.clone();
        let dir = self.output_dir.clone();
        let parts = self.parts_mut("open")?;
        parts.chain.reset();
        parts.source.rewind();

        let outputs = match open_writers(&mut parts.chain, &meta, &dir, &clock) {
            Ok(outputs) => outputs,
            Err(e) => {
                if let Err(close_err) = parts.chain.close() {
                    warn!(stream = %meta.name, error = %close_err, "Failed to roll back writers");
                }
                return Err(e);
            }
        };

        info!(
            stream = %self.meta.name,
            outputs = outputs.len(),
            dir = %self.output_dir.display(),
            "Stream opened"
        );
        self.outputs = outputs;
        self.clock = Some(clock);
        self.state = StreamState::Opened;
        Ok(())
    }

    /// Start (or resume) the acquisition thread.
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            StreamState::Opened => {}
            StreamState::Stopped => self.reap(),
            StreamState::Running => return Ok(()),
            state => {
                return Err(PerfusionError::InvalidState {
                    state: state.as_str(),
                    operation: "start",
                })
            }
        }

        let clock = self.clock.ok_or(PerfusionError::InvalidState {
            state: self.state.as_str(),
            operation: "start",
        })?;
        let mut parts = self.parts.take().ok_or(PerfusionError::InvalidState {
            state: "faulted",
            operation: "start",
        })?;

        if let Err(e) = parts.source.start(&clock) {
            self.parts = Some(parts);
            return Err(PerfusionError::Hardware(format!("{e:#}")));
        }

        self.halt.reset();
        let context = LoopContext {
            stream: self.meta.name.clone(),
            stop_sentinel: self.stop_sentinel,
            halt: self.halt.clone(),
        };
        let worker = thread::Builder::new()
            .name(format!("acq-{}", self.meta.name))
            .spawn(move || acquire(parts, &context))?;

        info!(stream = %self.meta.name, "Stream started");
        self.worker = Some(worker);
        self.state = StreamState::Running;
        Ok(())
    }

    /// Halt the acquisition thread and wait for it to exit.
    ///
    /// A batch already pulled from hardware is routed and persisted before
    /// the thread exits. A no-op unless running.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != StreamState::Running {
            return Ok(());
        }
        self.halt.halt();
        self.reap();
        info!(stream = %self.meta.name, "Stream stopped");
        Ok(())
    }

    /// Stop, close every writer and reset the strategies.
    pub fn close(&mut self) -> Result<()> {
        if matches!(self.state, StreamState::Created | StreamState::Closed) {
            return Ok(());
        }
        self.stop()?;

        let result = match self.parts.as_mut() {
            Some(parts) => {
                let closed = parts.chain.close();
                parts.chain.reset();
                closed
            }
            None => Ok(()),
        };
        self.state = StreamState::Closed;
        info!(stream = %self.meta.name, "Stream closed");
        result
    }

    /// Persisted outputs of the current epoch.
    pub fn outputs(&self) -> &[OutputInfo] {
        &self.outputs
    }

    /// Path of a persisted output. Known once the stream has been opened.
    pub fn output_path(&self, output: &str) -> Option<&Path> {
        self.output(output).map(|o| o.path.as_path())
    }

    /// Open an independent reader on one of this stream's outputs.
    pub fn reader(&self, output: &str) -> Result<StreamReader> {
        let info = self.output(output).ok_or_else(|| {
            PerfusionError::Configuration(format!(
                "stream '{}' has no persisted output '{output}'",
                self.meta.name
            ))
        })?;
        StreamReader::open_expecting(&info.path, &info.geometry)
    }

    pub fn writer_stats(&self, output: &str) -> Option<WriterStats> {
        self.output(output).map(|o| o.counters.snapshot())
    }

    fn output(&self, name: &str) -> Option<&OutputInfo> {
        self.outputs.iter().find(|o| o.name == name)
    }

    fn parts_mut(&mut self, operation: &'static str) -> Result<&mut Parts> {
        self.parts.as_mut().ok_or(PerfusionError::InvalidState {
            state: "faulted",
            operation,
        })
    }

    /// Join the acquisition thread and take back the chain and source.
    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(parts) => self.parts = Some(parts),
                Err(_) => error!(stream = %self.meta.name, "Acquisition thread panicked"),
            }
        }
        self.state = StreamState::Stopped;
    }
}

impl Drop for SensorStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(stream = %self.meta.name, error = %e, "Failed to close stream on drop");
        }
    }
}

impl std::fmt::Debug for SensorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorStream")
            .field("meta", &self.meta)
            .field("state", &self.state())
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

fn open_writers(
    chain: &mut StrategyChain,
    meta: &StreamMetadata,
    dir: &Path,
    clock: &StreamClock,
) -> Result<Vec<OutputInfo>> {
    let mut outputs = Vec::new();
    for (strategy, geometry, writer) in chain.persisted_outputs_mut() {
        let path = output_path(dir, &meta.name, strategy.name());
        let mut header = StreamHeader::new(&meta.name, strategy.name(), &meta.unit, geometry.clone())
            .with_sampling_period_ms(meta.sampling_period_ms)
            .with_clock(clock);
        if *strategy.kind() != StrategyKind::PassThrough {
            header = header.with_algorithm(strategy.kind().label(), Some(strategy.window_len()));
        }
        writer.open(&path, header)?;
        outputs.push(OutputInfo {
            name: strategy.name().to_string(),
            path,
            geometry: geometry.clone(),
            counters: writer.counters(),
        });
    }
    Ok(outputs)
}

struct LoopContext {
    stream: String,
    stop_sentinel: Option<f64>,
    halt: HaltToken,
}

fn cycle_period(cycle_period_ms: u64) -> Duration {
    if cycle_period_ms == 0 {
        DEFAULT_CYCLE_PERIOD
    } else {
        Duration::from_millis(cycle_period_ms).max(MIN_CYCLE_PERIOD)
    }
}

/// Body of the acquisition thread.
///
/// Each cycle drains what the source has ready, routes every batch, then
/// waits for the next deadline or the halt signal. The halt signal is only
/// checked between batches, so a pulled batch is always persisted.
fn acquire(mut parts: Parts, ctx: &LoopContext) -> Parts {
    let period = cycle_period(parts.source.cycle_period_ms());
    let mut deadline = Instant::now();
    debug!(stream = %ctx.stream, period_ms = period.as_millis() as u64, "Acquisition loop running");

    'cycles: loop {
        for drained in 0..MAX_BATCHES_PER_CYCLE {
            let Some(batch) = parts.source.get_data() else {
                if drained == 0 {
                    debug!(stream = %ctx.stream, "Acquisition gap, skipping cycle");
                }
                break;
            };

            let outcome = parts.chain.route(&batch);
            if !outcome.is_clean() {
                debug!(
                    stream = %ctx.stream,
                    timestamp_ms = batch.timestamp_ms,
                    failed = outcome.errors.len(),
                    "Batch partially persisted"
                );
            }

            if let (Some(sentinel), Some(last)) = (ctx.stop_sentinel, batch.values.last_f64()) {
                if last == sentinel {
                    info!(
                        stream = %ctx.stream,
                        timestamp_ms = batch.timestamp_ms,
                        "End-of-run sentinel received"
                    );
                    break 'cycles;
                }
            }
            if ctx.halt.is_halted() {
                break 'cycles;
            }
        }

        deadline += period;
        let now = Instant::now();
        if now > deadline + period {
            // Fell behind by more than a cycle; skip the missed ticks.
            deadline = now + period;
        }
        if ctx.halt.wait_until(deadline) {
            break;
        }
    }

    parts.source.stop();
    debug!(stream = %ctx.stream, "Acquisition loop exited");
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfusion_core::{Batch, DataType, RecordLayout};
    use perfusion_driver_mock::PlaybackSource;
    use tempfile::tempdir;

    fn playback(period_ms: u64) -> PlaybackSource {
        PlaybackSource::new("Flow", Geometry::point(DataType::F32), period_ms)
    }

    fn stream(dir: &Path, source: PlaybackSource) -> SensorStream {
        let meta = StreamMetadata::for_source(&source, "ml/min");
        SensorStream::new(meta, Box::new(source), dir).unwrap()
    }

    #[test]
    fn test_rejects_incompatible_source() {
        let source = playback(10);
        let meta = StreamMetadata::new(
            "Flow",
            "ml/min",
            10,
            Geometry::new(DataType::F32, RecordLayout::Samples(2)),
        );
        let err = SensorStream::new(meta, Box::new(source), "/tmp").unwrap_err();
        assert!(matches!(err, PerfusionError::Configuration(_)));
    }

    #[test]
    fn test_transition_guards() {
        let dir = tempdir().unwrap();
        let mut s = stream(dir.path(), playback(5));
        s.add_strategy(&StrategyConfig::pass_through("Raw")).unwrap();

        assert!(matches!(
            s.start(),
            Err(PerfusionError::InvalidState { state: "created", .. })
        ));
        assert!(s.stop().is_ok(), "stop before start is a no-op");

        s.open().unwrap();
        s.open().unwrap();
        assert_eq!(s.state(), StreamState::Opened);
        assert!(matches!(
            s.add_strategy(&StrategyConfig::rms("RMS", 3)),
            Err(PerfusionError::InvalidState { .. })
        ));

        s.start().unwrap();
        s.start().unwrap();
        assert!(matches!(s.open(), Err(PerfusionError::InvalidState { .. })));
        assert!(s.chain().is_none());

        s.stop().unwrap();
        s.stop().unwrap();
        assert_eq!(s.state(), StreamState::Stopped);
        assert!(s.chain().is_some());

        s.close().unwrap();
        assert_eq!(s.state(), StreamState::Closed);
        s.add_strategy(&StrategyConfig::rms("RMS", 3)).unwrap();
        s.open().unwrap();
        assert_eq!(s.outputs().len(), 2);
    }

    #[test]
    fn test_open_writes_headers() {
        let dir = tempdir().unwrap();
        let mut s = stream(dir.path(), playback(20));
        s.add_strategy(&StrategyConfig::pass_through("Raw")).unwrap();
        s.add_strategy(&StrategyConfig::rms("RMS", 8)).unwrap();
        s.add_strategy(&StrategyConfig::moving_average("Avg", 4).in_memory())
            .unwrap();
        s.open().unwrap();

        let names: Vec<_> = s.outputs().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Raw", "RMS"]);
        assert_eq!(s.output_path("RMS"), Some(dir.path().join("Flow_RMS.dat").as_path()));

        let rms = s.reader("RMS").unwrap();
        assert_eq!(rms.header().algorithm.as_deref(), Some("RMS"));
        assert_eq!(rms.header().window_len, Some(8));
        assert_eq!(rms.header().sampling_period_ms, 20);
        assert_eq!(rms.record_count().unwrap(), 0);

        let raw = s.reader("Raw").unwrap();
        assert_eq!(raw.header().algorithm, None);
        assert!(matches!(s.reader("Avg"), Err(PerfusionError::Configuration(_))));
    }

    #[test]
    fn test_failed_open_rolls_back() {
        let dir = tempdir().unwrap();
        // A regular file where the output directory should be.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();

        let mut s = stream(&blocked, playback(10));
        s.add_strategy(&StrategyConfig::pass_through("Raw")).unwrap();
        assert!(s.open().is_err());
        assert_eq!(s.state(), StreamState::Created);
        assert!(s.outputs().is_empty());
    }

    #[test]
    fn test_sentinel_stops_stream() {
        let dir = tempdir().unwrap();
        let source = playback(1)
            .push_batch(Batch::new(0, vec![1.0f32]))
            .push_batch(Batch::new(1, vec![2.0f32, -1.0]))
            .push_batch(Batch::new(2, vec![3.0f32]));
        let pulled = source.pulled();
        let mut s = stream(dir.path(), source).with_stop_sentinel(Some(-1.0));
        s.add_strategy(&StrategyConfig::pass_through("Raw")).unwrap();
        s.open().unwrap();
        s.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while s.state() == StreamState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(s.state(), StreamState::Stopped);
        assert_eq!(pulled.load(std::sync::atomic::Ordering::SeqCst), 2);

        let raw = s.reader("Raw").unwrap();
        assert_eq!(raw.record_count().unwrap(), 3);
        s.close().unwrap();
    }

    #[test]
    fn test_cycle_period_bounds() {
        assert_eq!(cycle_period(0), DEFAULT_CYCLE_PERIOD);
        assert_eq!(cycle_period(250), Duration::from_millis(250));
        assert!(cycle_period(1) >= MIN_CYCLE_PERIOD);
    }
}
