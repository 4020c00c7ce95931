//! Strategy chain: ordered strategies of one stream and their writers.
//!
//! ```text
//!              ┌──────────────┐
//! batch ──┬──▶ │ Raw (pass)   │──▶ writer Flow_Raw.dat
//!         │    └──────────────┘
//!         ├──▶ │ RMS (W=10)   │──▶ writer Flow_RMS.dat
//!         │    └──────┬───────┘
//!         │           ▼ (chained)
//!         └    │ Smooth (avg) │──▶ in memory only
//!              └──────────────┘
//! ```
//!
//! Strategies run in attachment order. Each one reads the original batch
//! unless it was attached with [`StrategyInput::Output`], in which case it
//! reads the output of that earlier strategy in the same `route` call.
//! Geometry and wiring are checked in [`StrategyChain::add`]; routing never
//! fails as a whole, it only reports per-output append failures.

use perfusion_core::{Batch, Geometry, PerfusionError, Result};
use perfusion_storage::StreamWriter;
use tracing::warn;

use crate::strategy::{Strategy, StrategyConfig};

/// What a strategy reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StrategyInput {
    /// The batch pulled from hardware.
    #[default]
    Raw,
    /// The output of an earlier strategy, by name.
    Output(String),
}

impl From<Option<String>> for StrategyInput {
    fn from(input: Option<String>) -> Self {
        input.map_or(StrategyInput::Raw, StrategyInput::Output)
    }
}

struct Slot {
    strategy: Strategy,
    /// Index of the slot whose output this one reads.
    source: Option<usize>,
    output_geometry: Geometry,
    writer: Option<StreamWriter>,
}

/// An append that failed while routing.
#[derive(Debug)]
pub struct RouteError {
    pub output: String,
    pub error: PerfusionError,
}

/// Result of routing one batch.
#[derive(Debug, Default)]
pub struct RouteOutcome {
    /// Output of every strategy, in attachment order.
    pub outputs: Vec<Batch>,
    /// Records persisted across all writers.
    pub records_written: usize,
    pub errors: Vec<RouteError>,
}

impl RouteOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Ordered, named strategies of one stream.
pub struct StrategyChain {
    geometry: Geometry,
    sampling_period_ms: u64,
    slots: Vec<Slot>,
}

impl StrategyChain {
    /// Empty chain for a stream of raw `geometry`.
    pub fn new(geometry: Geometry, sampling_period_ms: u64) -> Self {
        Self {
            geometry,
            sampling_period_ms,
            slots: Vec::new(),
        }
    }

    /// Raw geometry of the stream.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Attach `strategy`, optionally bound to `writer`.
    ///
    /// Fails with `Configuration` for an empty window, a duplicate name, or
    /// an input that names no earlier strategy, and with `ConfigMismatch`
    /// when `writer` is already open on a file of another geometry.
    pub fn add(
        &mut self,
        mut strategy: Strategy,
        input: StrategyInput,
        writer: Option<StreamWriter>,
    ) -> Result<()> {
        if strategy.window_len() == 0 {
            return Err(PerfusionError::Configuration(format!(
                "strategy '{}' has a window length of 0",
                strategy.name()
            )));
        }
        if self.position(strategy.name()).is_some() {
            return Err(PerfusionError::Configuration(format!(
                "duplicate strategy name '{}'",
                strategy.name()
            )));
        }

        let (source, input_geometry) = match &input {
            StrategyInput::Raw => (None, self.geometry.clone()),
            StrategyInput::Output(name) => {
                let index = self.position(name).ok_or_else(|| {
                    PerfusionError::Configuration(format!(
                        "strategy '{}' reads '{name}', which is not attached before it",
                        strategy.name()
                    ))
                })?;
                (Some(index), self.slots[index].output_geometry.clone())
            }
        };

        let output_geometry = strategy.output_geometry(&input_geometry);
        if let Some(writer) = &writer {
            if let (Some(found), Some(path)) = (writer.geometry(), writer.path()) {
                if !output_geometry.is_compatible_with(found) {
                    return Err(PerfusionError::ConfigMismatch {
                        path: path.to_path_buf(),
                        expected: output_geometry,
                        found: found.clone(),
                    });
                }
            }
        }

        strategy.bind(&input_geometry, self.sampling_period_ms);
        self.slots.push(Slot {
            strategy,
            source,
            output_geometry,
            writer,
        });
        Ok(())
    }

    /// Build and attach a strategy from its configuration entry. A closed
    /// writer named after the output is bound when `persist` is set.
    pub fn add_config(&mut self, config: &StrategyConfig) -> Result<()> {
        let writer = config.persist.then(|| StreamWriter::new(config.name.clone()));
        self.add(
            Strategy::from_config(config),
            StrategyInput::from(config.input.clone()),
            writer,
        )
    }

    /// Run `batch` through every strategy and append each output to its
    /// writer.
    ///
    /// A failed append is logged and reported in the outcome; the remaining
    /// strategies and writers still run.
    pub fn route(&mut self, batch: &Batch) -> RouteOutcome {
        let mut outcome = RouteOutcome {
            outputs: Vec::with_capacity(self.slots.len()),
            ..Default::default()
        };

        for slot in &mut self.slots {
            let input = match slot.source {
                Some(index) => &outcome.outputs[index],
                None => batch,
            };
            let output = slot.strategy.process(input);

            if let Some(writer) = slot.writer.as_mut().filter(|w| w.is_open()) {
                match writer.append(output.timestamp_ms, &output.values) {
                    Ok(records) => outcome.records_written += records,
                    Err(error) => {
                        warn!(
                            output = %slot.strategy.name(),
                            timestamp_ms = output.timestamp_ms,
                            persistence = error.is_persistence_failure(),
                            error = %error,
                            "Dropping batch for output"
                        );
                        outcome.errors.push(RouteError {
                            output: slot.strategy.name().to_string(),
                            error,
                        });
                    }
                }
            }
            outcome.outputs.push(output);
        }
        outcome
    }

    pub fn get_strategy(&self, name: &str) -> Option<&Strategy> {
        self.position(name).map(|i| &self.slots[i].strategy)
    }

    pub fn get_writer(&self, name: &str) -> Option<&StreamWriter> {
        self.position(name)
            .and_then(|i| self.slots[i].writer.as_ref())
    }

    /// Geometry of the named strategy's output.
    pub fn output_geometry(&self, name: &str) -> Option<&Geometry> {
        self.position(name).map(|i| &self.slots[i].output_geometry)
    }

    /// Strategy names in attachment order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.strategy.name())
    }

    /// Strategies that have a writer, with their output geometry.
    pub fn persisted_outputs_mut(
        &mut self,
    ) -> impl Iterator<Item = (&Strategy, &Geometry, &mut StreamWriter)> {
        self.slots.iter_mut().filter_map(|slot| {
            slot.writer
                .as_mut()
                .map(|w| (&slot.strategy, &slot.output_geometry, w))
        })
    }

    /// Clear every strategy's rolling state.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.strategy.reset();
        }
    }

    /// Close every writer. All writers are closed even if one fails; the
    /// first failure is returned.
    pub fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for slot in &mut self.slots {
            if let Some(writer) = slot.writer.as_mut() {
                if let Err(e) = writer.close() {
                    warn!(output = %slot.strategy.name(), error = %e, "Failed to close writer");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.strategy.name() == name)
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyChain")
            .field("geometry", &self.geometry)
            .field("strategies", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use perfusion_core::{DataType, RecordLayout, SampleBuffer};
    use perfusion_storage::{StreamHeader, StreamReader};
    use tempfile::tempdir;

    fn chain() -> StrategyChain {
        StrategyChain::new(Geometry::point(DataType::F32), 100)
    }

    #[test]
    fn test_default_input_is_original_batch() {
        let mut chain = chain();
        chain.add_config(&StrategyConfig::rms("A", 2).in_memory()).unwrap();
        chain.add_config(&StrategyConfig::rms("B", 2).in_memory()).unwrap();

        let outcome = chain.route(&Batch::new(0, vec![3.0f32, 4.0]));
        assert_eq!(outcome.outputs[0], outcome.outputs[1]);
    }

    #[test]
    fn test_chained_input_reads_earlier_output() {
        let mut chain = chain();
        chain
            .add_config(&StrategyConfig::moving_average("Avg", 2).in_memory())
            .unwrap();
        chain
            .add_config(
                &StrategyConfig::moving_average("AvgOfAvg", 2)
                    .chained_to("Avg")
                    .in_memory(),
            )
            .unwrap();

        let outcome = chain.route(&Batch::new(0, vec![4.0f32, 4.0, 4.0]));
        assert_eq!(outcome.outputs[0].values, SampleBuffer::F64(vec![2.0, 4.0, 4.0]));
        assert_eq!(outcome.outputs[1].values, SampleBuffer::F64(vec![1.0, 3.0, 4.0]));
    }

    #[test]
    fn test_attach_time_validation() {
        let mut chain = chain();
        chain.add_config(&StrategyConfig::pass_through("Raw")).unwrap();

        let dup = chain.add_config(&StrategyConfig::pass_through("Raw"));
        assert!(matches!(dup, Err(PerfusionError::Configuration(_))));

        let zero = chain.add_config(&StrategyConfig::rms("RMS", 0));
        assert!(matches!(zero, Err(PerfusionError::Configuration(_))));

        let dangling = chain.add_config(&StrategyConfig::rms("RMS", 5).chained_to("Later"));
        assert!(matches!(dangling, Err(PerfusionError::Configuration(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_open_writer_geometry_checked_at_attach() {
        let dir = tempdir().unwrap();
        let mut writer = StreamWriter::new("RMS");
        writer
            .open(
                dir.path().join("Flow_RMS.dat"),
                StreamHeader::new("Flow", "RMS", "ml/min", Geometry::point(DataType::F32)),
            )
            .unwrap();

        // RMS promotes to float64; a float32 file cannot hold its output.
        let mut chain = chain();
        let err = chain
            .add(
                Strategy::new("RMS", StrategyKind::Rms, 5),
                StrategyInput::Raw,
                Some(writer),
            )
            .unwrap_err();
        assert!(matches!(err, PerfusionError::ConfigMismatch { .. }));
    }

    #[test]
    fn test_route_persists_each_output() {
        let dir = tempdir().unwrap();
        let mut chain = StrategyChain::new(
            Geometry::new(DataType::I16, RecordLayout::Samples(2)),
            10,
        );
        chain.add_config(&StrategyConfig::pass_through("Raw")).unwrap();
        chain.add_config(&StrategyConfig::rms("RMS", 4)).unwrap();

        for (strategy, geometry, writer) in chain.persisted_outputs_mut() {
            let path = dir.path().join(format!("P_{}.dat", strategy.name()));
            writer
                .open(
                    path,
                    StreamHeader::new("P", strategy.name(), "mmHg", geometry.clone())
                        .with_sampling_period_ms(10),
                )
                .unwrap();
        }

        let outcome = chain.route(&Batch::new(0, vec![1i16, 2, 3, 4]));
        assert!(outcome.is_clean());
        assert_eq!(outcome.records_written, 4);
        chain.close().unwrap();

        let raw = StreamReader::open(dir.path().join("P_Raw.dat")).unwrap();
        let records = raw.read_range(0, 10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].timestamp_ms, 20);
        assert_eq!(records[1].values, SampleBuffer::I16(vec![3, 4]));

        let rms = StreamReader::open(dir.path().join("P_RMS.dat")).unwrap();
        assert_eq!(rms.geometry().dtype, DataType::F64);
        assert_eq!(rms.record_count().unwrap(), 2);
    }

    #[test]
    fn test_append_failure_is_isolated() {
        let dir = tempdir().unwrap();
        let mut chain = chain();
        chain.add_config(&StrategyConfig::pass_through("Raw")).unwrap();
        chain.add_config(&StrategyConfig::rms("RMS", 2)).unwrap();
        for (strategy, geometry, writer) in chain.persisted_outputs_mut() {
            writer
                .open(
                    dir.path().join(format!("{}.dat", strategy.name())),
                    StreamHeader::new("F", strategy.name(), "", geometry.clone()),
                )
                .unwrap();
        }

        chain.route(&Batch::new(100, vec![1.0f32]));
        // Out-of-order batch fails for both outputs but routing completes.
        let outcome = chain.route(&Batch::new(50, vec![1.0f32]));
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.errors[0].output, "Raw");

        let later = chain.route(&Batch::new(200, vec![2.0f32]));
        assert!(later.is_clean());
        assert_eq!(chain.get_writer("RMS").unwrap().stats().records_written, 2);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut chain = chain();
        chain.add_config(&StrategyConfig::pass_through("Raw")).unwrap();
        chain.add_config(&StrategyConfig::rms("RMS", 3).in_memory()).unwrap();

        assert_eq!(chain.get_strategy("RMS").unwrap().window_len(), 3);
        assert!(chain.get_writer("Raw").is_some());
        assert!(chain.get_writer("RMS").is_none());
        assert!(chain.get_strategy("Volume").is_none());
        assert_eq!(
            chain.output_geometry("RMS"),
            Some(&Geometry::point(DataType::F64))
        );
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["Raw", "RMS"]);
    }
}
