//! Scripted playback source for deterministic tests.
//!
//! Replays a fixed list of cycles in order. Each cycle is either a batch or
//! a scripted acquisition gap. Once the script is exhausted every call is a
//! gap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use perfusion_core::{
    Batch, DataType, Geometry, HardwareSource, RecordLayout, SourceFactory, StreamClock,
};
use serde::Deserialize;

use crate::common::quantize;

pub struct PlaybackSource {
    name: String,
    geometry: Geometry,
    sampling_period_ms: u64,
    cycle_period_ms: u64,
    script: VecDeque<Option<Batch>>,
    pulled: Arc<AtomicUsize>,
    started: bool,
}

impl PlaybackSource {
    pub fn new(name: impl Into<String>, geometry: Geometry, sampling_period_ms: u64) -> Self {
        Self {
            name: name.into(),
            geometry,
            sampling_period_ms,
            cycle_period_ms: sampling_period_ms,
            script: VecDeque::new(),
            pulled: Arc::new(AtomicUsize::new(0)),
            started: false,
        }
    }

    /// Poll interval the controller should use, independent of the sampling
    /// period stamped into files.
    pub fn with_cycle_period_ms(mut self, cycle_period_ms: u64) -> Self {
        self.cycle_period_ms = cycle_period_ms;
        self
    }

    pub fn push_batch(mut self, batch: Batch) -> Self {
        self.script.push_back(Some(batch));
        self
    }

    pub fn push_gap(mut self) -> Self {
        self.script.push_back(None);
        self
    }

    /// Append one scripted batch per item.
    pub fn with_batches<I>(mut self, batches: I) -> Self
    where
        I: IntoIterator<Item = Batch>,
    {
        self.script.extend(batches.into_iter().map(Some));
        self
    }

    /// Counter of batches handed out, readable after the source has moved
    /// into a stream.
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulled)
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl HardwareSource for PlaybackSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        self.geometry.clone()
    }

    fn sampling_period_ms(&self) -> u64 {
        self.sampling_period_ms
    }

    fn cycle_period_ms(&self) -> u64 {
        self.cycle_period_ms
    }

    fn start(&mut self, _clock: &StreamClock) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn get_data(&mut self) -> Option<Batch> {
        if !self.started {
            return None;
        }
        let batch = self.script.pop_front().flatten()?;
        self.pulled.fetch_add(1, Ordering::SeqCst);
        Some(batch)
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

/// One scripted cycle in a playback configuration. An empty `values` list is
/// a gap.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackCycle {
    pub timestamp_ms: i32,
    #[serde(default)]
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default = "default_samples_per_timestamp")]
    pub samples_per_timestamp: usize,
    #[serde(default = "default_sampling_period_ms")]
    pub sampling_period_ms: u64,
    pub cycle_period_ms: Option<u64>,
    #[serde(default)]
    pub cycles: Vec<PlaybackCycle>,
}

fn default_data_type() -> DataType {
    DataType::F64
}

fn default_samples_per_timestamp() -> usize {
    1
}

fn default_sampling_period_ms() -> u64 {
    100
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.samples_per_timestamp == 0 {
            bail!("samples_per_timestamp must be at least 1");
        }
        for cycle in &self.cycles {
            if cycle.values.len() % self.samples_per_timestamp != 0 {
                bail!(
                    "cycle at {} ms has {} values, not a multiple of {}",
                    cycle.timestamp_ms,
                    cycle.values.len(),
                    self.samples_per_timestamp
                );
            }
        }
        Ok(())
    }
}

/// Factory for [`PlaybackSource`] (driver type `playback`).
pub struct PlaybackFactory;

impl SourceFactory for PlaybackFactory {
    fn driver_type(&self) -> &'static str {
        "playback"
    }

    fn name(&self) -> &'static str {
        "Scripted Playback"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: PlaybackConfig = config.clone().try_into()?;
        cfg.validate()
    }

    fn build(&self, name: &str, config: &toml::Value) -> Result<Box<dyn HardwareSource>> {
        let cfg: PlaybackConfig = config.clone().try_into()?;
        cfg.validate()?;

        let geometry = Geometry::new(
            cfg.data_type,
            RecordLayout::for_samples(cfg.samples_per_timestamp),
        );
        let mut source = PlaybackSource::new(name, geometry, cfg.sampling_period_ms)
            .with_cycle_period_ms(cfg.cycle_period_ms.unwrap_or(cfg.sampling_period_ms));
        for cycle in cfg.cycles {
            source = if cycle.values.is_empty() {
                source.push_gap()
            } else {
                source.push_batch(Batch::new(
                    cycle.timestamp_ms,
                    quantize(cfg.data_type, &cycle.values),
                ))
            };
        }
        Ok(Box::new(source))
    }
}
