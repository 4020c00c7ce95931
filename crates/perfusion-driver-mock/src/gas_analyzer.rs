//! Mock in-line blood-gas analyzer.
//!
//! The real instrument emits one packet of 18 arterial/venous values every
//! few seconds. The mock emits one `float64` record per period, each variable
//! jittered around a physiological baseline.

use anyhow::{bail, Result};
use perfusion_core::{Batch, DataType, Geometry, HardwareSource, RecordLayout, SourceFactory, StreamClock};
use serde::Deserialize;
use tracing::debug;

use crate::common::MockRng;

/// Variable names of one analyzer packet, in record order, with baselines.
pub const GAS_VARIABLES: [(&str, f64); 18] = [
    ("arterial_pH", 7.40),
    ("arterial_CO2", 40.0),
    ("arterial_O2", 100.0),
    ("arterial_temp", 37.0),
    ("arterial_sO2", 98.0),
    ("arterial_bicarb", 24.0),
    ("arterial_BE", 0.0),
    ("K", 4.0),
    ("VO2", 30.0),
    ("venous_pH", 7.35),
    ("venous_CO2", 46.0),
    ("venous_O2", 40.0),
    ("venous_temp", 37.0),
    ("venous_sO2", 75.0),
    ("venous_bicarb", 25.0),
    ("venous_BE", 0.0),
    ("hct", 30.0),
    ("hgb", 10.0),
];

/// Record geometry of the analyzer: 18 named `float64` variables.
pub fn gas_geometry() -> Geometry {
    Geometry::new(
        DataType::F64,
        RecordLayout::Variables(GAS_VARIABLES.iter().map(|(n, _)| n.to_string()).collect()),
    )
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockGasAnalyzerConfig {
    pub sampling_period_ms: u64,
    /// Relative jitter applied to each baseline (0.01 = ±1%).
    pub jitter: f64,
    pub seed: Option<u64>,
}

impl Default for MockGasAnalyzerConfig {
    fn default() -> Self {
        Self {
            sampling_period_ms: 1000,
            jitter: 0.01,
            seed: None,
        }
    }
}

impl MockGasAnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_period_ms == 0 {
            bail!("sampling_period_ms must be positive");
        }
        if self.jitter < 0.0 {
            bail!("jitter must not be negative");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockGasAnalyzer {
    name: String,
    config: MockGasAnalyzerConfig,
    rng: MockRng,
    clock: Option<StreamClock>,
    start_ms: i32,
    next_packet: u64,
}

impl MockGasAnalyzer {
    pub fn new(name: impl Into<String>, config: MockGasAnalyzerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            rng: MockRng::new(config.seed),
            config,
            clock: None,
            start_ms: 0,
            next_packet: 0,
        })
    }

    fn packet(&mut self) -> Vec<f64> {
        GAS_VARIABLES
            .iter()
            .map(|&(_, baseline)| {
                let spread = if baseline == 0.0 { 1.0 } else { baseline.abs() };
                baseline + spread * self.config.jitter * self.rng.symmetric()
            })
            .collect()
    }
}

impl HardwareSource for MockGasAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        gas_geometry()
    }

    fn sampling_period_ms(&self) -> u64 {
        self.config.sampling_period_ms
    }

    fn start(&mut self, clock: &StreamClock) -> Result<()> {
        self.start_ms = clock.now_ms();
        self.next_packet = 0;
        self.clock = Some(*clock);
        debug!(source = %self.name, "Mock gas analyzer started");
        Ok(())
    }

    fn get_data(&mut self) -> Option<Batch> {
        let clock = self.clock?;
        let elapsed = i64::from(clock.now_ms()) - i64::from(self.start_ms);
        let period = self.config.sampling_period_ms;
        if elapsed < 0 || (elapsed as u64) / period < self.next_packet {
            return None;
        }

        let offset_ms = i32::try_from(self.next_packet * period).unwrap_or(i32::MAX);
        self.next_packet += 1;
        Some(Batch::new(
            self.start_ms.saturating_add(offset_ms),
            self.packet(),
        ))
    }

    fn stop(&mut self) {
        self.clock = None;
    }
}

/// Factory for [`MockGasAnalyzer`] (driver type `mock_gas_analyzer`).
pub struct MockGasAnalyzerFactory;

impl SourceFactory for MockGasAnalyzerFactory {
    fn driver_type(&self) -> &'static str {
        "mock_gas_analyzer"
    }

    fn name(&self) -> &'static str {
        "Mock Blood Gas Analyzer"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockGasAnalyzerConfig = config.clone().try_into()?;
        cfg.validate()
    }

    fn build(&self, name: &str, config: &toml::Value) -> Result<Box<dyn HardwareSource>> {
        let cfg: MockGasAnalyzerConfig = config.clone().try_into()?;
        Ok(Box::new(MockGasAnalyzer::new(name, cfg)?))
    }
}
