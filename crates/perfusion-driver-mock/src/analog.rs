//! Mock analog channel (flow probe, pressure transducer).
//!
//! Samples are generated against the stream clock: sample `k` is acquired at
//! `start + k * sampling_period_ms`, and a read of `samples_per_read` samples
//! becomes available once its last sample's time has passed. `get_data`
//! never sleeps; polling early yields `None`.

use anyhow::{bail, Result};
use perfusion_core::{
    Batch, DataType, Geometry, HardwareSource, RecordLayout, SourceFactory, StreamClock,
};
use serde::Deserialize;
use tracing::debug;

use crate::common::{quantize, MockRng};

/// Signal shape of a mock channel. `t` is seconds since acquisition start.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Waveform {
    /// `value`
    Constant { value: f64 },
    /// `offset + amplitude * sin(2π f t)`
    Sine {
        amplitude: f64,
        frequency_hz: f64,
        #[serde(default)]
        offset: f64,
    },
    /// `start + slope_per_s * t`
    Ramp {
        #[serde(default)]
        start: f64,
        slope_per_s: f64,
    },
    /// `mean` plus uniform noise of half-width `amplitude`
    Noise { mean: f64, amplitude: f64 },
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine {
            amplitude: 1.0,
            frequency_hz: 1.0,
            offset: 0.0,
        }
    }
}

impl Waveform {
    fn value_at(&self, t: f64, rng: &mut MockRng) -> f64 {
        match *self {
            Waveform::Constant { value } => value,
            Waveform::Sine {
                amplitude,
                frequency_hz,
                offset,
            } => offset + amplitude * (std::f64::consts::TAU * frequency_hz * t).sin(),
            Waveform::Ramp { start, slope_per_s } => start + slope_per_s * t,
            Waveform::Noise { mean, amplitude } => mean + amplitude * rng.symmetric(),
        }
    }
}

/// Configuration of a [`MockAnalogSource`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockAnalogConfig {
    pub data_type: DataType,
    pub sampling_period_ms: u64,
    /// Samples handed out per `get_data`.
    pub samples_per_read: usize,
    /// Samples stored under one record timestamp.
    pub samples_per_timestamp: usize,
    pub waveform: Waveform,
    /// Probability that a ready read is dropped as an acquisition gap.
    pub gap_rate: f64,
    pub seed: Option<u64>,
}

impl Default for MockAnalogConfig {
    fn default() -> Self {
        Self {
            data_type: DataType::F32,
            sampling_period_ms: 100,
            samples_per_read: 1,
            samples_per_timestamp: 1,
            waveform: Waveform::default(),
            gap_rate: 0.0,
            seed: None,
        }
    }
}

impl MockAnalogConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_period_ms == 0 {
            bail!("sampling_period_ms must be positive");
        }
        if self.samples_per_timestamp == 0 {
            bail!("samples_per_timestamp must be at least 1");
        }
        if self.samples_per_read == 0 || self.samples_per_read % self.samples_per_timestamp != 0 {
            bail!(
                "samples_per_read ({}) must be a positive multiple of samples_per_timestamp ({})",
                self.samples_per_read,
                self.samples_per_timestamp
            );
        }
        if !(0.0..=1.0).contains(&self.gap_rate) {
            bail!("gap_rate must be within 0.0..=1.0, got {}", self.gap_rate);
        }
        Ok(())
    }
}

/// Simulated analog input channel.
#[derive(Debug)]
pub struct MockAnalogSource {
    name: String,
    config: MockAnalogConfig,
    rng: MockRng,
    clock: Option<StreamClock>,
    start_ms: i32,
    next_sample: u64,
}

impl MockAnalogSource {
    pub fn new(name: impl Into<String>, config: MockAnalogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            rng: MockRng::new(config.seed),
            config,
            clock: None,
            start_ms: 0,
            next_sample: 0,
        })
    }

    /// Samples that have been acquired so far.
    fn samples_available(&self, clock: &StreamClock) -> u64 {
        let elapsed = i64::from(clock.now_ms()) - i64::from(self.start_ms);
        if elapsed < 0 {
            return 0;
        }
        elapsed as u64 / self.config.sampling_period_ms + 1
    }
}

impl HardwareSource for MockAnalogSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn geometry(&self) -> Geometry {
        Geometry::new(
            self.config.data_type,
            RecordLayout::for_samples(self.config.samples_per_timestamp),
        )
    }

    fn sampling_period_ms(&self) -> u64 {
        self.config.sampling_period_ms
    }

    fn cycle_period_ms(&self) -> u64 {
        self.config.sampling_period_ms * self.config.samples_per_read as u64
    }

    fn start(&mut self, clock: &StreamClock) -> Result<()> {
        self.start_ms = clock.now_ms();
        self.next_sample = 0;
        self.clock = Some(*clock);
        debug!(source = %self.name, start_ms = self.start_ms, "Mock analog source started");
        Ok(())
    }

    fn get_data(&mut self) -> Option<Batch> {
        let clock = self.clock?;
        let per_read = self.config.samples_per_read as u64;
        if self.samples_available(&clock) < self.next_sample + per_read {
            return None;
        }

        let first = self.next_sample;
        self.next_sample += per_read;

        if self.rng.chance(self.config.gap_rate) {
            debug!(source = %self.name, first_sample = first, "Injected acquisition gap");
            return None;
        }

        let period = self.config.sampling_period_ms;
        let values: Vec<f64> = (first..first + per_read)
            .map(|k| {
                let t = (k * period) as f64 / 1000.0;
                self.config.waveform.value_at(t, &mut self.rng)
            })
            .collect();

        let offset_ms = i32::try_from(first * period).unwrap_or(i32::MAX);
        let timestamp_ms = self.start_ms.saturating_add(offset_ms);
        Some(Batch::new(
            timestamp_ms,
            quantize(self.config.data_type, &values),
        ))
    }

    fn stop(&mut self) {
        self.clock = None;
    }
}

/// Factory for [`MockAnalogSource`] (driver type `mock_analog`).
pub struct MockAnalogFactory;

impl SourceFactory for MockAnalogFactory {
    fn driver_type(&self) -> &'static str {
        "mock_analog"
    }

    fn name(&self) -> &'static str {
        "Mock Analog Channel"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockAnalogConfig = config.clone().try_into()?;
        cfg.validate()
    }

    fn build(&self, name: &str, config: &toml::Value) -> Result<Box<dyn HardwareSource>> {
        let cfg: MockAnalogConfig = config.clone().try_into()?;
        Ok(Box::new(MockAnalogSource::new(name, cfg)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfusion_core::SampleBuffer;

    fn constant(value: f64) -> MockAnalogConfig {
        MockAnalogConfig {
            sampling_period_ms: 10_000,
            waveform: Waveform::Constant { value },
            ..Default::default()
        }
    }

    #[test]
    fn test_nothing_before_start() {
        let mut source = MockAnalogSource::new("flow", constant(1.0)).unwrap();
        assert!(source.get_data().is_none());
    }

    #[test]
    fn test_first_sample_ready_at_start() {
        let mut source = MockAnalogSource::new("flow", constant(2.5)).unwrap();
        let clock = StreamClock::start();
        source.start(&clock).unwrap();

        let batch = source.get_data().unwrap();
        assert_eq!(batch.values, SampleBuffer::F32(vec![2.5]));
        // The next sample is 10 s away.
        assert!(source.get_data().is_none());
    }

    #[test]
    fn test_gap_rate_one_drops_everything() {
        let mut cfg = constant(1.0);
        cfg.gap_rate = 1.0;
        cfg.sampling_period_ms = 1;
        let mut source = MockAnalogSource::new("flow", cfg).unwrap();
        source.start(&StreamClock::start()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!((0..5).all(|_| source.get_data().is_none()));
    }

    #[test]
    fn test_config_validation() {
        let mut cfg = MockAnalogConfig::default();
        cfg.samples_per_read = 3;
        cfg.samples_per_timestamp = 2;
        assert!(MockAnalogSource::new("p", cfg).is_err());

        let mut cfg = MockAnalogConfig::default();
        cfg.sampling_period_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cycle_period_covers_one_read() {
        let cfg = MockAnalogConfig {
            sampling_period_ms: 20,
            samples_per_read: 5,
            ..Default::default()
        };
        let source = MockAnalogSource::new("p", cfg).unwrap();
        assert_eq!(source.cycle_period_ms(), 100);
    }

    #[test]
    fn test_factory_reads_toml() {
        let config: toml::Value = toml::from_str(
            r#"
            data_type = "int16"
            sampling_period_ms = 5
            samples_per_read = 4
            samples_per_timestamp = 2
            waveform = { shape = "ramp", slope_per_s = 1000.0 }
            "#,
        )
        .unwrap();

        let factory = MockAnalogFactory;
        assert_eq!(factory.driver_type(), "mock_analog");
        factory.validate(&config).unwrap();

        let source = factory.build("pressure", &config).unwrap();
        assert_eq!(source.name(), "pressure");
        assert_eq!(
            source.geometry(),
            Geometry::new(DataType::I16, RecordLayout::Samples(2))
        );
    }

    #[test]
    fn test_waveform_values() {
        let mut rng = MockRng::new(Some(1));
        let sine = Waveform::Sine {
            amplitude: 2.0,
            frequency_hz: 1.0,
            offset: 1.0,
        };
        assert!((sine.value_at(0.25, &mut rng) - 3.0).abs() < 1e-9);

        let ramp = Waveform::Ramp {
            start: 1.0,
            slope_per_s: 4.0,
        };
        assert_eq!(ramp.value_at(0.5, &mut rng), 3.0);

        let noise = Waveform::Noise {
            mean: 10.0,
            amplitude: 0.5,
        };
        let v = noise.value_at(0.0, &mut rng);
        assert!((9.5..10.5).contains(&v));
    }
}
