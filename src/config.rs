//! Configuration loading using Figment.
//!
//! A perfusion setup is described by one TOML file:
//!
//! ```toml
//! [application]
//! name = "Perfusion Rig"
//! log_level = "info"
//!
//! [storage]
//! output_dir = "data/run_01"
//!
//! [[hardware]]
//! name = "flow_probe"
//! driver = "mock_analog"
//! config = { data_type = "float32", sampling_period_ms = 10 }
//!
//! [[sensors]]
//! name = "ArterialFlow"
//! unit = "ml/min"
//! hardware = "flow_probe"
//!
//! [[sensors.strategies]]
//! name = "Raw"
//! kind = "pass_through"
//!
//! [[sensors.strategies]]
//! name = "RMS"
//! kind = "rms"
//! window_len = 50
//! ```
//!
//! # Example
//! ```no_run
//! use perfusion_daq::config::PerfusionConfig;
//!
//! let config = PerfusionConfig::load_from("config/perfusion.toml")?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use perfusion_core::{DataType, Geometry, RecordLayout};
use serde::{Deserialize, Serialize};

use crate::logging::parse_log_level;
use crate::strategy::StrategyConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerfusionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where stream files are written
    #[serde(default)]
    pub storage: StorageConfig,
    /// Hardware definitions
    #[serde(default)]
    pub hardware: Vec<HardwareConfig>,
    /// Sensor streams, in build order
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving `{sensor}_{output}.dat` files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// Hardware definition in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Unique hardware name
    pub name: String,
    /// Driver type (e.g., "mock_analog", "mock_gas_analyzer")
    pub driver: String,
    /// Driver-specific configuration (dynamic)
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

/// One sensor stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    /// Hardware the stream acquires from. Exclusive with `source`.
    #[serde(default)]
    pub hardware: Option<String>,
    /// Derive the stream from other sensors' outputs instead of hardware.
    #[serde(default)]
    pub source: Option<CalculatedSourceConfig>,
    /// Expected element type; defaults to what the source produces.
    #[serde(default)]
    pub data_type: Option<DataType>,
    /// Expected samples per timestamp; defaults to what the source produces.
    #[serde(default)]
    pub samples_per_timestamp: Option<usize>,
    /// Overrides the source's sampling period in file headers.
    #[serde(default)]
    pub sampling_period_ms: Option<u64>,
    /// Halt the stream after routing a batch ending in this value.
    #[serde(default)]
    pub stop_sentinel: Option<f64>,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl SensorConfig {
    /// Geometry the stream expects, given what its source produces.
    ///
    /// Unset fields are taken from `produced`. When the result is compatible
    /// with `produced`, the produced geometry is returned so variable names
    /// survive.
    pub fn expected_geometry(&self, produced: &Geometry) -> Geometry {
        let dtype = self.data_type.unwrap_or(produced.dtype);
        let spt = self
            .samples_per_timestamp
            .unwrap_or_else(|| produced.samples_per_timestamp());
        let expected = Geometry::new(dtype, RecordLayout::for_samples(spt));
        if expected.is_compatible_with(produced) {
            produced.clone()
        } else {
            expected
        }
    }

    /// Names of the strategies that get their own file.
    pub fn persisted_outputs(&self) -> impl Iterator<Item = &str> {
        self.strategies
            .iter()
            .filter(|s| s.persist)
            .map(|s| s.name.as_str())
    }
}

/// A persisted output of another sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRef {
    pub sensor: String,
    pub output: String,
}

/// Source of a calculated sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculatedSourceConfig {
    /// Re-read one output of another sensor.
    Reader {
        sensor: String,
        output: String,
        #[serde(default = "default_samples_per_calc")]
        samples_per_calc: usize,
    },
    /// Element-wise quotient of two outputs.
    Division { dividend: OutputRef, divisor: OutputRef },
}

impl CalculatedSourceConfig {
    /// Outputs this source reads.
    pub fn inputs(&self) -> Vec<OutputRef> {
        match self {
            CalculatedSourceConfig::Reader { sensor, output, .. } => vec![OutputRef {
                sensor: sensor.clone(),
                output: output.clone(),
            }],
            CalculatedSourceConfig::Division { dividend, divisor } => {
                vec![dividend.clone(), divisor.clone()]
            }
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "Perfusion DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

fn default_samples_per_calc() -> usize {
    1
}

impl PerfusionConfig {
    /// Load configuration from a TOML file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(text))
            .extract()
            .context("Failed to parse configuration")
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.application.log_level)?;

        let mut hardware = HashSet::new();
        for hw in &self.hardware {
            if !hardware.insert(hw.name.as_str()) {
                bail!("Duplicate hardware name: {}", hw.name);
            }
        }

        // Sensors may only read outputs of sensors declared before them.
        let mut earlier: Vec<&SensorConfig> = Vec::new();
        for sensor in &self.sensors {
            self.validate_sensor(sensor, &hardware, &earlier)
                .with_context(|| format!("Invalid sensor '{}'", sensor.name))?;
            earlier.push(sensor);
        }
        Ok(())
    }

    fn validate_sensor(
        &self,
        sensor: &SensorConfig,
        hardware: &HashSet<&str>,
        earlier: &[&SensorConfig],
    ) -> Result<()> {
        if sensor.name.trim().is_empty() {
            bail!("Sensor name cannot be empty");
        }
        if earlier.iter().any(|s| s.name == sensor.name) {
            bail!("Duplicate sensor name");
        }
        if sensor.samples_per_timestamp == Some(0) {
            bail!("samples_per_timestamp must be at least 1");
        }
        if let Some(sentinel) = sensor.stop_sentinel {
            if !sentinel.is_finite() {
                bail!("stop_sentinel must be a finite number");
            }
        }

        match (&sensor.hardware, &sensor.source) {
            (Some(_), Some(_)) => bail!("Set either 'hardware' or 'source', not both"),
            (None, None) => bail!("One of 'hardware' or 'source' is required"),
            (Some(hw), None) => {
                if !hardware.contains(hw.as_str()) {
                    bail!("Unknown hardware '{hw}'");
                }
            }
            (None, Some(source)) => {
                if let CalculatedSourceConfig::Reader {
                    samples_per_calc: 0,
                    ..
                } = source
                {
                    bail!("samples_per_calc must be at least 1");
                }
                for input in source.inputs() {
                    let producer = earlier
                        .iter()
                        .find(|s| s.name == input.sensor)
                        .with_context(|| {
                            format!("Input sensor '{}' is not declared before it", input.sensor)
                        })?;
                    if !producer.persisted_outputs().any(|o| o == input.output) {
                        bail!(
                            "Sensor '{}' has no persisted output '{}'",
                            input.sensor,
                            input.output
                        );
                    }
                }
            }
        }

        let mut names = HashSet::new();
        for strategy in &sensor.strategies {
            if !names.insert(strategy.name.as_str()) {
                bail!("Duplicate strategy name: {}", strategy.name);
            }
            if strategy.window_len == 0 {
                bail!("Strategy '{}' has window_len 0", strategy.name);
            }
        }
        Ok(())
    }

    /// Look up a sensor by name
    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RIG: &str = r#"
        [application]
        name = "Test Rig"
        log_level = "debug"

        [storage]
        output_dir = "out"

        [[hardware]]
        name = "flow_probe"
        driver = "mock_analog"
        config = { data_type = "float32", sampling_period_ms = 10 }

        [[hardware]]
        name = "bga"
        driver = "mock_gas_analyzer"

        [[sensors]]
        name = "Flow"
        unit = "ml/min"
        hardware = "flow_probe"
        stop_sentinel = -1.0

        [[sensors.strategies]]
        name = "Raw"
        kind = "pass_through"

        [[sensors.strategies]]
        name = "Volume"
        kind = "running_sum"
        window_len = 10
        calibration_seconds = 0.5

        [[sensors]]
        name = "BloodGas"
        hardware = "bga"

        [[sensors.strategies]]
        name = "Raw"
        kind = "pass_through"

        [[sensors]]
        name = "FlowCopy"
        source = { kind = "reader", sensor = "Flow", output = "Raw", samples_per_calc = 5 }

        [[sensors.strategies]]
        name = "RMS"
        kind = "rms"
        window_len = 4
    "#;

    fn write_temp(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_temp(RIG);
        let config = PerfusionConfig::load_from(file.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.application.name, "Test Rig");
        assert_eq!(config.storage.output_dir, PathBuf::from("out"));
        assert_eq!(config.hardware.len(), 2);
        assert_eq!(config.hardware[1].config, empty_table());

        let flow = config.sensor("Flow").unwrap();
        assert_eq!(flow.stop_sentinel, Some(-1.0));
        assert_eq!(
            flow.strategies[1].kind,
            StrategyKind::RunningSum {
                calibration_seconds: 0.5
            }
        );

        let copy = config.sensor("FlowCopy").unwrap();
        assert_eq!(
            copy.source,
            Some(CalculatedSourceConfig::Reader {
                sensor: "Flow".into(),
                output: "Raw".into(),
                samples_per_calc: 5,
            })
        );
    }

    #[test]
    fn test_defaults() {
        let config = PerfusionConfig::from_toml_str("").unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.storage.output_dir, PathBuf::from("data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let config = PerfusionConfig::from_toml_str("[application]\nlog_level = \"loud\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            // Duplicate hardware
            r#"
            [[hardware]]
            name = "a"
            driver = "playback"
            [[hardware]]
            name = "a"
            driver = "playback"
            "#,
            // Unknown hardware
            r#"
            [[sensors]]
            name = "S"
            hardware = "nope"
            "#,
            // Neither hardware nor source
            r#"
            [[sensors]]
            name = "S"
            "#,
            // Reads a sensor declared later
            r#"
            [[hardware]]
            name = "a"
            driver = "playback"
            [[sensors]]
            name = "Copy"
            source = { kind = "reader", sensor = "S", output = "Raw" }
            [[sensors]]
            name = "S"
            hardware = "a"
            [[sensors.strategies]]
            name = "Raw"
            kind = "pass_through"
            "#,
            // Reads an in-memory output
            r#"
            [[hardware]]
            name = "a"
            driver = "playback"
            [[sensors]]
            name = "S"
            hardware = "a"
            [[sensors.strategies]]
            name = "Avg"
            kind = "moving_average"
            window_len = 3
            persist = false
            [[sensors]]
            name = "Copy"
            source = { kind = "reader", sensor = "S", output = "Avg" }
            "#,
            // Zero window
            r#"
            [[hardware]]
            name = "a"
            driver = "playback"
            [[sensors]]
            name = "S"
            hardware = "a"
            [[sensors.strategies]]
            name = "RMS"
            kind = "rms"
            window_len = 0
            "#,
        ];
        for (i, text) in cases.iter().enumerate() {
            let config = PerfusionConfig::from_toml_str(text).unwrap();
            assert!(config.validate().is_err(), "case {i} should be rejected");
        }
    }

    #[test]
    fn test_unknown_strategy_kind_fails_to_parse() {
        let text = r#"
            [[sensors]]
            name = "S"
            hardware = "a"
            [[sensors.strategies]]
            name = "X"
            kind = "fft"
        "#;
        assert!(PerfusionConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_expected_geometry_keeps_variable_names() {
        let produced = Geometry::new(
            DataType::F64,
            RecordLayout::Variables(vec!["pH".into(), "K".into()]),
        );
        let sensor = SensorConfig {
            name: "BGA".into(),
            unit: String::new(),
            hardware: Some("bga".into()),
            source: None,
            data_type: Some(DataType::F64),
            samples_per_timestamp: None,
            sampling_period_ms: None,
            stop_sentinel: None,
            strategies: Vec::new(),
        };
        assert_eq!(sensor.expected_geometry(&produced), produced);

        let narrowed = SensorConfig {
            data_type: Some(DataType::F32),
            ..sensor
        };
        assert_eq!(
            narrowed.expected_geometry(&produced),
            Geometry::new(DataType::F32, RecordLayout::Samples(2))
        );
    }
}
