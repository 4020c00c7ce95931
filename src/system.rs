//! Application context: every configured sensor stream of one rig.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use perfusion_core::{Geometry, HardwareSource};
use perfusion_storage::output_path;
use tracing::{info, warn};

use crate::calculated::{DivisionSource, ReaderSource};
use crate::config::{CalculatedSourceConfig, OutputRef, PerfusionConfig, SensorConfig};
use crate::registry::HardwareRegistry;
use crate::sensor::{SensorStream, StreamMetadata};

/// All sensor streams built from one configuration.
///
/// Sensors are kept in declaration order. Calculated sensors read files of
/// sensors declared before them, so streams are opened and started in that
/// order and stopped in reverse.
#[derive(Debug)]
pub struct PerfusionSystem {
    name: String,
    output_dir: PathBuf,
    sensors: Vec<SensorStream>,
}

impl PerfusionSystem {
    /// Build every sensor of `config`. Hardware must already be defined in
    /// `registry`.
    pub fn from_config(config: &PerfusionConfig, registry: &HardwareRegistry) -> Result<Self> {
        config.validate()?;
        let output_dir = config.storage.output_dir.clone();

        let mut system = Self {
            name: config.application.name.clone(),
            output_dir,
            sensors: Vec::with_capacity(config.sensors.len()),
        };
        for sensor in &config.sensors {
            let stream = system
                .build_sensor(sensor, registry)
                .with_context(|| format!("Failed to build sensor '{}'", sensor.name))?;
            system.sensors.push(stream);
        }

        info!(
            system = %system.name,
            sensors = system.sensors.len(),
            dir = %system.output_dir.display(),
            "System built"
        );
        Ok(system)
    }

    fn build_sensor(
        &self,
        sensor: &SensorConfig,
        registry: &HardwareRegistry,
    ) -> Result<SensorStream> {
        let source: Box<dyn HardwareSource> = match (&sensor.hardware, &sensor.source) {
            (Some(hardware), _) => registry.create(hardware)?,
            (None, Some(calculated)) => self.calculated_source(&sensor.name, calculated)?,
            (None, None) => return Err(anyhow!("sensor has no source")),
        };

        let geometry = sensor.expected_geometry(&source.geometry());
        let period = sensor
            .sampling_period_ms
            .unwrap_or_else(|| source.sampling_period_ms());
        let meta = StreamMetadata::new(&sensor.name, &sensor.unit, period, geometry);

        let mut stream = SensorStream::new(meta, source, &self.output_dir)?
            .with_stop_sentinel(sensor.stop_sentinel);
        for strategy in &sensor.strategies {
            stream.add_strategy(strategy)?;
        }
        Ok(stream)
    }

    fn calculated_source(
        &self,
        name: &str,
        config: &CalculatedSourceConfig,
    ) -> Result<Box<dyn HardwareSource>> {
        match config {
            CalculatedSourceConfig::Reader {
                sensor,
                output,
                samples_per_calc,
            } => {
                let (path, geometry, period) = self.resolve(&OutputRef {
                    sensor: sensor.clone(),
                    output: output.clone(),
                })?;
                Ok(Box::new(
                    ReaderSource::new(name, path, geometry, period)
                        .with_samples_per_calc(*samples_per_calc),
                ))
            }
            CalculatedSourceConfig::Division { dividend, divisor } => {
                let (num_path, num_geometry, period) = self.resolve(dividend)?;
                let (den_path, den_geometry, _) = self.resolve(divisor)?;
                Ok(Box::new(DivisionSource::new(
                    name,
                    (num_path, num_geometry),
                    (den_path, den_geometry),
                    period,
                )?))
            }
        }
    }

    /// File, geometry and sampling period of an output of an earlier sensor.
    fn resolve(&self, input: &OutputRef) -> Result<(PathBuf, Geometry, u64)> {
        let producer = self
            .sensor(&input.sensor)
            .ok_or_else(|| anyhow!("Unknown input sensor '{}'", input.sensor))?;
        let geometry = producer
            .chain()
            .and_then(|chain| chain.output_geometry(&input.output))
            .cloned()
            .ok_or_else(|| {
                anyhow!("Sensor '{}' has no output '{}'", input.sensor, input.output)
            })?;
        Ok((
            output_path(&self.output_dir, &input.sensor, &input.output),
            geometry,
            producer.metadata().sampling_period_ms,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorStream> {
        self.sensors.iter().find(|s| s.name() == name)
    }

    pub fn sensor_mut(&mut self, name: &str) -> Option<&mut SensorStream> {
        self.sensors.iter_mut().find(|s| s.name() == name)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorStream> {
        self.sensors.iter()
    }

    /// Open every sensor, in declaration order.
    pub fn open_all(&mut self) -> Result<()> {
        for sensor in &mut self.sensors {
            sensor
                .open()
                .with_context(|| format!("Failed to open sensor '{}'", sensor.name()))?;
        }
        Ok(())
    }

    /// Start every sensor, in declaration order.
    pub fn start_all(&mut self) -> Result<()> {
        for sensor in &mut self.sensors {
            sensor
                .start()
                .with_context(|| format!("Failed to start sensor '{}'", sensor.name()))?;
        }
        info!(system = %self.name, "All sensors running");
        Ok(())
    }

    /// Stop every sensor, last declared first.
    pub fn stop_all(&mut self) -> Result<()> {
        for sensor in self.sensors.iter_mut().rev() {
            sensor
                .stop()
                .with_context(|| format!("Failed to stop sensor '{}'", sensor.name()))?;
        }
        Ok(())
    }

    /// Stop and close every sensor. All sensors are closed even if one
    /// fails; the first failure is returned.
    pub fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for sensor in self.sensors.iter_mut().rev() {
            if let Err(e) = sensor.close() {
                warn!(sensor = %sensor.name(), error = %e, "Failed to close sensor");
                first_error.get_or_insert(anyhow!(e).context(format!(
                    "Failed to close sensor '{}'",
                    sensor.name()
                )));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for PerfusionSystem {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(system = %self.name, error = %e, "Failed to close system on drop");
        }
    }
}
