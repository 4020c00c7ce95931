//! Hardware collaborator interface.
//!
//! A [`HardwareSource`] hands out timestamped batches on demand. It is polled
//! from the owning stream's acquisition thread and must never block there:
//! when nothing new has been acquired it returns `None` and the cycle is
//! skipped.
//!
//! Sources are created through a [`SourceFactory`] registered under a driver
//! type, mirroring how drivers are registered with a device registry:
//!
//! ```text
//! HardwareRegistry
//!   factories: driver_type -> Box<dyn SourceFactory>
//!   hardware:  name        -> (driver_type, toml config)
//!         │
//!         ▼
//! SourceFactory::build(name, config) -> Box<dyn HardwareSource>
//! ```

use anyhow::Result;

use crate::batch::Batch;
use crate::clock::StreamClock;
use crate::geometry::Geometry;

/// A producer of raw sample batches.
pub trait HardwareSource: Send {
    /// Configured name of the device or channel.
    fn name(&self) -> &str;

    /// Geometry of the batches this source produces.
    fn geometry(&self) -> Geometry;

    /// Interval between individual samples, in milliseconds.
    fn sampling_period_ms(&self) -> u64;

    /// Interval between batches. Defaults to the sampling period; sources
    /// that acquire several samples per read override it.
    fn cycle_period_ms(&self) -> u64 {
        self.sampling_period_ms()
    }

    /// Begin acquiring against the stream's epoch.
    fn start(&mut self, clock: &StreamClock) -> Result<()>;

    /// Next acquired batch, or `None` if nothing new is ready. Non-blocking.
    fn get_data(&mut self) -> Option<Batch>;

    /// Stop acquiring. Called when the owning stream stops.
    fn stop(&mut self) {}

    /// Forget everything consumed so far. Called when the owning stream
    /// opens a new epoch; a `stop` followed by `start` resumes instead.
    fn rewind(&mut self) {}
}

/// Builds [`HardwareSource`]s of one driver type from configuration.
pub trait SourceFactory: Send + Sync {
    /// Driver type key used in configuration (e.g. `"mock_analog"`).
    fn driver_type(&self) -> &'static str;

    /// Human-readable driver name.
    fn name(&self) -> &'static str;

    /// Check a configuration table without building anything.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Build a source named `name` from its configuration table.
    fn build(&self, name: &str, config: &toml::Value) -> Result<Box<dyn HardwareSource>>;
}
