//! Mock hardware for the perfusion pipeline.
//!
//! Simulated sources for running and testing acquisition without
//! instruments. Every source is non-blocking: `get_data` returns `None`
//! until the stream clock says the next read is due.
//!
//! # Available Sources
//!
//! - [`MockAnalogSource`]: flow or pressure channel with a configurable
//!   waveform, samples per read and injected gaps
//! - [`MockGasAnalyzer`]: 18-variable blood-gas packets
//! - [`PlaybackSource`]: scripted batches and gaps, for deterministic tests
//!
//! # Factories
//!
//! Each source has a [`SourceFactory`](perfusion_core::SourceFactory) for use
//! with a hardware registry:
//!
//! ```rust,ignore
//! registry.register_factory(Box::new(MockAnalogFactory));
//! registry.register_factory(Box::new(MockGasAnalyzerFactory));
//! registry.register_factory(Box::new(PlaybackFactory));
//! ```

pub mod analog;
pub mod common;
pub mod gas_analyzer;
pub mod playback;

pub use analog::{MockAnalogConfig, MockAnalogFactory, MockAnalogSource, Waveform};
pub use common::MockRng;
pub use gas_analyzer::{
    gas_geometry, MockGasAnalyzer, MockGasAnalyzerConfig, MockGasAnalyzerFactory, GAS_VARIABLES,
};
pub use playback::{PlaybackConfig, PlaybackFactory, PlaybackSource};

/// Every mock factory, for registering in one go.
pub fn factories() -> Vec<Box<dyn perfusion_core::SourceFactory>> {
    vec![
        Box::new(MockAnalogFactory),
        Box::new(MockGasAnalyzerFactory),
        Box::new(PlaybackFactory),
    ]
}
