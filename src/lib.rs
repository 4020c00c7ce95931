//! # Perfusion DAQ
//!
//! Acquisition, processing and persistence for perfusion sensors. Each
//! sensor stream pulls batches from a hardware source on its own thread,
//! runs them through an ordered chain of processing strategies, and appends
//! each strategy's output to its own file. Readers on other threads follow
//! those files while they grow.
//!
//! ## Crate Structure
//!
//! - **`strategy`**: The closed set of processing strategies (pass-through,
//!   rolling RMS, moving average, running sum) and their circular windows.
//! - **`chain`**: `StrategyChain`, ordered strategies of one stream with their
//!   writers, including chained inputs.
//! - **`sensor`**: `SensorStream`, the Created/Opened/Running/Stopped/Closed
//!   controller that owns the acquisition thread.
//! - **`calculated`**: Sources that derive a stream from other streams' files
//!   (reader replay, division).
//! - **`registry`**: `HardwareRegistry`, driver factories and named hardware.
//! - **`config`**: TOML configuration loaded with figment.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`system`**: `PerfusionSystem`, every sensor of one configuration.
//!
//! The file format, writer and reader live in `perfusion-storage`; shared
//! types and the error taxonomy in `perfusion-core`.

pub mod calculated;
pub mod chain;
pub mod config;
pub mod logging;
pub mod registry;
pub mod sensor;
pub mod strategy;
pub mod system;

pub use calculated::{DivisionSource, ReaderSource};
pub use chain::{RouteError, RouteOutcome, StrategyChain, StrategyInput};
pub use config::PerfusionConfig;
pub use registry::HardwareRegistry;
pub use sensor::{OutputInfo, SensorStream, StreamMetadata, StreamState};
pub use strategy::{CircularWindow, Strategy, StrategyConfig, StrategyKind};
pub use system::PerfusionSystem;

pub use perfusion_core::{
    Batch, DataType, Geometry, HardwareSource, PerfusionError, RecordLayout, SampleBuffer,
};
pub use perfusion_storage::{Cursor, Record, StreamReader, StreamWriter, WriterStats};
