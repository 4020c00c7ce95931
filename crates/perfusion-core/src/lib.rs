//! `perfusion-core`
//!
//! Core types shared by the perfusion acquisition pipeline:
//!
//! ```text
//! HardwareSource ──Batch──▶ strategy chain ──▶ append-only writers ──▶ .dat files
//!                                                                        ▲
//!                                             concurrent readers ────────┘
//! ```
//!
//! ## Key Types
//!
//! - [`DataType`] and [`SampleBuffer`]: element types and typed sample storage
//! - [`Geometry`]: element type plus record layout, which fixes the record size
//! - [`Batch`]: one acquisition cycle's samples under one timestamp
//! - [`StreamClock`]: a stream's monotonic epoch and millisecond timestamps
//! - [`HaltToken`]: cooperative halt signal for acquisition threads
//! - [`HardwareSource`] / [`SourceFactory`]: the hardware collaborator seam
//! - [`PerfusionError`]: the error taxonomy

pub mod batch;
pub mod clock;
pub mod dtype;
pub mod error;
pub mod geometry;
pub mod halt;
pub mod limits;
pub mod source;

pub use batch::Batch;
pub use clock::{truncate_ms, StreamClock};
pub use dtype::{DataType, SampleBuffer};
pub use error::{PerfusionError, Result};
pub use geometry::{Geometry, RecordLayout, TIMESTAMP_BYTES};
pub use halt::HaltToken;
pub use source::{HardwareSource, SourceFactory};
