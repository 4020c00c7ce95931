//! Shared limits for the acquisition and storage layers.

use std::time::Duration;

/// Largest text header accepted by readers.
///
/// Guards against scanning a whole data file when the blank-line terminator
/// is missing.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Most batches drained from a source in one acquisition cycle.
///
/// A source that keeps producing faster than it is polled cannot hold the
/// acquisition thread past this many batches before the halt signal is
/// checked again.
pub const MAX_BATCHES_PER_CYCLE: usize = 64;

/// Shortest acquisition cycle. A zero sampling period falls back to this.
pub const MIN_CYCLE_PERIOD: Duration = Duration::from_millis(1);

/// Cycle period used when a source reports no sampling period at all.
pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_millis(500);
