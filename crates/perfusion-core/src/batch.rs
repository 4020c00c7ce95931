use serde::{Deserialize, Serialize};

use crate::dtype::SampleBuffer;

/// One acquisition cycle's worth of samples under a single timestamp.
///
/// `timestamp_ms` is relative to the owning stream's epoch (see
/// [`StreamClock`](crate::clock::StreamClock)). Batches are never persisted
/// directly; they always pass through at least the pass-through strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub timestamp_ms: i32,
    pub values: SampleBuffer,
}

impl Batch {
    pub fn new(timestamp_ms: i32, values: impl Into<SampleBuffer>) -> Self {
        Self {
            timestamp_ms,
            values: values.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
