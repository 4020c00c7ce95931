//! Fixed-capacity circular window with running sums.

/// Evictions between exact recomputations of the running sums.
const RESYNC_INTERVAL: u64 = 4096;

/// Ring of the last `capacity` values.
///
/// `push` writes over the oldest slot once the window is full, so each push
/// is O(1) and the window never reallocates after construction. The running
/// sum is kept incrementally and recomputed from the slots every
/// [`RESYNC_INTERVAL`] evictions to bound floating-point drift.
#[derive(Debug, Clone)]
pub struct CircularWindow {
    slots: Vec<f64>,
    /// Index the next push writes to.
    head: usize,
    len: usize,
    sum: f64,
    evictions: u64,
}

impl CircularWindow {
    /// Window of `capacity` slots. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0.0; capacity.max(1)],
            head: 0,
            len: 0,
            sum: 0.0,
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Sum of the values currently in the window.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Add `value`, returning the value it evicted.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.is_full() {
            Some(self.slots[self.head])
        } else {
            self.len += 1;
            None
        };

        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.slots.len();

        match evicted {
            Some(old) => {
                self.sum += value - old;
                self.evictions += 1;
                if self.evictions % RESYNC_INTERVAL == 0 {
                    self.sum = self.slots.iter().sum();
                }
            }
            None => self.sum += value,
        }
        evicted
    }

    /// Most recent value.
    pub fn latest(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.slots.len() - 1) % self.slots.len();
        Some(self.slots[idx])
    }

    /// Values oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let cap = self.slots.len();
        let start = (self.head + cap - self.len) % cap;
        (0..self.len).map(move |i| self.slots[(start + i) % cap])
    }

    /// Copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.iter().collect()
    }

    /// Empty the window. Capacity is kept.
    pub fn clear(&mut self) {
        self.slots.fill(0.0);
        self.head = 0;
        self.len = 0;
        self.sum = 0.0;
        self.evictions = 0;
    }
}
