// THEORY:
// Rare classes such as "diseased" flicker in and out of detector output from one
// frame to the next. The confirmation window debounces that flicker with the
// same fixed-length `VecDeque` history a smart chunk keeps for its deltas: each
// cycle contributes one boolean, the oldest falls off the front, and the verdict
// is a plain K-of-N vote over what remains.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Debounced verdict after one push.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationSnapshot {
    /// Current number of entries, at most the capacity.
    pub window_n: usize,
    pub min_hits: usize,
    pub hits: usize,
    /// Confidence a detection needed to count as a hit upstream. Display only.
    pub threshold_conf: f64,
    pub confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct ConfirmationWindow {
    history: VecDeque<bool>,
    capacity: usize,
    min_hits: usize,
    threshold_conf: f64,
}

impl ConfirmationWindow {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, min_hits: usize, threshold_conf: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity + 1),
            capacity,
            min_hits,
            threshold_conf,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold_conf(&self) -> f64 {
        self.threshold_conf
    }

    pub fn push(&mut self, hit: bool) -> ConfirmationSnapshot {
        self.history.push_back(hit);
        if self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> ConfirmationSnapshot {
        let hits = self.history.iter().filter(|hit| **hit).count();
        let window_n = self.history.len();
        ConfirmationSnapshot {
            window_n,
            min_hits: self.min_hits,
            hits,
            threshold_conf: self.threshold_conf,
            confirmed: window_n > 0 && hits >= self.min_hits,
        }
    }
}
