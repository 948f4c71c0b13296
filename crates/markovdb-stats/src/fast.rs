//! Fixed-domain histogram over `0..size`.
//!
//! One counter per key; `-1` marks a key that was never observed. Updates are
//! O(1) and min/max scans are O(size), which suits small dense domains such as
//! partition ids.

use serde::{Deserialize, Serialize};

use crate::histogram::ValueHistogram;

const UNSEEN: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastIntHistogram {
    histogram: Vec<i64>,
    value_count: usize,
    num_samples: u64,
}

impl FastIntHistogram {
    pub fn new(size: usize) -> Self {
        Self {
            histogram: vec![UNSEEN; size],
            value_count: 0,
            num_samples: 0,
        }
    }

    /// Size of the key domain.
    pub fn fast_size(&self) -> usize {
        self.histogram.len()
    }

    /// Count for `idx`, zero when unseen.
    pub fn fast_get(&self, idx: usize) -> u64 {
        match self.histogram[idx] {
            UNSEEN => 0,
            c => c as u64,
        }
    }

    pub fn fast_put(&mut self, idx: usize) {
        self.put_count(idx, 1);
    }

    /// Widen the domain to `size` keys. Never shrinks.
    pub fn grow(&mut self, size: usize) {
        if size > self.histogram.len() {
            self.histogram.resize(size, UNSEEN);
        }
    }

    fn extreme_count(&self, want_min: bool) -> Option<u64> {
        let mut best: Option<i64> = None;
        for &c in &self.histogram {
            if c == UNSEEN {
                continue;
            }
            best = match best {
                Some(b) if (want_min && c >= b) || (!want_min && c <= b) => Some(b),
                _ => Some(c),
            };
        }
        best.map(|c| c as u64)
    }

    fn extreme_count_values(&self, want_min: bool) -> Vec<usize> {
        let mut best: Option<i64> = None;
        let mut values = Vec::new();
        for (i, &c) in self.histogram.iter().enumerate() {
            if c == UNSEEN {
                continue;
            }
            match best {
                Some(b) if b == c => values.push(i),
                Some(b) if (want_min && c > b) || (!want_min && c < b) => {}
                _ => {
                    best = Some(c);
                    values.clear();
                    values.push(i);
                }
            }
        }
        values
    }
}

impl Default for FastIntHistogram {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ValueHistogram<usize> for FastIntHistogram {
    fn put_count(&mut self, key: usize, count: u64) {
        let slot = &mut self.histogram[key];
        if *slot == UNSEEN {
            *slot = count as i64;
            self.value_count += 1;
        } else {
            *slot += count as i64;
        }
        self.num_samples += count;
    }

    fn remove_count(&mut self, key: &usize, count: u64) {
        let Some(slot) = self.histogram.get_mut(*key) else {
            return;
        };
        if *slot == UNSEEN {
            return;
        }
        let removed = count.min(*slot as u64);
        *slot -= removed as i64;
        self.num_samples -= removed;
        if *slot == 0 {
            *slot = UNSEEN;
            self.value_count -= 1;
        }
    }

    fn get(&self, key: &usize) -> Option<u64> {
        match self.histogram.get(*key) {
            Some(&c) if c != UNSEEN => Some(c as u64),
            _ => None,
        }
    }

    fn sample_count(&self) -> u64 {
        self.num_samples
    }

    fn value_count(&self) -> usize {
        self.value_count
    }

    fn values(&self) -> Vec<usize> {
        self.histogram
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != UNSEEN)
            .map(|(i, _)| i)
            .collect()
    }

    fn min_value(&self) -> Option<usize> {
        self.histogram.iter().position(|&c| c != UNSEEN)
    }

    fn max_value(&self) -> Option<usize> {
        self.histogram.iter().rposition(|&c| c != UNSEEN)
    }

    fn min_count(&self) -> Option<u64> {
        self.extreme_count(true)
    }

    fn max_count(&self) -> Option<u64> {
        self.extreme_count(false)
    }

    fn min_count_values(&self) -> Vec<usize> {
        self.extreme_count_values(true)
    }

    fn max_count_values(&self) -> Vec<usize> {
        self.extreme_count_values(false)
    }

    fn clear(&mut self) {
        for c in self.histogram.iter_mut() {
            if *c != UNSEEN {
                *c = 0;
            }
        }
        self.num_samples = 0;
    }

    fn clear_values(&mut self) {
        self.histogram.fill(UNSEEN);
        self.value_count = 0;
        self.num_samples = 0;
    }
}
