//! Generic frequency table over ordered keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Counting operations shared by every histogram flavor.
///
/// A key is "observed" once it has been put. `clear` zeroes the counts of
/// observed keys but keeps them; `clear_values` forgets them. Removing a key
/// down to zero forgets it.
pub trait ValueHistogram<K> {
    fn put_count(&mut self, key: K, count: u64);

    fn put(&mut self, key: K) {
        self.put_count(key, 1);
    }

    /// Decrease `key` by `count`, saturating at zero.
    fn remove_count(&mut self, key: &K, count: u64);

    fn remove(&mut self, key: &K) {
        self.remove_count(key, 1);
    }

    /// Count for `key`, or `None` when it was never observed.
    fn get(&self, key: &K) -> Option<u64>;

    fn get_or(&self, key: &K, default: u64) -> u64 {
        self.get(key).unwrap_or(default)
    }

    fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Sum of all counts.
    fn sample_count(&self) -> u64;

    /// Number of observed keys.
    fn value_count(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.value_count() == 0
    }

    /// Observed keys in ascending order.
    fn values(&self) -> Vec<K>;

    fn min_value(&self) -> Option<K>;
    fn max_value(&self) -> Option<K>;
    fn min_count(&self) -> Option<u64>;
    fn max_count(&self) -> Option<u64>;

    /// Every key tied at the smallest count.
    fn min_count_values(&self) -> Vec<K>;

    /// Every key tied at the largest count.
    fn max_count_values(&self) -> Vec<K>;

    fn clear(&mut self);
    fn clear_values(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram<K: Ord> {
    histogram: BTreeMap<K, u64>,
    num_samples: u64,
}

impl<K: Ord> Default for Histogram<K> {
    fn default() -> Self {
        Self {
            histogram: BTreeMap::new(),
            num_samples: 0,
        }
    }
}

impl<K: Ord + Clone> Histogram<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> + '_ {
        self.histogram.iter().map(|(k, v)| (k, *v))
    }

    fn extreme_count_values(&self, want_min: bool) -> Vec<K> {
        let target = if want_min {
            self.min_count()
        } else {
            self.max_count()
        };
        match target {
            Some(t) => self
                .histogram
                .iter()
                .filter(|(_, &c)| c == t)
                .map(|(k, _)| k.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl<K: Ord + Clone> ValueHistogram<K> for Histogram<K> {
    fn put_count(&mut self, key: K, count: u64) {
        *self.histogram.entry(key).or_insert(0) += count;
        self.num_samples += count;
    }

    fn remove_count(&mut self, key: &K, count: u64) {
        if let Some(cur) = self.histogram.get_mut(key) {
            let removed = count.min(*cur);
            *cur -= removed;
            self.num_samples -= removed;
            if *cur == 0 {
                self.histogram.remove(key);
            }
        }
    }

    fn get(&self, key: &K) -> Option<u64> {
        self.histogram.get(key).copied()
    }

    fn sample_count(&self) -> u64 {
        self.num_samples
    }

    fn value_count(&self) -> usize {
        self.histogram.len()
    }

    fn values(&self) -> Vec<K> {
        self.histogram.keys().cloned().collect()
    }

    fn min_value(&self) -> Option<K> {
        self.histogram.keys().next().cloned()
    }

    fn max_value(&self) -> Option<K> {
        self.histogram.keys().next_back().cloned()
    }

    fn min_count(&self) -> Option<u64> {
        self.histogram.values().copied().min()
    }

    fn max_count(&self) -> Option<u64> {
        self.histogram.values().copied().max()
    }

    fn min_count_values(&self) -> Vec<K> {
        self.extreme_count_values(true)
    }

    fn max_count_values(&self) -> Vec<K> {
        self.extreme_count_values(false)
    }

    fn clear(&mut self) {
        for v in self.histogram.values_mut() {
            *v = 0;
        }
        self.num_samples = 0;
    }

    fn clear_values(&mut self) {
        self.histogram.clear();
        self.num_samples = 0;
    }
}
