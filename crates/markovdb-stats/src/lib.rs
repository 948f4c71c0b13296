#![forbid(unsafe_code)]
//! markovdb-stats: frequency histograms.
//!
//! `Histogram<K>` works over any ordered key; `FastIntHistogram` preallocates
//! a counter per key of a small dense domain (partition ids). Both implement
//! [`ValueHistogram`] so statistics code can be written once.

pub mod fast;
pub mod histogram;

pub use fast::FastIntHistogram;
pub use histogram::{Histogram, ValueHistogram};
