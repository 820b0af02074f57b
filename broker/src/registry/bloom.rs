//! 1024-bit Bloom filter with 3 independently-salted hash functions,
//! used by discovery (C7) to short-circuit the `releasableTo` membership
//! check before paying for the exact set comparison.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const BITS: usize = 1024;
const WORDS: usize = BITS / 64;
const HASH_COUNT: usize = 3;

/// Independent per-instance salts so the three hashes aren't correlated
/// projections of the same underlying `Hash` impl.
const SALTS: [u64; HASH_COUNT] = [
    0x9E3779B97F4A7C15,
    0xBF58476D1CE4E5B9,
    0x94D049BB133111EB,
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BloomFilter {
    bits: [u64; WORDS],
}

impl Default for BloomFilter {
    fn default() -> Self {
        BloomFilter { bits: [0; WORDS] }
    }
}

impl BloomFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_elements<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for element in elements {
            filter.insert(element.as_ref());
        }
        filter
    }

    pub fn insert(&mut self, element: &str) {
        for idx in Self::bit_indices(element) {
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    pub fn contains(&self, element: &str) -> bool {
        Self::bit_indices(element).all(|idx| self.bits[idx / 64] & (1u64 << (idx % 64)) != 0)
    }

    fn bit_indices(element: &str) -> impl Iterator<Item = usize> {
        SALTS.iter().map(move |salt| {
            let mut hasher = DefaultHasher::new();
            salt.hash(&mut hasher);
            element.hash(&mut hasher);
            (hasher.finish() as usize) % BITS
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_elements_are_always_contained() {
        let releasable_to = ["did:prism:ACME", "did:prism:TECHCORP", "did:prism:GLOBEX"];
        let filter = BloomFilter::from_elements(releasable_to);
        for company in releasable_to {
            assert!(filter.contains(company));
        }
    }

    #[test]
    fn false_positive_rate_is_low() {
        let releasable_to: Vec<String> = (0..10).map(|i| format!("did:prism:company-{i}")).collect();
        let filter = BloomFilter::from_elements(&releasable_to);

        let mut false_positives = 0;
        let trials = 2000;
        for i in 0..trials {
            let probe = format!("did:prism:absent-{i}");
            if filter.contains(&probe) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / trials as f64;
        assert!(rate < 0.01, "false positive rate too high: {rate}");
    }

    #[test]
    fn empty_filter_contains_nothing() {
        let filter = BloomFilter::new();
        assert!(!filter.contains("did:prism:anything"));
    }
}
