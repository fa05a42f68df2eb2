//! Near-duplicate page detection
//!
//! A page's stopword-filtered word counts are folded into a 128-bit SimHash:
//! every distinct token contributes its count to each bit position, positively
//! where the token's own 128-bit hash has a 1 and negatively where it has a 0.
//! Similar vocabularies produce fingerprints a small Hamming distance apart.

use std::collections::{HashMap, HashSet};
use xxhash_rust::xxh3::xxh3_128;

use crate::config::Config;

pub const FINGERPRINT_BITS: u32 = 128;

/// SimHash of a page's word-count vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u128);

impl Fingerprint {
    /// Deterministic in the vector's contents; map iteration order does not matter.
    pub fn from_word_counts<S: AsRef<str>>(counts: &HashMap<S, u64>) -> Self {
        let mut weights = [0i64; FINGERPRINT_BITS as usize];

        for (token, &count) in counts {
            let hash = xxh3_128(token.as_ref().as_bytes());
            let weight = count as i64;
            for (bit, slot) in weights.iter_mut().enumerate() {
                if (hash >> bit) & 1 == 1 {
                    *slot += weight;
                } else {
                    *slot -= weight;
                }
            }
        }

        let mut value = 0u128;
        for (bit, &w) in weights.iter().enumerate() {
            if w > 0 {
                value |= 1u128 << bit;
            }
        }
        Fingerprint(value)
    }

    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// 1 - distance/128
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        1.0 - self.hamming_distance(other) as f64 / FINGERPRINT_BITS as f64
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Every fingerprint accepted so far. Grows monotonically.
///
/// Near-duplicate lookup is a linear scan, so each check is O(corpus).
#[derive(Debug)]
pub struct FingerprintSet {
    exact: HashSet<Fingerprint>,
    ordered: Vec<Fingerprint>,
    threshold: f64,
}

impl Default for FingerprintSet {
    fn default() -> Self {
        Self::new(Config::SIMILARITY_THRESHOLD)
    }
}

impl FingerprintSet {
    pub fn new(threshold: f64) -> Self {
        Self {
            exact: HashSet::new(),
            ordered: Vec::new(),
            threshold,
        }
    }

    pub fn is_duplicate(&self, fp: &Fingerprint) -> bool {
        if self.exact.contains(fp) {
            return true;
        }
        self.ordered.iter().any(|seen| fp.similarity(seen) >= self.threshold)
    }

    /// Returns false if already present.
    pub fn insert(&mut self, fp: Fingerprint) -> bool {
        if self.exact.insert(fp) {
            self.ordered.push(fp);
            true
        } else {
            false
        }
    }

    /// Check-then-insert in one step. Returns true when `fp` was new and distinct.
    pub fn insert_if_distinct(&mut self, fp: Fingerprint) -> bool {
        if self.is_duplicate(&fp) {
            return false;
        }
        self.insert(fp)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
